//! Container manifest parsing
//!
//! Handles the JSON manifest document each container's build step emits and
//! converts it into the typed [`Manifest`] the runtime works with.

use semver::Version;
use serde::de::{self, MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

use crate::federation::validation::{ManifestValidator, ValidationResult};
use crate::federation::versioning::{parse_version, SemverError, VersionRange};

/// Manifest document as it appears on the wire
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ManifestDocument {
    /// Container identifier (globally unique within a deployment)
    pub container_id: String,
    /// URI of the loadable entry artifact
    pub entry: String,
    /// Exposed path -> internal module reference, in declaration order
    #[serde(default)]
    pub exposes: ExposesMap,
    /// Shared dependency declarations
    #[serde(default)]
    pub shared: Vec<SharedDeclaration>,
}

/// One `shared` entry of the wire document
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SharedDeclaration {
    pub name: String,
    pub version_range: String,
    #[serde(default)]
    pub singleton: bool,
    pub provided_version: String,
    /// Provider living in another container, loaded through that container's exposes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub federated_from: Option<RemoteReference>,
}

/// Reference to a module exposed by another container
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub struct RemoteReference {
    pub container_id: String,
    pub exposed_path: String,
}

/// Ordered `exposes` mapping that rejects duplicate keys
///
/// A JSON object with a repeated key would otherwise silently keep the last
/// value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExposesMap(Vec<(String, String)>);

impl ExposesMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an entry; returns false if the path is already present
    pub fn insert(&mut self, path: impl Into<String>, reference: impl Into<String>) -> bool {
        let path = path.into();
        if self.contains(&path) {
            return false;
        }
        self.0.push((path, reference.into()));
        true
    }

    pub fn contains(&self, path: &str) -> bool {
        self.0.iter().any(|(p, _)| p == path)
    }

    pub fn get(&self, path: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(p, _)| p == path)
            .map(|(_, reference)| reference.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(p, r)| (p.as_str(), r.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<'de> Deserialize<'de> for ExposesMap {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct ExposesVisitor;

        impl<'de> Visitor<'de> for ExposesVisitor {
            type Value = ExposesMap;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a map of exposed paths to module references")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<ExposesMap, A::Error> {
                let mut exposes = ExposesMap(Vec::with_capacity(access.size_hint().unwrap_or(0)));
                while let Some((path, reference)) = access.next_entry::<String, String>()? {
                    if exposes.contains(&path) {
                        return Err(de::Error::custom(format!(
                            "duplicate exposed path '{}'",
                            path
                        )));
                    }
                    exposes.0.push((path, reference));
                }
                Ok(exposes)
            }
        }

        deserializer.deserialize_map(ExposesVisitor)
    }
}

impl Serialize for ExposesMap {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (path, reference) in &self.0 {
            map.serialize_entry(path, reference)?;
        }
        map.end()
    }
}

/// Shared dependency requirement with parsed versions
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SharedDependencyRequirement {
    pub name: String,
    pub version_range: VersionRange,
    pub singleton: bool,
    pub provided_version: Version,
    pub federated_from: Option<RemoteReference>,
}

impl TryFrom<&SharedDeclaration> for SharedDependencyRequirement {
    type Error = SemverError;

    fn try_from(decl: &SharedDeclaration) -> Result<Self, Self::Error> {
        Ok(Self {
            name: decl.name.clone(),
            version_range: VersionRange::parse(&decl.version_range)?,
            singleton: decl.singleton,
            provided_version: parse_version(&decl.provided_version)?,
            federated_from: decl.federated_from.clone(),
        })
    }
}

/// Manifest parsing errors
#[derive(Debug, Clone, thiserror::Error)]
pub enum ManifestError {
    #[error("Manifest is {size} bytes, limit is {limit}")]
    TooLarge { size: usize, limit: usize },

    #[error("Failed to parse manifest JSON: {0}")]
    Json(String),

    #[error("Invalid manifest: {}", .0.join("; "))]
    Invalid(Vec<String>),

    #[error("Invalid manifest version data: {0}")]
    Semver(#[from] SemverError),
}

/// Typed, validated container manifest (immutable once built)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Manifest {
    pub container_id: String,
    pub entry: String,
    pub exposes: ExposesMap,
    pub shared: Vec<SharedDependencyRequirement>,
}

impl Manifest {
    /// Parse and validate a manifest document fetched for `expected_id`
    pub fn parse(
        document: &str,
        expected_id: &str,
        validator: &ManifestValidator,
    ) -> Result<Self, ManifestError> {
        validator.check_size(document.len())?;

        let doc: ManifestDocument =
            serde_json::from_str(document).map_err(|e| ManifestError::Json(e.to_string()))?;

        match validator.validate(&doc, expected_id) {
            ValidationResult::Valid => {}
            ValidationResult::Invalid(errors) => return Err(ManifestError::Invalid(errors)),
        }

        Self::try_from(&doc)
    }

    /// Whether `exposed_path` is declared
    pub fn exposes(&self, exposed_path: &str) -> bool {
        self.exposes.contains(exposed_path)
    }

    /// Shared requirement declared for `name`
    pub fn shared_requirement(&self, name: &str) -> Option<&SharedDependencyRequirement> {
        self.shared.iter().find(|req| req.name == name)
    }
}

impl TryFrom<&ManifestDocument> for Manifest {
    type Error = ManifestError;

    fn try_from(doc: &ManifestDocument) -> Result<Self, Self::Error> {
        let shared = doc
            .shared
            .iter()
            .map(SharedDependencyRequirement::try_from)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            container_id: doc.container_id.clone(),
            entry: doc.entry.clone(),
            exposes: doc.exposes.clone(),
            shared,
        })
    }
}

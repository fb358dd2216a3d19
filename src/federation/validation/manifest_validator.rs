//! Manifest validation
//!
//! Validates container manifests for structure and version data before they
//! are admitted into the registry.

use std::collections::HashSet;
use tracing::{debug, warn};

use crate::federation::registry::manifest::{ManifestDocument, ManifestError, SharedDeclaration};
use crate::federation::versioning::{parse_version, VersionRange};

/// Default upper bound on a manifest document
pub const DEFAULT_MAX_MANIFEST_BYTES: usize = 256 * 1024;

/// Validation result
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationResult {
    /// Manifest is valid
    Valid,
    /// Manifest is invalid with specific errors
    Invalid(Vec<String>),
}

/// Manifest validator
#[derive(Debug, Clone)]
pub struct ManifestValidator {
    /// Maximum manifest size (bytes)
    max_manifest_size: usize,
}

impl ManifestValidator {
    /// Create a new manifest validator
    pub fn new() -> Self {
        Self::with_max_size(DEFAULT_MAX_MANIFEST_BYTES)
    }

    pub fn with_max_size(max_manifest_size: usize) -> Self {
        Self { max_manifest_size }
    }

    /// Reject oversized documents before parsing them
    pub fn check_size(&self, size: usize) -> Result<(), ManifestError> {
        if size > self.max_manifest_size {
            return Err(ManifestError::TooLarge {
                size,
                limit: self.max_manifest_size,
            });
        }
        Ok(())
    }

    /// Validate a manifest document fetched for `expected_id`
    pub fn validate(&self, manifest: &ManifestDocument, expected_id: &str) -> ValidationResult {
        let mut errors = Vec::new();

        if manifest.container_id.is_empty() {
            errors.push("Container id cannot be empty".to_string());
        } else if !self.is_valid_container_id(&manifest.container_id) {
            errors.push(format!(
                "Invalid container id: {} (alphanumeric plus - _ . @ /)",
                manifest.container_id
            ));
        }

        if manifest.container_id != expected_id {
            errors.push(format!(
                "Manifest declares container id {} but was requested as {}",
                manifest.container_id, expected_id
            ));
        }

        if manifest.entry.trim().is_empty() {
            errors.push("Entry location cannot be empty".to_string());
        }

        // Duplicate exposed paths are rejected while parsing
        for (path, reference) in manifest.exposes.iter() {
            if path.is_empty() {
                errors.push("Exposed path cannot be empty".to_string());
            }
            if reference.is_empty() {
                errors.push(format!("Exposed path {} has an empty module reference", path));
            }
        }

        if let Err(shared_errors) = self.validate_shared(&manifest.shared) {
            errors.extend(shared_errors);
        }

        if errors.is_empty() {
            debug!(
                "Manifest validation passed for container: {}",
                manifest.container_id
            );
            ValidationResult::Valid
        } else {
            warn!(
                "Manifest validation failed for container {}: {:?}",
                manifest.container_id, errors
            );
            ValidationResult::Invalid(errors)
        }
    }

    /// Validate container id format
    #[inline]
    fn is_valid_container_id(&self, id: &str) -> bool {
        if id.len() > 128 {
            return false;
        }

        // Must start with alphanumeric or a scope marker
        if !id
            .chars()
            .next()
            .map_or(false, |c| c.is_alphanumeric() || c == '@')
        {
            return false;
        }

        id.chars()
            .all(|c| c.is_alphanumeric() || matches!(c, '-' | '_' | '.' | '@' | '/'))
    }

    /// Validate shared declarations
    fn validate_shared(&self, shared: &[SharedDeclaration]) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();
        let mut seen = HashSet::new();

        for decl in shared {
            if decl.name.is_empty() {
                errors.push("Shared dependency name cannot be empty".to_string());
                continue;
            }

            if !seen.insert(decl.name.as_str()) {
                errors.push(format!("Duplicate shared dependency: {}", decl.name));
            }

            if let Err(e) = VersionRange::parse(&decl.version_range) {
                errors.push(format!("Shared dependency {}: {}", decl.name, e));
            }

            if let Err(e) = parse_version(&decl.provided_version) {
                errors.push(format!("Shared dependency {}: {}", decl.name, e));
            }

            if let Some(remote) = &decl.federated_from {
                if remote.container_id.is_empty() || remote.exposed_path.is_empty() {
                    errors.push(format!(
                        "Shared dependency {}: federatedFrom needs containerId and exposedPath",
                        decl.name
                    ));
                }
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

impl Default for ManifestValidator {
    fn default() -> Self {
        Self::new()
    }
}

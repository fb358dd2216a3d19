//! Configuration management for the federation runtime
//!
//! Handles configuration loading (TOML or JSON), environment overrides and
//! validation.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use crate::utils::env_int;

/// Environment override for `fetch_timeout_ms`
pub const ENV_FETCH_TIMEOUT_MS: &str = "FEDERATION_FETCH_TIMEOUT_MS";
/// Environment override for `max_resolution_depth`
pub const ENV_MAX_DEPTH: &str = "FEDERATION_MAX_DEPTH";

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML config: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Failed to parse JSON config: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Unsupported config format: {0}")]
    UnsupportedFormat(String),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Logging configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct LoggingConfig {
    /// Log filter (e.g. "info", "federation_runtime=debug"); RUST_LOG wins
    #[serde(default)]
    pub filter: Option<String>,

    /// Emit JSON records (requires the `json-logging` feature)
    #[serde(default)]
    pub json_format: bool,
}

/// Federation session configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FederationConfig {
    /// Known remotes: container id -> manifest location
    #[serde(default)]
    pub remotes: HashMap<String, String>,

    /// Timeout for manifest and entry fetches (ms); no timeout when unset
    #[serde(default)]
    pub fetch_timeout_ms: Option<u64>,

    /// Maximum nesting of container resolutions
    #[serde(default = "default_max_resolution_depth")]
    pub max_resolution_depth: usize,

    /// Manifest document size limit (bytes)
    #[serde(default = "default_max_manifest_bytes")]
    pub max_manifest_bytes: usize,

    /// Diagnostic events retained per session
    #[serde(default = "default_event_history_limit")]
    pub event_history_limit: usize,

    #[serde(default)]
    pub logging: LoggingConfig,
}

fn default_max_resolution_depth() -> usize {
    crate::federation::resolver::DEFAULT_MAX_RESOLUTION_DEPTH
}

fn default_max_manifest_bytes() -> usize {
    crate::federation::validation::DEFAULT_MAX_MANIFEST_BYTES
}

fn default_event_history_limit() -> usize {
    crate::federation::events::DEFAULT_EVENT_HISTORY
}

impl Default for FederationConfig {
    fn default() -> Self {
        Self {
            remotes: HashMap::new(),
            fetch_timeout_ms: None,
            max_resolution_depth: default_max_resolution_depth(),
            max_manifest_bytes: default_max_manifest_bytes(),
            event_history_limit: default_event_history_limit(),
            logging: LoggingConfig::default(),
        }
    }
}

impl FederationConfig {
    /// Load configuration from a `.toml` or `.json` file
    ///
    /// Environment overrides are applied and the result is validated.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let mut config = match path.extension().and_then(|ext| ext.to_str()) {
            Some("toml") => Self::from_toml_str(&content)?,
            Some("json") => Self::from_json_str(&content)?,
            other => {
                return Err(ConfigError::UnsupportedFormat(
                    other.unwrap_or("<none>").to_string(),
                ))
            }
        };
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    pub fn from_json_str(content: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(content)?)
    }

    /// Apply `FEDERATION_*` environment overrides
    pub fn apply_env_overrides(&mut self) {
        if let Some(timeout_ms) = env_int::<u64>(ENV_FETCH_TIMEOUT_MS) {
            self.fetch_timeout_ms = Some(timeout_ms);
        }
        if let Some(depth) = env_int::<usize>(ENV_MAX_DEPTH) {
            self.max_resolution_depth = depth;
        }
    }

    /// Fetch timeout as a duration
    pub fn fetch_timeout(&self) -> Option<Duration> {
        self.fetch_timeout_ms.map(Duration::from_millis)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_resolution_depth == 0 {
            return Err(ConfigError::Invalid(
                "max_resolution_depth must be greater than 0".to_string(),
            ));
        }
        if self.max_manifest_bytes == 0 {
            return Err(ConfigError::Invalid(
                "max_manifest_bytes must be greater than 0".to_string(),
            ));
        }
        if self.fetch_timeout_ms == Some(0) {
            return Err(ConfigError::Invalid(
                "fetch_timeout_ms must be greater than 0 when set".to_string(),
            ));
        }
        if let Some((id, _)) = self.remotes.iter().find(|(id, location)| id.is_empty() || location.is_empty()) {
            return Err(ConfigError::Invalid(format!(
                "remote '{}' needs a non-empty id and location",
                id
            )));
        }
        Ok(())
    }
}

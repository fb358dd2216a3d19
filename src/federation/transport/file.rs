//! Filesystem manifest source
//!
//! Reads manifest documents from local files. Locations may be `file://`
//! URIs or plain paths; relative paths resolve against the configured base
//! directory.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::federation::transport::{FetchError, ManifestSource};

/// Reads manifests from disk
#[derive(Debug, Clone, Default)]
pub struct FileManifestSource {
    base_dir: Option<PathBuf>,
}

impl FileManifestSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve relative locations against `base_dir`
    pub fn with_base_dir<P: AsRef<Path>>(base_dir: P) -> Self {
        Self {
            base_dir: Some(base_dir.as_ref().to_path_buf()),
        }
    }

    fn resolve(&self, location: &str) -> Result<PathBuf, FetchError> {
        let raw = match location.split_once("://") {
            Some(("file", rest)) => rest,
            Some(_) => return Err(FetchError::UnsupportedLocation(location.to_string())),
            None => location,
        };
        if raw.is_empty() {
            return Err(FetchError::UnsupportedLocation(location.to_string()));
        }

        let path = PathBuf::from(raw);
        Ok(match &self.base_dir {
            Some(base) if path.is_relative() => base.join(path),
            _ => path,
        })
    }
}

#[async_trait]
impl ManifestSource for FileManifestSource {
    async fn fetch_manifest(&self, location: &str) -> Result<String, FetchError> {
        let path = self.resolve(location)?;
        debug!("Reading manifest from {}", path.display());

        tokio::fs::read_to_string(&path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                FetchError::NotFound(path.display().to_string())
            } else {
                FetchError::Io(format!("{}: {}", path.display(), e))
            }
        })
    }
}

//! Transport seam
//!
//! The runtime never assumes a particular transport. Manifest documents come
//! from a [`ManifestSource`] and entry artifacts are instantiated by an
//! [`EntryLoader`]; both are supplied by the embedding application.

pub mod catalog;
pub mod file;
#[cfg(feature = "http")]
pub mod http;
pub mod memory;

use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;

use crate::federation::registry::manifest::Manifest;
use crate::federation::traits::ContainerEntry;

pub use catalog::{EntryCatalog, StaticContainer, StaticContainerBuilder};
pub use file::FileManifestSource;
#[cfg(feature = "http")]
pub use http::HttpManifestSource;
pub use memory::InMemoryManifestSource;

/// Transport-level failures
#[derive(Debug, Clone, Error)]
pub enum FetchError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Unsupported location: {0}")]
    UnsupportedLocation(String),

    #[error("Entry artifact rejected: {0}")]
    InvalidEntry(String),

    #[error("Document at {location} exceeds the {limit} byte limit")]
    TooLarge { location: String, limit: usize },
}

/// Fetches manifest documents
#[async_trait]
pub trait ManifestSource: Send + Sync {
    /// Fetch the manifest document stored at `location`
    async fn fetch_manifest(&self, location: &str) -> Result<String, FetchError>;
}

/// Fetches and instantiates entry artifacts
#[async_trait]
pub trait EntryLoader: Send + Sync {
    /// Instantiate the entry artifact named by `manifest.entry`
    ///
    /// Fails when the artifact is missing or does not implement the entry
    /// protocol.
    async fn load_entry(&self, manifest: &Manifest) -> Result<Arc<dyn ContainerEntry>, FetchError>;
}

//! In-memory manifest source
//!
//! Serves manifest documents registered up front. Used when containers are
//! linked into the host binary, and by tests.

use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::debug;

use crate::federation::registry::manifest::ManifestDocument;
use crate::federation::transport::{FetchError, ManifestSource};

/// Manifest documents keyed by location
#[derive(Debug, Default)]
pub struct InMemoryManifestSource {
    documents: Mutex<HashMap<String, String>>,
    fetch_counts: Mutex<HashMap<String, usize>>,
    /// Simulated network latency per fetch
    latency: Option<Duration>,
}

impl InMemoryManifestSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every fetch by `latency`
    pub fn with_latency(latency: Duration) -> Self {
        Self {
            latency: Some(latency),
            ..Self::default()
        }
    }

    /// Serve `document` at `location`
    pub async fn insert(&self, location: impl Into<String>, document: impl Into<String>) {
        self.documents
            .lock()
            .await
            .insert(location.into(), document.into());
    }

    /// Serve a serialized manifest at `location`
    pub async fn insert_manifest(
        &self,
        location: impl Into<String>,
        manifest: &ManifestDocument,
    ) -> Result<(), serde_json::Error> {
        let document = serde_json::to_string(manifest)?;
        self.insert(location, document).await;
        Ok(())
    }

    /// Number of fetches served (or attempted) for `location`
    pub async fn fetch_count(&self, location: &str) -> usize {
        self.fetch_counts
            .lock()
            .await
            .get(location)
            .copied()
            .unwrap_or(0)
    }
}

#[async_trait]
impl ManifestSource for InMemoryManifestSource {
    async fn fetch_manifest(&self, location: &str) -> Result<String, FetchError> {
        *self
            .fetch_counts
            .lock()
            .await
            .entry(location.to_string())
            .or_insert(0) += 1;

        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }

        debug!("Serving in-memory manifest for {}", location);
        self.documents
            .lock()
            .await
            .get(location)
            .cloned()
            .ok_or_else(|| FetchError::NotFound(location.to_string()))
    }
}

//! HTTP manifest source

use async_trait::async_trait;
use std::time::Duration;
use tracing::debug;

use crate::federation::transport::{FetchError, ManifestSource};
use crate::federation::validation::DEFAULT_MAX_MANIFEST_BYTES;

/// Fetches manifests over HTTP(S)
///
/// Bodies larger than `max_bytes` are rejected from the `Content-Length`
/// header when present, otherwise as soon as the streamed body passes it.
#[derive(Debug, Clone)]
pub struct HttpManifestSource {
    client: reqwest::Client,
    max_bytes: usize,
}

impl HttpManifestSource {
    pub fn new() -> Result<Self, FetchError> {
        Self::with_timeout(Duration::from_secs(30))
    }

    /// Client with a per-request timeout
    pub fn with_timeout(timeout: Duration) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| FetchError::Http(e.to_string()))?;
        Ok(Self::from_client(client))
    }

    pub fn from_client(client: reqwest::Client) -> Self {
        Self {
            client,
            max_bytes: DEFAULT_MAX_MANIFEST_BYTES,
        }
    }

    /// Largest manifest body accepted, usually `max_manifest_bytes`
    pub fn with_max_bytes(mut self, max_bytes: usize) -> Self {
        self.max_bytes = max_bytes;
        self
    }

    fn too_large(&self, location: &str) -> FetchError {
        FetchError::TooLarge {
            location: location.to_string(),
            limit: self.max_bytes,
        }
    }
}

#[async_trait]
impl ManifestSource for HttpManifestSource {
    async fn fetch_manifest(&self, location: &str) -> Result<String, FetchError> {
        if !(location.starts_with("http://") || location.starts_with("https://")) {
            return Err(FetchError::UnsupportedLocation(location.to_string()));
        }
        debug!("GET {}", location);

        let response = self
            .client
            .get(location)
            .send()
            .await
            .map_err(|e| FetchError::Http(e.to_string()))?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(FetchError::NotFound(location.to_string()));
        }
        let mut response = response
            .error_for_status()
            .map_err(|e| FetchError::Http(e.to_string()))?;

        if let Some(length) = response.content_length() {
            if length > self.max_bytes as u64 {
                return Err(self.too_large(location));
            }
        }

        let mut body = Vec::new();
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| FetchError::Http(e.to_string()))?
        {
            if body.len() + chunk.len() > self.max_bytes {
                return Err(self.too_large(location));
            }
            body.extend_from_slice(&chunk);
        }

        String::from_utf8(body)
            .map_err(|e| FetchError::Http(format!("manifest at {} is not UTF-8: {}", location, e)))
    }
}

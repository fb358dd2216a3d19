//! Linked entry artifacts
//!
//! [`EntryCatalog`] maps entry URIs to constructors for containers compiled
//! into the host, and [`StaticContainer`] is a ready-made [`ContainerEntry`]
//! built from exposed factories and shared thunks.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::federation::registry::manifest::Manifest;
use crate::federation::scope::SharedScopeView;
use crate::federation::traits::{ContainerEntry, ModuleFactory, SharedFactory};
use crate::federation::transport::{EntryLoader, FetchError};

type EntryConstructor = Arc<dyn Fn() -> Result<Arc<dyn ContainerEntry>, String> + Send + Sync>;

/// Entry constructors keyed by entry URI
#[derive(Default)]
pub struct EntryCatalog {
    constructors: Mutex<HashMap<String, EntryConstructor>>,
    load_counts: Mutex<HashMap<String, usize>>,
    latency: Option<Duration>,
}

impl EntryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every entry load by `latency`
    pub fn with_latency(latency: Duration) -> Self {
        Self {
            latency: Some(latency),
            ..Self::default()
        }
    }

    /// Register a constructor for `uri`
    pub async fn register<F>(&self, uri: impl Into<String>, constructor: F)
    where
        F: Fn() -> Result<Arc<dyn ContainerEntry>, String> + Send + Sync + 'static,
    {
        let uri = uri.into();
        debug!("Registering entry constructor for {}", uri);
        self.constructors
            .lock()
            .await
            .insert(uri, Arc::new(constructor));
    }

    /// Register a single shared instance for `uri`
    pub async fn register_entry(&self, uri: impl Into<String>, entry: Arc<dyn ContainerEntry>) {
        self.register(uri, move || Ok(Arc::clone(&entry))).await;
    }

    /// Number of times the entry at `uri` was instantiated
    pub async fn load_count(&self, uri: &str) -> usize {
        self.load_counts
            .lock()
            .await
            .get(uri)
            .copied()
            .unwrap_or(0)
    }
}

#[async_trait]
impl EntryLoader for EntryCatalog {
    async fn load_entry(&self, manifest: &Manifest) -> Result<Arc<dyn ContainerEntry>, FetchError> {
        *self
            .load_counts
            .lock()
            .await
            .entry(manifest.entry.clone())
            .or_insert(0) += 1;

        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }

        let constructor = self
            .constructors
            .lock()
            .await
            .get(&manifest.entry)
            .cloned()
            .ok_or_else(|| FetchError::NotFound(manifest.entry.clone()))?;

        info!(
            "Instantiating entry {} for container {}",
            manifest.entry, manifest.container_id
        );
        constructor().map_err(FetchError::InvalidEntry)
    }
}

/// Container built from in-process factories
pub struct StaticContainer {
    exposes: HashMap<String, ModuleFactory>,
    shared: HashMap<String, SharedFactory>,
}

impl StaticContainer {
    pub fn builder() -> StaticContainerBuilder {
        StaticContainerBuilder::default()
    }
}

#[async_trait]
impl ContainerEntry for StaticContainer {
    async fn init(&self, scope: &SharedScopeView) -> Result<(), String> {
        // Only offer what the manifest declared; extra thunks stay unused
        for name in scope.declared() {
            if let Some(factory) = self.shared.get(name) {
                scope
                    .provide(name, factory.clone())
                    .await
                    .map_err(|e| e.to_string())?;
            }
        }
        Ok(())
    }

    async fn get(&self, exposed_path: &str) -> Result<ModuleFactory, String> {
        self.exposes
            .get(exposed_path)
            .cloned()
            .ok_or_else(|| format!("{} is not exposed", exposed_path))
    }
}

/// Builder for [`StaticContainer`]
#[derive(Default)]
pub struct StaticContainerBuilder {
    exposes: HashMap<String, ModuleFactory>,
    shared: HashMap<String, SharedFactory>,
}

impl StaticContainerBuilder {
    /// Expose `factory` under `path`
    pub fn expose(mut self, path: impl Into<String>, factory: ModuleFactory) -> Self {
        self.exposes.insert(path.into(), factory);
        self
    }

    /// Offer `factory` as this container's provider of shared dependency `name`
    pub fn provide(mut self, name: impl Into<String>, factory: SharedFactory) -> Self {
        self.shared.insert(name.into(), factory);
        self
    }

    pub fn build(self) -> StaticContainer {
        StaticContainer {
            exposes: self.exposes,
            shared: self.shared,
        }
    }
}

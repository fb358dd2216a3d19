//! Federation session
//!
//! Explicit context owning one registry, one shared scope and one event
//! stream. Sessions are fully isolated from each other, so a process (or a
//! test) may run any number of them side by side.

use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::info;
use uuid::Uuid;

use crate::config::FederationConfig;
use crate::federation::events::{EventManager, FederationEvent};
use crate::federation::loader::RemoteLoader;
use crate::federation::registry::{ContainerHandle, ContainerRegistry};
use crate::federation::resolver::ModuleResolver;
use crate::federation::scope::SharedScope;
use crate::federation::traits::{FederationError, LoadState, Module};
use crate::federation::transport::{EntryLoader, ManifestSource};
use crate::federation::validation::ManifestValidator;

/// One federated runtime instance
pub struct FederationSession {
    session_id: Uuid,
    config: FederationConfig,
    registry: Arc<ContainerRegistry>,
    scope: Arc<SharedScope>,
    events: Arc<EventManager>,
    loader: RemoteLoader,
    resolver: ModuleResolver,
}

impl FederationSession {
    /// Create a session; remotes listed in `config` are declared up front
    pub fn new(
        config: FederationConfig,
        manifests: Arc<dyn ManifestSource>,
        entries: Arc<dyn EntryLoader>,
    ) -> Result<Self, FederationError> {
        config
            .validate()
            .map_err(|e| FederationError::Config(e.to_string()))?;

        let registry = Arc::new(ContainerRegistry::with_remotes(config.remotes.clone()));
        let scope = Arc::new(SharedScope::new());
        let events = Arc::new(EventManager::with_history_limit(config.event_history_limit));

        let loader = RemoteLoader::new(manifests, entries, Arc::clone(&scope), Arc::clone(&events))
            .with_validator(ManifestValidator::with_max_size(config.max_manifest_bytes))
            .with_fetch_timeout(config.fetch_timeout());
        let resolver = ModuleResolver::new(
            Arc::clone(&registry),
            loader.clone(),
            Arc::clone(&scope),
            Arc::clone(&events),
        )
        .with_max_depth(config.max_resolution_depth);

        let session_id = Uuid::new_v4();
        info!(
            "Federation session {} created with {} declared remotes",
            session_id,
            config.remotes.len()
        );

        Ok(Self {
            session_id,
            config,
            registry,
            scope,
            events,
            loader,
            resolver,
        })
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    pub fn config(&self) -> &FederationConfig {
        &self.config
    }

    /// Resolve `exposed_path` from `container_id` into a live module
    pub async fn resolve_module(
        &self,
        container_id: &str,
        exposed_path: &str,
    ) -> Result<Module, FederationError> {
        self.resolver.resolve_module(container_id, exposed_path).await
    }

    /// Register `container_id` at `entry_location` and load it
    ///
    /// Idempotent: concurrent and repeated calls share one fetch, and a
    /// failure is memoized on the handle until [`invalidate`](Self::invalidate).
    pub async fn register_or_get_container(
        &self,
        container_id: &str,
        entry_location: &str,
    ) -> Result<Arc<ContainerHandle>, FederationError> {
        let handle = self.registry.get_or_create(container_id, entry_location).await;
        self.loader.load_container(&handle).await?;
        Ok(handle)
    }

    /// Record a remote's location without loading it
    pub async fn declare_remote(&self, container_id: &str, entry_location: &str) {
        self.registry
            .declare_remote(container_id, entry_location)
            .await;
    }

    /// Drop a `Failed` container so the next request fetches again
    pub async fn invalidate(&self, container_id: &str) -> bool {
        self.registry.invalidate(container_id).await
    }

    pub fn shared_scope(&self) -> &Arc<SharedScope> {
        &self.scope
    }

    pub fn events(&self) -> &Arc<EventManager> {
        &self.events
    }

    pub fn registry(&self) -> &Arc<ContainerRegistry> {
        &self.registry
    }

    /// Receive diagnostic events published from now on
    pub async fn subscribe(&self) -> mpsc::UnboundedReceiver<FederationEvent> {
        self.events.subscribe().await
    }

    /// Load state of `container_id`, if it has a handle
    pub async fn container_state(&self, container_id: &str) -> Option<LoadState> {
        match self.registry.get(container_id).await {
            Some(handle) => Some(handle.state().await),
            None => None,
        }
    }
}

//! Container registry
//!
//! Owns one [`ContainerHandle`] per container id for the lifetime of a
//! session. Handles are created on first request and never removed, except
//! that a `Failed` handle may be replaced through [`ContainerRegistry::invalidate`].

pub mod manifest;

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::federation::scope::{LoaderThunk, Provider};
use crate::federation::traits::{ContainerEntry, FederationError, LoadState, SharedFactory};
use crate::utils::{with_lock, SingleFlight};

pub use manifest::{
    ExposesMap, Manifest, ManifestDocument, ManifestError, RemoteReference, SharedDeclaration,
    SharedDependencyRequirement,
};

/// A container whose entry has been instantiated and initialized
pub struct LoadedContainer {
    pub manifest: Arc<Manifest>,
    pub entry: Arc<dyn ContainerEntry>,
    /// Loader thunks registered by `init`, keyed by dependency name
    offers: HashMap<String, SharedFactory>,
    /// Provider negotiated for each shared dependency, decided once
    pub(crate) negotiated: Mutex<HashMap<String, Arc<Provider>>>,
}

impl LoadedContainer {
    pub(crate) fn new(
        manifest: Arc<Manifest>,
        entry: Arc<dyn ContainerEntry>,
        offers: HashMap<String, SharedFactory>,
    ) -> Self {
        Self {
            manifest,
            entry,
            offers,
            negotiated: Mutex::new(HashMap::new()),
        }
    }

    /// How this container provides `requirement`
    ///
    /// A `federatedFrom` declaration takes precedence over a local thunk.
    pub fn loader_for(&self, requirement: &SharedDependencyRequirement) -> Option<LoaderThunk> {
        if let Some(remote) = &requirement.federated_from {
            return Some(LoaderThunk::Remote(remote.clone()));
        }
        self.offers
            .get(&requirement.name)
            .cloned()
            .map(LoaderThunk::Local)
    }

    /// Whether `init` registered a thunk for `name`
    pub fn offers(&self, name: &str) -> bool {
        self.offers.contains_key(name)
    }
}

impl fmt::Debug for LoadedContainer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadedContainer")
            .field("container_id", &self.manifest.container_id)
            .field("offers", &self.offers.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[derive(Debug)]
struct HandleState {
    load_state: LoadState,
    manifest: Option<Arc<Manifest>>,
    error: Option<FederationError>,
}

/// Runtime handle for one container
pub struct ContainerHandle {
    container_id: String,
    entry_location: String,
    state: Mutex<HandleState>,
    pub(crate) load: SingleFlight<Arc<LoadedContainer>, FederationError>,
}

impl ContainerHandle {
    pub(crate) fn new(container_id: impl Into<String>, entry_location: impl Into<String>) -> Self {
        Self {
            container_id: container_id.into(),
            entry_location: entry_location.into(),
            state: Mutex::new(HandleState {
                load_state: LoadState::Unloaded,
                manifest: None,
                error: None,
            }),
            load: SingleFlight::new(),
        }
    }

    pub fn container_id(&self) -> &str {
        &self.container_id
    }

    /// Location the manifest is fetched from
    pub fn entry_location(&self) -> &str {
        &self.entry_location
    }

    pub async fn state(&self) -> LoadState {
        self.state.lock().await.load_state
    }

    /// Parsed manifest, once available
    pub async fn manifest(&self) -> Option<Arc<Manifest>> {
        self.state.lock().await.manifest.clone()
    }

    /// Captured failure cause when `Failed`
    pub async fn error(&self) -> Option<FederationError> {
        self.state.lock().await.error.clone()
    }

    pub(crate) async fn mark_loading(&self) {
        let mut state = self.state.lock().await;
        if state.load_state == LoadState::Unloaded {
            state.load_state = LoadState::Loading;
        }
    }

    pub(crate) async fn mark_manifest(&self, manifest: Arc<Manifest>) {
        self.state.lock().await.manifest = Some(manifest);
    }

    pub(crate) async fn mark_loaded(&self) {
        let mut state = self.state.lock().await;
        state.load_state = LoadState::Loaded;
        state.error = None;
    }

    pub(crate) async fn mark_failed(&self, error: FederationError) {
        let mut state = self.state.lock().await;
        state.load_state = LoadState::Failed;
        state.error = Some(error);
    }
}

impl fmt::Debug for ContainerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContainerHandle")
            .field("container_id", &self.container_id)
            .field("entry_location", &self.entry_location)
            .finish_non_exhaustive()
    }
}

/// Registry of container handles for one session
#[derive(Debug, Default)]
pub struct ContainerRegistry {
    handles: Mutex<HashMap<String, Arc<ContainerHandle>>>,
    /// Declared entry locations, keyed by container id
    remotes: Mutex<HashMap<String, String>>,
}

impl ContainerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with remotes declared up front
    pub fn with_remotes(remotes: HashMap<String, String>) -> Self {
        Self {
            handles: Mutex::new(HashMap::new()),
            remotes: Mutex::new(remotes),
        }
    }

    /// Record where `container_id` can be fetched without loading it
    ///
    /// The first declared location wins; returns the location in effect.
    pub async fn declare_remote(
        &self,
        container_id: impl Into<String>,
        entry_location: impl Into<String>,
    ) -> String {
        let container_id = container_id.into();
        let entry_location = entry_location.into();
        let mut remotes = self.remotes.lock().await;
        match remotes.get(&container_id) {
            Some(existing) => {
                if *existing != entry_location {
                    warn!(
                        "Container {} already declared at {}, ignoring {}",
                        container_id, existing, entry_location
                    );
                }
                existing.clone()
            }
            None => {
                debug!("Declared remote {} at {}", container_id, entry_location);
                remotes.insert(container_id, entry_location.clone());
                entry_location
            }
        }
    }

    /// Handle for `container_id`, created on first request
    ///
    /// Never fetches. A later call with a different location keeps the first
    /// location.
    pub async fn get_or_create(&self, container_id: &str, entry_location: &str) -> Arc<ContainerHandle> {
        let location = self.declare_remote(container_id, entry_location).await;

        let mut handles = self.handles.lock().await;
        if let Some(handle) = handles.get(container_id) {
            return Arc::clone(handle);
        }

        info!("Registering container {} at {}", container_id, location);
        let handle = Arc::new(ContainerHandle::new(container_id, location));
        handles.insert(container_id.to_string(), Arc::clone(&handle));
        handle
    }

    /// Handle for `container_id`, creating it from a declared remote if needed
    pub async fn handle_for(&self, container_id: &str) -> Result<Arc<ContainerHandle>, FederationError> {
        if let Some(handle) = self.get(container_id).await {
            return Ok(handle);
        }

        let location = with_lock(&self.remotes, |remotes| remotes.get(container_id).cloned())
            .await
            .ok_or_else(|| FederationError::UnknownContainer(container_id.to_string()))?;
        Ok(self.get_or_create(container_id, &location).await)
    }

    /// Existing handle, if any
    pub async fn get(&self, container_id: &str) -> Option<Arc<ContainerHandle>> {
        self.handles.lock().await.get(container_id).cloned()
    }

    /// Replace a `Failed` handle so the next request fetches again
    ///
    /// Returns false (and changes nothing) for handles that are not `Failed`.
    pub async fn invalidate(&self, container_id: &str) -> bool {
        let mut handles = self.handles.lock().await;
        let Some(handle) = handles.get(container_id).cloned() else {
            return false;
        };
        if handle.state().await != LoadState::Failed {
            debug!("Not invalidating {}: handle is not failed", container_id);
            return false;
        }

        info!("Invalidating failed container {}", container_id);
        handles.insert(
            container_id.to_string(),
            Arc::new(ContainerHandle::new(container_id, handle.entry_location())),
        );
        true
    }

    /// Ids of every container with a handle, sorted
    pub async fn container_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.handles.lock().await.keys().cloned().collect();
        ids.sort();
        ids
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_get_or_create_is_idempotent() {
        let registry = ContainerRegistry::new();
        let a = registry.get_or_create("catalog", "mem://catalog").await;
        let b = registry.get_or_create("catalog", "mem://elsewhere").await;

        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(b.entry_location(), "mem://catalog");
        assert_eq!(a.state().await, LoadState::Unloaded);
    }

    #[tokio::test]
    async fn test_handle_for_uses_declared_remote() {
        let registry = ContainerRegistry::new();
        assert!(matches!(
            registry.handle_for("cart").await,
            Err(FederationError::UnknownContainer(ref id)) if id == "cart"
        ));

        registry.declare_remote("cart", "mem://cart").await;
        let handle = registry.handle_for("cart").await.unwrap();
        assert_eq!(handle.entry_location(), "mem://cart");
        assert_eq!(registry.container_ids().await, vec!["cart".to_string()]);
    }

    #[tokio::test]
    async fn test_invalidate_only_replaces_failed() {
        let registry = ContainerRegistry::new();
        let handle = registry.get_or_create("catalog", "mem://catalog").await;
        assert!(!registry.invalidate("catalog").await);
        assert!(!registry.invalidate("missing").await);

        handle
            .mark_failed(FederationError::ManifestFetch {
                container_id: "catalog".to_string(),
                reason: "offline".to_string(),
            })
            .await;
        assert!(registry.invalidate("catalog").await);

        let fresh = registry.get("catalog").await.unwrap();
        assert!(!Arc::ptr_eq(&handle, &fresh));
        assert_eq!(fresh.state().await, LoadState::Unloaded);
        assert_eq!(handle.state().await, LoadState::Failed);
    }
}

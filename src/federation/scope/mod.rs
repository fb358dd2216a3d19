//! Shared scope
//!
//! Process-wide (per session) table of shared dependency providers. Entries
//! are created lazily and only ever grow: providers are appended in
//! registration order and never removed.

pub mod negotiator;

use semver::Version;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

use crate::federation::registry::manifest::{
    Manifest, RemoteReference, SharedDependencyRequirement,
};
use crate::federation::traits::{FederationError, Module, SharedFactory};
use crate::utils::{with_lock, SingleFlight};

pub use negotiator::{negotiate, Negotiation, ProviderDecision, VersionShadowingEvent};

/// How a provider's instance is produced
#[derive(Debug, Clone)]
pub enum LoaderThunk {
    /// Thunk registered by the providing container's `init`
    Local(SharedFactory),
    /// Module exposed by another container
    Remote(RemoteReference),
}

/// Identity of a provider within one shared scope
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ProviderKey {
    pub name: String,
    pub index: usize,
}

impl fmt::Display for ProviderKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.name, self.index)
    }
}

/// One registered provider of a shared dependency
pub struct Provider {
    name: String,
    version: Version,
    /// Position in the entry's registration order
    index: usize,
    registered_by: String,
    thunk: LoaderThunk,
    loaded: AtomicBool,
    load_attempts: AtomicUsize,
    instance: SingleFlight<Module, FederationError>,
}

impl Provider {
    pub(crate) fn new(
        name: impl Into<String>,
        version: Version,
        index: usize,
        registered_by: impl Into<String>,
        thunk: LoaderThunk,
    ) -> Self {
        Self {
            name: name.into(),
            version,
            index,
            registered_by: registered_by.into(),
            thunk,
            loaded: AtomicBool::new(false),
            load_attempts: AtomicUsize::new(0),
            instance: SingleFlight::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn version(&self) -> &Version {
        &self.version
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn key(&self) -> ProviderKey {
        ProviderKey {
            name: self.name.clone(),
            index: self.index,
        }
    }

    /// Container whose manifest registered this provider
    pub fn registered_by(&self) -> &str {
        &self.registered_by
    }

    pub fn thunk(&self) -> &LoaderThunk {
        &self.thunk
    }

    /// Whether the instance has been produced
    pub fn is_loaded(&self) -> bool {
        self.loaded.load(Ordering::Acquire)
    }

    /// Number of times the loader thunk has been started
    pub fn load_attempts(&self) -> usize {
        self.load_attempts.load(Ordering::Acquire)
    }

    /// Loaded instance, if any
    pub async fn instance(&self) -> Option<Module> {
        match self.instance.peek().await {
            Some(Ok(module)) => Some(module),
            _ => None,
        }
    }

    /// Produce the instance once, coalescing concurrent callers
    ///
    /// A failed load is handed to every waiter and then forgotten, so the
    /// provider returns to not-loaded and a later request may try again.
    pub async fn load_with<F, Fut>(&self, start: F) -> Result<Module, FederationError>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<Module, FederationError>> + Send + 'static,
    {
        let result = self
            .instance
            .run(|| {
                self.load_attempts.fetch_add(1, Ordering::AcqRel);
                start()
            })
            .await;

        match &result {
            Ok(_) => self.loaded.store(true, Ordering::Release),
            Err(e) => {
                if self.instance.clear_failure().await {
                    debug!(
                        "Provider {}@{} failed to load, slot reset: {}",
                        self.name, self.version, e
                    );
                }
            }
        }
        result
    }
}

impl fmt::Debug for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Provider")
            .field("name", &self.name)
            .field("version", &self.version.to_string())
            .field("index", &self.index)
            .field("registered_by", &self.registered_by)
            .field("loaded", &self.is_loaded())
            .finish()
    }
}

/// All providers registered under one dependency name
#[derive(Debug)]
pub struct ScopeEntry {
    name: String,
    providers: Vec<Arc<Provider>>,
    /// Provider locked as this name's single instance
    singleton: Option<Arc<Provider>>,
}

impl ScopeEntry {
    pub(crate) fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            providers: Vec::new(),
            singleton: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Providers in registration order
    pub fn providers(&self) -> &[Arc<Provider>] {
        &self.providers
    }

    pub fn singleton(&self) -> Option<&Arc<Provider>> {
        self.singleton.as_ref()
    }

    fn register(
        &mut self,
        requirement: &SharedDependencyRequirement,
        container_id: &str,
        thunk: LoaderThunk,
    ) -> Arc<Provider> {
        let provider = Arc::new(Provider::new(
            requirement.name.clone(),
            requirement.provided_version.clone(),
            self.providers.len(),
            container_id,
            thunk,
        ));
        self.providers.push(Arc::clone(&provider));
        provider
    }
}

/// Point-in-time view of one provider
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderSnapshot {
    pub version: Version,
    pub registered_by: String,
    pub loaded: bool,
    pub singleton: bool,
}

/// The shared scope of one federation session
#[derive(Debug, Default)]
pub struct SharedScope {
    entries: Mutex<HashMap<String, ScopeEntry>>,
}

impl SharedScope {
    pub fn new() -> Self {
        Self::default()
    }

    /// Negotiate `requirement` on behalf of `container_id`
    ///
    /// The decision and any registration happen under one lock acquisition,
    /// so concurrent requests for the same name never register twice.
    pub async fn negotiate(
        &self,
        requirement: &SharedDependencyRequirement,
        container_id: &str,
        thunk: LoaderThunk,
    ) -> Negotiation {
        with_lock(&self.entries, |entries| {
            negotiate(entries, requirement, container_id, thunk)
        })
        .await
    }

    /// Providers currently registered for `name`
    pub async fn snapshot(&self, name: &str) -> Vec<ProviderSnapshot> {
        with_lock(&self.entries, |entries| {
            entries
                .get(name)
                .map(|entry| {
                    entry
                        .providers
                        .iter()
                        .map(|p| ProviderSnapshot {
                            version: p.version.clone(),
                            registered_by: p.registered_by.clone(),
                            loaded: p.is_loaded(),
                            singleton: entry
                                .singleton
                                .as_ref()
                                .map_or(false, |locked| Arc::ptr_eq(locked, p)),
                        })
                        .collect()
                })
                .unwrap_or_default()
        })
        .await
    }

    /// Provider handles registered for `name`, in registration order
    pub async fn providers(&self, name: &str) -> Vec<Arc<Provider>> {
        with_lock(&self.entries, |entries| {
            entries
                .get(name)
                .map(|entry| entry.providers.clone())
                .unwrap_or_default()
        })
        .await
    }

    /// Locked singleton provider for `name`
    pub async fn singleton(&self, name: &str) -> Option<Arc<Provider>> {
        with_lock(&self.entries, |entries| {
            entries.get(name).and_then(|entry| entry.singleton.clone())
        })
        .await
    }

    /// Number of instances produced for `name` so far
    pub async fn loaded_instances(&self, name: &str) -> usize {
        with_lock(&self.entries, |entries| {
            entries
                .get(name)
                .map(|entry| entry.providers.iter().filter(|p| p.is_loaded()).count())
                .unwrap_or(0)
        })
        .await
    }

    /// Dependency names with at least one provider
    pub async fn names(&self) -> Vec<String> {
        with_lock(&self.entries, |entries| {
            let mut names: Vec<String> = entries.keys().cloned().collect();
            names.sort();
            names
        })
        .await
    }
}

/// Scope handle given to a container's `init`
///
/// Lets the container read current scope state and register loader thunks
/// for the shared dependencies its manifest declares.
pub struct SharedScopeView {
    container_id: String,
    declared: Vec<String>,
    scope: Arc<SharedScope>,
    offers: Mutex<HashMap<String, SharedFactory>>,
}

impl SharedScopeView {
    pub(crate) fn new(scope: Arc<SharedScope>, manifest: &Manifest) -> Self {
        Self {
            container_id: manifest.container_id.clone(),
            declared: manifest.shared.iter().map(|req| req.name.clone()).collect(),
            scope,
            offers: Mutex::new(HashMap::new()),
        }
    }

    /// Container being initialized
    pub fn container_id(&self) -> &str {
        &self.container_id
    }

    /// Shared dependency names this container declared
    pub fn declared(&self) -> &[String] {
        &self.declared
    }

    /// Register the loader thunk for declared dependency `name`
    pub async fn provide(
        &self,
        name: &str,
        factory: SharedFactory,
    ) -> Result<(), FederationError> {
        if !self.declared.iter().any(|declared| declared == name) {
            return Err(FederationError::ContainerLoad {
                container_id: self.container_id.clone(),
                reason: format!("init provided undeclared shared dependency {}", name),
            });
        }
        debug!(
            "Container {} provides loader for shared dependency {}",
            self.container_id, name
        );
        self.offers.lock().await.insert(name.to_string(), factory);
        Ok(())
    }

    /// Providers currently registered for `name`
    pub async fn providers(&self, name: &str) -> Vec<ProviderSnapshot> {
        self.scope.snapshot(name).await
    }

    /// Thunks registered during `init`
    pub(crate) fn into_offers(self) -> HashMap<String, SharedFactory> {
        self.offers.into_inner()
    }
}

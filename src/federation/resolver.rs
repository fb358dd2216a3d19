//! Exposed-module resolver
//!
//! Turns `(container_id, exposed_path)` into a live [`Module`]: loads the
//! container, negotiates and loads each of its shared dependencies, then
//! builds the exposed module from the container's factory.
//!
//! Shared dependencies provided through another container's exposes recurse
//! into that container. Recursion carries an explicit [`ResolutionChain`] of
//! the containers in progress; a container reappearing in its own chain is a
//! cycle and fails immediately, before any in-flight load is awaited.
//!
//! Provider loads are shared between requests, so a cycle can also close
//! across requests: each one waits on a provider load that another started.
//! The session-wide [`WaitGraph`] records which provider load each load task
//! is waiting on, and refuses a wait that would close a loop.

use futures::future::{BoxFuture, FutureExt};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

use crate::federation::events::{EventManager, FederationEvent};
use crate::federation::loader::RemoteLoader;
use crate::federation::registry::{ContainerRegistry, LoadedContainer, SharedDependencyRequirement};
use crate::federation::scope::{LoaderThunk, Provider, ProviderKey, SharedScope};
use crate::federation::traits::{FederationError, Module, SharedModules};

/// Default bound on nested container resolutions
pub const DEFAULT_MAX_RESOLUTION_DEPTH: usize = 32;

/// Containers currently being resolved by one request, outermost first
///
/// Inside a provider load task the chain also names the provider being
/// loaded, so waits made on its behalf can be checked against the session's
/// [`WaitGraph`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolutionChain {
    containers: Vec<String>,
    loading: Option<ProviderKey>,
}

impl ResolutionChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn root(&self) -> Option<&str> {
        self.containers.first().map(String::as_str)
    }

    pub fn contains(&self, container_id: &str) -> bool {
        self.containers.iter().any(|id| id == container_id)
    }

    /// This chain with `container_id` appended
    pub fn extended(&self, container_id: &str) -> Self {
        let mut containers = self.containers.clone();
        containers.push(container_id.to_string());
        Self {
            containers,
            loading: self.loading.clone(),
        }
    }

    /// This chain, continued inside the load task of `provider`
    pub fn loading(&self, provider: ProviderKey) -> Self {
        Self {
            containers: self.containers.clone(),
            loading: Some(provider),
        }
    }

    /// Provider whose load task runs this resolution
    pub fn loading_provider(&self) -> Option<&ProviderKey> {
        self.loading.as_ref()
    }

    pub fn depth(&self) -> usize {
        self.containers.len()
    }

    pub fn to_vec(&self) -> Vec<String> {
        self.containers.clone()
    }
}

#[derive(Debug, Clone)]
struct Wait {
    on: ProviderKey,
    /// Container the awaited provider resolves
    target: String,
}

/// Waits between in-flight provider loads of one session
///
/// Each load task awaits at most one other provider at a time, so the graph
/// is a set of waiter -> awaited edges.
#[derive(Debug, Default)]
pub struct WaitGraph {
    edges: Mutex<HashMap<ProviderKey, Wait>>,
}

impl WaitGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `waiter` is about to await `on`, which resolves `target`
    ///
    /// Fails with the container cycle when `on` already waits, directly or
    /// through other loads, on `waiter`.
    fn enter(
        self: &Arc<Self>,
        waiter: &ProviderKey,
        on: ProviderKey,
        target: &str,
        chain: &ResolutionChain,
    ) -> Result<WaitGuard, FederationError> {
        let mut edges = self.edges.lock().unwrap_or_else(|e| e.into_inner());

        let mut cycle = chain.extended(target).to_vec();
        let mut cursor = &on;
        let mut steps = 0;
        loop {
            if cursor == waiter {
                return Err(FederationError::SharedDependencyCycle { chain: cycle });
            }
            match edges.get(cursor) {
                Some(wait) if steps <= edges.len() => {
                    if &wait.on != waiter {
                        cycle.push(wait.target.clone());
                    }
                    cursor = &wait.on;
                    steps += 1;
                }
                _ => break,
            }
        }

        edges.insert(
            waiter.clone(),
            Wait {
                on,
                target: target.to_string(),
            },
        );
        Ok(WaitGuard {
            graph: Arc::clone(self),
            waiter: waiter.clone(),
        })
    }

    /// Number of load tasks currently waiting on another provider
    pub fn waiting(&self) -> usize {
        self.edges.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

/// Removes its wait edge when the awaited load settles or is dropped
struct WaitGuard {
    graph: Arc<WaitGraph>,
    waiter: ProviderKey,
}

impl Drop for WaitGuard {
    fn drop(&mut self) {
        self.graph
            .edges
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&self.waiter);
    }
}

/// Resolves exposed modules for one session
#[derive(Clone)]
pub struct ModuleResolver {
    registry: Arc<ContainerRegistry>,
    loader: RemoteLoader,
    scope: Arc<SharedScope>,
    events: Arc<EventManager>,
    waits: Arc<WaitGraph>,
    max_depth: usize,
}

impl ModuleResolver {
    pub fn new(
        registry: Arc<ContainerRegistry>,
        loader: RemoteLoader,
        scope: Arc<SharedScope>,
        events: Arc<EventManager>,
    ) -> Self {
        Self {
            registry,
            loader,
            scope,
            events,
            waits: Arc::new(WaitGraph::new()),
            max_depth: DEFAULT_MAX_RESOLUTION_DEPTH,
        }
    }

    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    /// Resolve `exposed_path` from `container_id`
    pub async fn resolve_module(
        &self,
        container_id: &str,
        exposed_path: &str,
    ) -> Result<Module, FederationError> {
        self.resolve_in_chain(
            container_id.to_string(),
            exposed_path.to_string(),
            ResolutionChain::new(),
        )
        .await
    }

    /// Resolve inside an ongoing request
    ///
    /// Boxed and `'static` so it can recurse and run as a provider load task.
    pub fn resolve_in_chain(
        &self,
        container_id: String,
        exposed_path: String,
        chain: ResolutionChain,
    ) -> BoxFuture<'static, Result<Module, FederationError>> {
        let resolver = self.clone();
        async move {
            if chain.contains(&container_id) {
                return Err(FederationError::SharedDependencyCycle {
                    chain: chain.extended(&container_id).to_vec(),
                });
            }
            if chain.depth() >= resolver.max_depth {
                return Err(FederationError::ResolutionDepthExceeded {
                    depth: resolver.max_depth,
                });
            }
            let chain = chain.extended(&container_id);
            debug!("Resolving {} from {} (depth {})", exposed_path, container_id, chain.depth());

            let handle = resolver.registry.handle_for(&container_id).await?;
            let loaded = resolver.loader.load_container(&handle).await?;

            if !loaded.manifest.exposes(&exposed_path) {
                return Err(FederationError::UnknownExposedPath {
                    container_id,
                    exposed_path,
                });
            }

            let shared = resolver.resolve_shared(&loaded, &chain).await?;
            resolver.instantiate(&loaded, &exposed_path, &shared).await
        }
        .boxed()
    }

    /// Negotiate and load every shared dependency `loaded` declares
    async fn resolve_shared(
        &self,
        loaded: &LoadedContainer,
        chain: &ResolutionChain,
    ) -> Result<SharedModules, FederationError> {
        let mut shared = SharedModules::new();
        for requirement in &loaded.manifest.shared {
            let provider = self.provider_for(loaded, requirement).await?;
            let module = self.load_provider(&provider, chain).await?;
            shared.insert(requirement.name.clone(), module);
        }
        Ok(shared)
    }

    /// Provider chosen for `requirement`, negotiated on first use
    async fn provider_for(
        &self,
        loaded: &LoadedContainer,
        requirement: &SharedDependencyRequirement,
    ) -> Result<Arc<Provider>, FederationError> {
        let container_id = loaded.manifest.container_id.as_str();
        let mut negotiated = loaded.negotiated.lock().await;
        if let Some(provider) = negotiated.get(&requirement.name) {
            return Ok(Arc::clone(provider));
        }

        let thunk = loaded
            .loader_for(requirement)
            .ok_or_else(|| FederationError::ContainerLoad {
                container_id: container_id.to_string(),
                reason: format!("no loader for shared dependency {}", requirement.name),
            })?;
        let outcome = self.scope.negotiate(requirement, container_id, thunk).await;

        if let Some(shadowing) = outcome.shadowing {
            self.events
                .publish(FederationEvent::VersionShadowing(shadowing))
                .await;
        }
        let provider = Arc::clone(outcome.decision.provider());
        if outcome.decision.is_new() {
            self.events
                .publish(FederationEvent::ProviderRegistered {
                    name: provider.name().to_string(),
                    version: provider.version().clone(),
                    registered_by: container_id.to_string(),
                    singleton: requirement.singleton,
                })
                .await;
        }

        negotiated.insert(requirement.name.clone(), Arc::clone(&provider));
        Ok(provider)
    }

    /// Instance of `provider`, loading it on first use
    async fn load_provider(
        &self,
        provider: &Arc<Provider>,
        chain: &ResolutionChain,
    ) -> Result<Module, FederationError> {
        if let Some(module) = provider.instance().await {
            return Ok(module);
        }

        let name = provider.name().to_string();
        let version = provider.version().clone();
        let events = Arc::clone(&self.events);

        let result = match provider.thunk().clone() {
            LoaderThunk::Local(factory) => {
                provider
                    .load_with(move || async move {
                        let module = factory.load().await.map_err(|reason| {
                            FederationError::SharedDependencyLoad {
                                name: name.clone(),
                                version: version.to_string(),
                                reason,
                            }
                        })?;
                        events
                            .publish(FederationEvent::ProviderLoaded { name, version })
                            .await;
                        Ok(module)
                    })
                    .await
            }
            LoaderThunk::Remote(remote) => {
                if chain.contains(&remote.container_id) {
                    return Err(FederationError::SharedDependencyCycle {
                        chain: chain.extended(&remote.container_id).to_vec(),
                    });
                }
                let _wait = match chain.loading_provider() {
                    Some(waiter) => Some(self.waits.enter(
                        waiter,
                        provider.key(),
                        &remote.container_id,
                        chain,
                    )?),
                    None => None,
                };
                let resolution = self.resolve_in_chain(
                    remote.container_id.clone(),
                    remote.exposed_path.clone(),
                    chain.loading(provider.key()),
                );
                provider
                    .load_with(move || async move {
                        let module = resolution.await?;
                        events
                            .publish(FederationEvent::ProviderLoaded { name, version })
                            .await;
                        Ok(module)
                    })
                    .await
            }
        };

        if let Err(e) = &result {
            warn!(
                "Shared dependency {}@{} unavailable: {}",
                provider.name(),
                provider.version(),
                e
            );
        }
        result
    }

    /// Build `exposed_path` from the container's factory
    async fn instantiate(
        &self,
        loaded: &LoadedContainer,
        exposed_path: &str,
        shared: &SharedModules,
    ) -> Result<Module, FederationError> {
        let container_id = &loaded.manifest.container_id;
        let factory = loaded.entry.get(exposed_path).await.map_err(|reason| {
            debug!("{} rejected get({}): {}", container_id, exposed_path, reason);
            FederationError::UnknownExposedPath {
                container_id: container_id.clone(),
                exposed_path: exposed_path.to_string(),
            }
        })?;

        factory
            .create(shared)
            .map_err(|reason| FederationError::ModuleInstantiation {
                container_id: container_id.clone(),
                exposed_path: exposed_path.to_string(),
                reason,
            })
    }
}

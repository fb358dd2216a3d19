//! Container protocol traits and core types
//!
//! Defines the capability interface every federated container implements,
//! the module values that flow between containers, and the runtime's error
//! taxonomy.

use async_trait::async_trait;
use futures::future::{BoxFuture, FutureExt};
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use thiserror::Error;

use crate::federation::scope::SharedScopeView;
use crate::federation::versioning::SemverError;

/// Container load state
///
/// Transitions strictly forward: `Unloaded -> Loading -> {Loaded | Failed}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LoadState {
    /// Handle exists but nothing has been fetched yet
    Unloaded,
    /// Manifest/entry fetch in flight
    Loading,
    /// Manifest parsed, entry instantiated, `init` completed
    Loaded,
    /// Fetch, parse, or instantiation failed (memoized)
    Failed,
}

impl fmt::Display for LoadState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LoadState::Unloaded => "unloaded",
            LoadState::Loading => "loading",
            LoadState::Loaded => "loaded",
            LoadState::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// A loaded, executable module
///
/// Cloning is cheap and preserves identity: two clones of the same instance
/// compare equal under [`Module::ptr_eq`].
#[derive(Clone)]
pub struct Module {
    id: String,
    value: Arc<dyn Any + Send + Sync>,
}

impl Module {
    /// Wrap a value as a module
    pub fn new<T: Any + Send + Sync>(id: impl Into<String>, value: T) -> Self {
        Self {
            id: id.into(),
            value: Arc::new(value),
        }
    }

    /// Wrap an already shared value as a module
    pub fn from_arc(id: impl Into<String>, value: Arc<dyn Any + Send + Sync>) -> Self {
        Self {
            id: id.into(),
            value,
        }
    }

    /// Module identifier (diagnostic only)
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Borrow the module value as a concrete type
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.value.downcast_ref::<T>()
    }

    /// Whether both handles point at the same instance
    pub fn ptr_eq(&self, other: &Module) -> bool {
        Arc::ptr_eq(&self.value, &other.value)
    }
}

impl fmt::Debug for Module {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Module").field("id", &self.id).finish_non_exhaustive()
    }
}

/// Shared dependency instances resolved for one container request
#[derive(Debug, Clone, Default)]
pub struct SharedModules {
    modules: HashMap<String, Module>,
}

impl SharedModules {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, module: Module) {
        self.modules.insert(name.into(), module);
    }

    /// Instance negotiated for dependency `name`
    pub fn get(&self, name: &str) -> Option<&Module> {
        self.modules.get(name)
    }

    pub fn len(&self) -> usize {
        self.modules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }
}

type CreateFn = dyn Fn(&SharedModules) -> Result<Module, String> + Send + Sync;

/// Callable reference returned by a container's `get`
///
/// The factory receives the shared dependency instances negotiated for the
/// owning container and builds the exposed module from them.
#[derive(Clone)]
pub struct ModuleFactory {
    create: Arc<CreateFn>,
}

impl ModuleFactory {
    pub fn new<F>(create: F) -> Self
    where
        F: Fn(&SharedModules) -> Result<Module, String> + Send + Sync + 'static,
    {
        Self {
            create: Arc::new(create),
        }
    }

    /// Factory that always hands out the same instance
    pub fn ready(module: Module) -> Self {
        Self::new(move |_| Ok(module.clone()))
    }

    /// Build the module
    pub fn create(&self, shared: &SharedModules) -> Result<Module, String> {
        (self.create)(shared)
    }
}

impl fmt::Debug for ModuleFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ModuleFactory")
    }
}

type LoadFn = dyn Fn() -> BoxFuture<'static, Result<Module, String>> + Send + Sync;

/// Loader thunk for a locally provided shared dependency
///
/// Invoked at most once per registered provider; the runtime caches the
/// resulting instance in the shared scope.
#[derive(Clone)]
pub struct SharedFactory {
    load: Arc<LoadFn>,
}

impl SharedFactory {
    pub fn new<F, Fut>(load: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Module, String>> + Send + 'static,
    {
        Self {
            load: Arc::new(move || load().boxed()),
        }
    }

    /// Thunk that resolves immediately to `module`
    pub fn ready(module: Module) -> Self {
        Self::new(move || {
            let module = module.clone();
            async move { Ok(module) }
        })
    }

    /// Run the thunk
    pub fn load(&self) -> BoxFuture<'static, Result<Module, String>> {
        (self.load)()
    }
}

impl fmt::Debug for SharedFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SharedFactory")
    }
}

/// Container entry protocol
///
/// Implemented by every loaded entry artifact. The runtime depends only on
/// this interface, never on a concrete container.
#[async_trait]
pub trait ContainerEntry: Send + Sync {
    /// Called exactly once after load, before any `get`
    ///
    /// The container registers loader thunks for its manifest's `shared`
    /// declarations through `scope`.
    async fn init(&self, scope: &SharedScopeView) -> Result<(), String>;

    /// Return a factory for `exposed_path`
    ///
    /// Rejects when the path is not declared by this container.
    async fn get(&self, exposed_path: &str) -> Result<ModuleFactory, String>;
}

/// Federation runtime errors
///
/// `Clone` so a single in-flight load can hand the same failure to every
/// waiter.
#[derive(Debug, Clone, Error)]
pub enum FederationError {
    #[error("Failed to fetch manifest for container {container_id}: {reason}")]
    ManifestFetch { container_id: String, reason: String },

    #[error("Failed to load container {container_id}: {reason}")]
    ContainerLoad { container_id: String, reason: String },

    #[error("Container {container_id} does not expose {exposed_path}")]
    UnknownExposedPath {
        container_id: String,
        exposed_path: String,
    },

    #[error("Shared dependency cycle detected: {}", .chain.join(" -> "))]
    SharedDependencyCycle { chain: Vec<String> },

    #[error("Unknown container: {0} (no entry location registered)")]
    UnknownContainer(String),

    #[error("Failed to load shared dependency {name}@{version}: {reason}")]
    SharedDependencyLoad {
        name: String,
        version: String,
        reason: String,
    },

    #[error("Failed to instantiate {exposed_path} from container {container_id}: {reason}")]
    ModuleInstantiation {
        container_id: String,
        exposed_path: String,
        reason: String,
    },

    #[error("Resolution depth limit exceeded ({depth})")]
    ResolutionDepthExceeded { depth: usize },

    #[error("Semver error: {0}")]
    Semver(#[from] SemverError),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Background load task failed: {0}")]
    TaskFailed(String),
}

impl FederationError {
    /// Whether this error is memoized on the container handle
    pub fn is_container_failure(&self) -> bool {
        matches!(
            self,
            FederationError::ManifestFetch { .. } | FederationError::ContainerLoad { .. }
        )
    }
}

impl From<tokio::task::JoinError> for FederationError {
    fn from(e: tokio::task::JoinError) -> Self {
        FederationError::TaskFailed(e.to_string())
    }
}

//! Federated module runtime
//!
//! Independently deployed containers expose modules to each other at run
//! time and share a negotiated set of common dependencies.
//!
//! A request flows resolver -> registry -> loader -> shared scope -> container
//! entry; see [`session::FederationSession`] for the consumer-facing API.

pub mod events;
pub mod loader;
pub mod registry;
pub mod resolver;
pub mod scope;
pub mod session;
pub mod traits;
pub mod transport;
pub mod validation;
pub mod versioning;

pub use events::{EventManager, FederationEvent};
pub use loader::RemoteLoader;
pub use registry::{ContainerHandle, ContainerRegistry, LoadedContainer, Manifest, ManifestDocument};
pub use resolver::{ModuleResolver, ResolutionChain};
pub use scope::{
    LoaderThunk, Provider, ProviderDecision, ProviderKey, ProviderSnapshot, ScopeEntry, SharedScope,
    SharedScopeView, VersionShadowingEvent,
};
pub use session::FederationSession;
pub use traits::{
    ContainerEntry, FederationError, LoadState, Module, ModuleFactory, SharedFactory, SharedModules,
};
pub use versioning::{SemverError, VersionRange};

//! Federation Runtime - run-time module federation for independently deployed containers
//!
//! Containers publish a manifest describing the modules they expose and the
//! shared dependencies they need. At run time this crate:
//!
//! 1. fetches and validates manifests, loading each container at most once
//! 2. negotiates shared dependency versions across containers, honoring
//!    singleton locks
//! 3. resolves exposed modules, recursing through federated providers with
//!    cycle detection
//! 4. isolates failures to the container that caused them
//!
//! ## Design Principles
//!
//! 1. **Explicit sessions**: no process globals; every registry and scope lives
//!    in a [`FederationSession`]
//! 2. **Transport agnostic**: manifests and entries come through the
//!    [`ManifestSource`] and [`EntryLoader`] seams
//! 3. **Single flight**: concurrent requests share one fetch and one load

pub mod config;
pub mod federation;
pub mod utils;

pub use config::{ConfigError, FederationConfig, LoggingConfig};
pub use federation::transport::{EntryLoader, FetchError, ManifestSource};
pub use federation::{
    ContainerEntry, FederationError, FederationEvent, FederationSession, LoadState, Module,
    ModuleFactory, SharedFactory, SharedModules, VersionRange,
};

//! Remote container loading
//!
//! Drives container handles through `Unloaded -> Loading -> {Loaded | Failed}`.

pub mod loader;

pub use loader::RemoteLoader;

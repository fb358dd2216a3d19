//! Manifest validation framework
//!
//! Structural checks applied to every manifest document before the runtime
//! trusts it.

pub mod manifest_validator;

pub use manifest_validator::{ManifestValidator, ValidationResult, DEFAULT_MAX_MANIFEST_BYTES};

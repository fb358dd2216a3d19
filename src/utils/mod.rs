//! Shared runtime utilities

pub mod env;
pub mod lock;
pub mod logging;
pub mod single_flight;
pub mod timeout;

pub use env::{env_bool, env_int, env_opt};
pub use lock::with_lock;
pub use logging::{init_logging, init_logging_from_config};
#[cfg(feature = "json-logging")]
pub use logging::init_json_logging;
pub use single_flight::SingleFlight;
pub use timeout::{with_custom_timeout, with_timeout_opt};

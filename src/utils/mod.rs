//! Shared utilities: logging setup, error helpers, shutdown signals

pub mod error;
pub mod logging;
pub mod signal;

pub use error::{log_error, with_fallback};
#[cfg(feature = "json-logging")]
pub use logging::init_json_logging;
pub use logging::{init_logging, init_logging_from_config, init_module_logging};
pub use signal::{wait_for_shutdown_signal, ShutdownSignal};

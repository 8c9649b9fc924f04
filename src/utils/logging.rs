//! Logging initialization for the companion daemon and for modules
//!
//! - `RUST_LOG` always takes precedence
//! - Otherwise the filter from config (or the caller) is used
//! - Otherwise a per-binary default
//!
//! # Usage
//!
//! ## Daemon
//! ```rust
//! use zygisk_module::utils::init_logging;
//!
//! init_logging(None); // Uses RUST_LOG or defaults to "info"
//! ```
//!
//! ## Module
//! ```rust
//! use zygisk_module::utils::init_module_logging;
//!
//! init_module_logging("my_module", None);
//! ```

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::LoggingConfig;

fn resolve_filter(filter: Option<&str>, default: &str) -> EnvFilter {
    if std::env::var("RUST_LOG").is_ok() {
        return EnvFilter::from_default_env();
    }
    EnvFilter::new(filter.unwrap_or(default))
}

/// Initialize logging for the companion daemon
///
/// # Arguments
/// * `filter` - Optional log filter from config (e.g. "info",
///   "zygisk_module::module::ipc=debug"). Ignored when `RUST_LOG` is set.
pub fn init_logging(filter: Option<&str>) {
    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_target(true)
                .with_thread_ids(false)
                .with_ansi(std::env::var("NO_COLOR").is_err()),
        )
        .with(resolve_filter(filter, "info"))
        .init();
}

/// Initialize logging inside a specializing process
///
/// Several modules can live in the same process, so only the first call
/// installs a subscriber; later calls are no-ops.
///
/// Default filter: `{module_name}=info,zygisk_module=warn`.
pub fn init_module_logging(module_name: &str, filter: Option<&str>) {
    let default_filter = format!("{}=info,zygisk_module=warn", module_name);
    let _ = tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_target(true)
                .with_thread_ids(false)
                .with_ansi(false),
        )
        .with(resolve_filter(filter, &default_filter))
        .try_init();
}

/// Initialize logging with JSON output
#[cfg(feature = "json-logging")]
pub fn init_json_logging(filter: Option<&str>) {
    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .json()
                .with_target(true)
                .with_current_span(true)
                .with_span_list(true),
        )
        .with(resolve_filter(filter, "info"))
        .init();
}

/// Initialize logging from the daemon's [`LoggingConfig`]
///
/// Falls back to plain output when JSON is requested but the
/// `json-logging` feature is disabled.
pub fn init_logging_from_config(config: Option<&LoggingConfig>) {
    let filter = config.and_then(|c| c.filter.as_deref());

    if config.map(|c| c.json_format).unwrap_or(false) {
        #[cfg(feature = "json-logging")]
        {
            init_json_logging(filter);
        }
        #[cfg(not(feature = "json-logging"))]
        {
            init_logging(filter);
        }
    } else {
        init_logging(filter);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn test_rust_log_takes_precedence() {
        std::env::set_var("RUST_LOG", "trace");
        let filter = resolve_filter(Some("warn"), "info");
        std::env::remove_var("RUST_LOG");
        assert_eq!(filter.to_string(), "trace");
    }

    #[test]
    #[serial]
    fn test_config_filter_then_default() {
        std::env::remove_var("RUST_LOG");
        assert_eq!(resolve_filter(Some("debug"), "info").to_string(), "debug");
        assert_eq!(resolve_filter(None, "info").to_string(), "info");
    }

    #[test]
    #[serial]
    fn test_module_logging_can_be_called_twice() {
        init_module_logging("first", Some("off"));
        init_module_logging("second", Some("off"));
    }
}

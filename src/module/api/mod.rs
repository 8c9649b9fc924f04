//! Module API
//!
//! What a loaded module can ask of its host: companion connections,
//! options, process flags and hooks.

pub mod handle;

pub use handle::Api;

//! Module registry and discovery
//!
//! Finds installed modules on disk and parses their metadata.

pub mod discovery;
pub mod manifest;

pub use discovery::{DiscoveredModule, ModuleDiscovery};
pub use manifest::ModuleProp;

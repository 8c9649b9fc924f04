//! Module loading
//!
//! Maps module libraries and resolves their exported entry points.

pub mod loader;

pub use loader::{LibraryCompanion, ModuleLibrary, ModuleLoader};

//! Module system
//!
//! Both halves of the module boundary live here:
//!
//! - **Module side**: [`Module`], [`Api`], the entry-point macros and the
//!   companion handler entry.
//! - **Host side**: [`LifecycleDispatcher`], [`CompanionConnector`], and
//!   the companion daemon ([`CompanionServer`], [`ModuleLoader`],
//!   [`ModuleDiscovery`]).
//!
//! The only things shared across the binary boundary are the
//! `#[repr(C)]` types in [`abi`].

pub mod abi;
pub mod api;
pub mod dispatcher;
pub mod entry;
pub mod hooks;
pub mod ipc;
pub mod loader;
pub mod registry;
pub mod traits;

pub use abi::{ModuleOption, StateFlags, API_VERSION};
pub use api::Api;
pub use dispatcher::{LifecycleDispatcher, RequestedOptions};
pub use hooks::NativeMethodHook;
pub use ipc::{
    AbiClass, CompanionChannel, CompanionConnector, CompanionHandler, CompanionRegistry,
    CompanionServer,
};
pub use loader::{ModuleLibrary, ModuleLoader};
pub use registry::{DiscoveredModule, ModuleDiscovery, ModuleProp};
pub use traits::{LifecycleState, LifecycleTracker, Module, ModuleError, SpecializeKind};

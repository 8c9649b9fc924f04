//! Zygisk module interface
//!
//! A stable binary interface between a process-specialization host and
//! dynamically loaded plugin modules:
//!
//! - **Interface table** ([`module::abi`]): the append-only function table
//!   the host hands to each module, and the descriptor a module registers
//!   back.
//! - **Lifecycle** ([`module::Module`], [`module::dispatcher`]): callbacks
//!   before and after an app or system-server process drops privileges.
//! - **Companion channel** ([`module::ipc`]): a byte stream from the
//!   sandboxed process to a root daemon running the module's handler.
//! - **Hooking facade** ([`module::hooks`], [`module::Api`]): typed access
//!   to the host's JNI method and PLT hook primitives.
//!
//! A module crate builds as a `cdylib`, implements [`module::Module`], and
//! exports its entry points with [`register_module!`] and
//! [`register_companion!`].

pub mod config;
pub mod module;
pub mod utils;

pub use config::{CompanionConfig, LoggingConfig};

//! Module system traits and interfaces
//!
//! Defines the trait a module implements, the lifecycle states a
//! specializing process moves through, and the error type shared by the
//! module side, the host side and the companion daemon.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::module::abi::{AppSpecializeArgs, JNIEnv, ServerSpecializeArgs};
use crate::module::api::Api;

/// Which kind of process the host is specializing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SpecializeKind {
    /// A regular application process
    App,
    /// The privileged system server process
    Server,
}

/// Lifecycle state of a module inside one specializing process
///
/// The only legal path is `Loaded -> PreSpecialize(k) -> PostSpecialize(k)`,
/// optionally followed by `Unloaded`. There is no way back, and the kind
/// chosen at pre-specialize is fixed for the rest of the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LifecycleState {
    /// Module code is mapped and `on_load` has run (or is running)
    Loaded,
    /// Running before the host drops privileges
    PreSpecialize(SpecializeKind),
    /// Running with the final privileges of the specialized process
    PostSpecialize(SpecializeKind),
    /// Module library has been unmapped by the host
    Unloaded,
}

impl LifecycleState {
    /// Check whether `next` is a legal successor of `self`
    pub fn can_advance_to(self, next: LifecycleState) -> bool {
        use LifecycleState::*;
        match (self, next) {
            (Loaded, PreSpecialize(_)) => true,
            (PreSpecialize(a), PostSpecialize(b)) => a == b,
            (PostSpecialize(_), Unloaded) => true,
            _ => false,
        }
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LifecycleState::Loaded => write!(f, "loaded"),
            LifecycleState::PreSpecialize(kind) => write!(f, "pre-specialize({:?})", kind),
            LifecycleState::PostSpecialize(kind) => write!(f, "post-specialize({:?})", kind),
            LifecycleState::Unloaded => write!(f, "unloaded"),
        }
    }
}

/// Current lifecycle state plus enforcement of legal transitions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LifecycleTracker {
    state: LifecycleState,
}

impl LifecycleTracker {
    pub fn new() -> Self {
        Self {
            state: LifecycleState::Loaded,
        }
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    /// Move to `next`, or report the illegal transition and stay put
    pub fn advance(&mut self, next: LifecycleState) -> Result<(), ModuleError> {
        if !self.state.can_advance_to(next) {
            return Err(ModuleError::LifecycleViolation {
                from: self.state,
                to: next,
            });
        }
        self.state = next;
        Ok(())
    }
}

impl Default for LifecycleTracker {
    fn default() -> Self {
        Self::new()
    }
}

/// Module trait that all modules must implement
///
/// Every method has a no-op default, so a module only overrides the
/// callbacks it cares about. The host invokes them strictly in sequence
/// on one thread: `on_load`, then either the app pair or the server pair.
///
/// A panic inside any callback aborts the specializing process; there is
/// no isolation between the module and the process it lives in.
pub trait Module {
    /// Called right after the module is mapped into the forked process
    ///
    /// Store `api` for later use. No sandboxing has been applied yet.
    fn on_load(&mut self, api: Api, env: *mut JNIEnv) {
        let _ = (api, env);
    }

    /// Called before the host specializes an app process
    ///
    /// The process still runs with the forking host's privileges. Writes
    /// to `args` change how the process will be specialized. This is the
    /// last point where [`Api::connect_companion`] is expected to work.
    fn pre_app_specialize(&mut self, args: &mut AppSpecializeArgs) {
        let _ = args;
    }

    /// Called after the app process is specialized
    ///
    /// Runs with the app's own privileges inside its sandbox.
    fn post_app_specialize(&mut self, args: &AppSpecializeArgs) {
        let _ = args;
    }

    /// Called before the host specializes the system server
    fn pre_server_specialize(&mut self, args: &mut ServerSpecializeArgs) {
        let _ = args;
    }

    /// Called after the system server is specialized
    fn post_server_specialize(&mut self, args: &ServerSpecializeArgs) {
        let _ = args;
    }
}

/// Module system errors
#[derive(Debug, Error)]
pub enum ModuleError {
    #[error("Host rejected module registration")]
    RegistrationRejected,

    #[error("Module API version {module} is not supported by host (supports {min}..={max})")]
    IncompatibleVersion { module: i64, min: i64, max: i64 },

    #[error("Host interface table does not provide {0}")]
    TableUnavailable(&'static str),

    #[error("Companion connection unavailable: {0}")]
    CompanionUnavailable(String),

    #[error("Companion daemon rejected request for module index {0}")]
    CompanionRejected(i32),

    #[error("PLT hook commit failed")]
    HookCommitFailed,

    #[error("Invalid library pattern: {0}")]
    InvalidPattern(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Lifecycle violation: cannot move from {from} to {to}")]
    LifecycleViolation {
        from: LifecycleState,
        to: LifecycleState,
    },

    #[error("IPC communication error: {0}")]
    IpcError(String),

    #[error("Module library error: {0}")]
    LibraryError(String),

    #[error("Invalid module manifest: {0}")]
    InvalidManifest(String),

    #[error("Module not found: {0}")]
    ModuleNotFound(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl From<toml::de::Error> for ModuleError {
    fn from(e: toml::de::Error) -> Self {
        ModuleError::Config(e.to_string())
    }
}

impl From<std::ffi::NulError> for ModuleError {
    fn from(e: std::ffi::NulError) -> Self {
        ModuleError::InvalidArgument(e.to_string())
    }
}

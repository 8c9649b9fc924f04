//! Module options and process state flags

use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use std::ffi::c_int;

/// Behavioral toggles a module can set through `Api::set_option`
///
/// One value per call. Options are write-only and process-wide.
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ModuleOption {
    /// Force the denylist unmount routines to run on this process
    ///
    /// Only meaningful in pre-app-specialize. Every overlay contributed
    /// by the root solution and its modules is unmounted from the
    /// process's mount namespace during specialization, whatever the
    /// denylist says.
    ForceDenylistUnmount = 0,

    /// Unmap this module's library after post-specialize returns
    ///
    /// All module code disappears from the process. Must not be set
    /// once any hook is installed: the hook would then jump into
    /// unmapped memory.
    DlcloseModuleLibrary = 1,
}

impl ModuleOption {
    /// Decode the raw value a host receives through the table
    pub fn from_raw(raw: c_int) -> Option<Self> {
        match raw {
            0 => Some(ModuleOption::ForceDenylistUnmount),
            1 => Some(ModuleOption::DlcloseModuleLibrary),
            _ => None,
        }
    }

    pub fn as_raw(self) -> c_int {
        self as c_int
    }
}

bitflags! {
    /// Process state reported by `Api::get_flags`
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct StateFlags: u32 {
        /// The user granted root access to this process
        const PROCESS_GRANTED_ROOT = 1 << 0;
        /// This process is on the denylist
        const PROCESS_ON_DENYLIST = 1 << 1;
    }
}

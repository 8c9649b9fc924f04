//! Hooking facade
//!
//! Thin typed layer over the host's JNI-method and PLT hook primitives.
//! The hooking engine itself belongs to the host.

pub mod jni;
pub mod plt;

use std::cell::Cell;

pub use jni::{JniNativeMethod, NativeMethodHook};
pub use plt::{PltExclusion, PltHook, PltHookSet};

/// Count of hooks this module has live in the process
///
/// Used to flag a self-unload request while hooks are outstanding.
#[derive(Debug, Default)]
pub struct HookLedger {
    jni: Cell<usize>,
    plt: Cell<usize>,
}

impl HookLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_jni(&self, count: usize) {
        self.jni.set(self.jni.get() + count);
    }

    pub fn record_plt(&self, count: usize) {
        self.plt.set(self.plt.get() + count);
    }

    pub fn jni_hooks(&self) -> usize {
        self.jni.get()
    }

    pub fn plt_hooks(&self) -> usize {
        self.plt.get()
    }

    pub fn outstanding(&self) -> usize {
        self.jni.get() + self.plt.get()
    }
}

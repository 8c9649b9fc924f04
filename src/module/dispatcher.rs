//! Host-side lifecycle dispatch
//!
//! A host written in Rust keeps one [`LifecycleDispatcher`] per
//! registered module. It drives the callbacks in their only legal order,
//! wraps the host's own specialization step, and unmaps the module
//! library afterwards when the module asked for it.

use std::cell::Cell;
use std::ffi::{c_int, c_long};
use std::ptr::NonNull;
use std::rc::Rc;
use tracing::{debug, info};

use crate::module::abi::{
    accepts_api_version, AppSpecializeArgs, ModuleAbi, ModuleOption, ServerSpecializeArgs,
    API_VERSION, MIN_API_VERSION,
};
use crate::module::loader::ModuleLibrary;
use crate::module::traits::{LifecycleState, LifecycleTracker, ModuleError, SpecializeKind};

/// Options a module has set, shared between the host's `set_option`
/// entry and the dispatcher
#[derive(Debug, Clone, Default)]
pub struct RequestedOptions {
    bits: Rc<Cell<u32>>,
}

impl RequestedOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, option: ModuleOption) {
        self.bits.set(self.bits.get() | (1 << option.as_raw()));
    }

    /// Record a raw value received through the table; unknown values are ignored
    pub fn set_raw(&self, raw: c_int) -> bool {
        match ModuleOption::from_raw(raw) {
            Some(option) => {
                self.set(option);
                true
            }
            None => {
                debug!("Ignoring unknown module option {}", raw);
                false
            }
        }
    }

    pub fn is_set(&self, option: ModuleOption) -> bool {
        self.bits.get() & (1 << option.as_raw()) != 0
    }
}

/// Drives one registered module through a specialization
pub struct LifecycleDispatcher {
    descriptor: NonNull<ModuleAbi>,
    api_version: c_long,
    options: RequestedOptions,
    tracker: LifecycleTracker,
    library: Option<ModuleLibrary>,
}

impl LifecycleDispatcher {
    /// Wrap a descriptor the module passed to `register_module`
    ///
    /// # Safety
    ///
    /// `descriptor` must stay valid until the dispatcher is dropped or
    /// the module is unloaded, whichever comes first.
    pub unsafe fn new(
        descriptor: NonNull<ModuleAbi>,
        options: RequestedOptions,
    ) -> Result<Self, ModuleError> {
        let version = descriptor.as_ref().api_version;
        if !accepts_api_version(version) {
            return Err(ModuleError::IncompatibleVersion {
                module: version as i64,
                min: MIN_API_VERSION as i64,
                max: API_VERSION as i64,
            });
        }
        Ok(Self {
            descriptor,
            api_version: version,
            options,
            tracker: LifecycleTracker::new(),
            library: None,
        })
    }

    /// Hand over the library the module came from, to unload on request
    pub fn with_library(mut self, library: ModuleLibrary) -> Self {
        self.library = Some(library);
        self
    }

    /// The library still held for this module, if any
    pub fn library(&self) -> Option<&ModuleLibrary> {
        self.library.as_ref()
    }

    pub fn state(&self) -> LifecycleState {
        self.tracker.state()
    }

    pub fn api_version(&self) -> c_long {
        self.api_version
    }

    fn descriptor(&self) -> &ModuleAbi {
        // SAFETY: every caller checked the tracker first, and the tracker
        // refuses every transition after `Unloaded`.
        unsafe { self.descriptor.as_ref() }
    }

    /// Pre-app callback, then `host_step`, then post-app callback
    pub fn specialize_app<F>(
        &mut self,
        args: &mut AppSpecializeArgs,
        host_step: F,
    ) -> Result<(), ModuleError>
    where
        F: FnOnce(&AppSpecializeArgs),
    {
        self.tracker
            .advance(LifecycleState::PreSpecialize(SpecializeKind::App))?;
        let descriptor = self.descriptor();
        // SAFETY: callbacks come from a validated descriptor; `args` is live.
        unsafe { (descriptor.pre_app_specialize)(descriptor.this, args) };

        host_step(&*args);

        self.tracker
            .advance(LifecycleState::PostSpecialize(SpecializeKind::App))?;
        let descriptor = self.descriptor();
        // SAFETY: as above.
        unsafe { (descriptor.post_app_specialize)(descriptor.this, args) };

        self.finish();
        Ok(())
    }

    /// Pre-server callback, then `host_step`, then post-server callback
    pub fn specialize_server<F>(
        &mut self,
        args: &mut ServerSpecializeArgs,
        host_step: F,
    ) -> Result<(), ModuleError>
    where
        F: FnOnce(&ServerSpecializeArgs),
    {
        self.tracker
            .advance(LifecycleState::PreSpecialize(SpecializeKind::Server))?;
        let descriptor = self.descriptor();
        // SAFETY: see `specialize_app`.
        unsafe { (descriptor.pre_server_specialize)(descriptor.this, args) };

        host_step(&*args);

        self.tracker
            .advance(LifecycleState::PostSpecialize(SpecializeKind::Server))?;
        let descriptor = self.descriptor();
        // SAFETY: see `specialize_app`.
        unsafe { (descriptor.post_server_specialize)(descriptor.this, args) };

        self.finish();
        Ok(())
    }

    fn finish(&mut self) {
        if !self.options.is_set(ModuleOption::DlcloseModuleLibrary) {
            return;
        }
        if self.tracker.advance(LifecycleState::Unloaded).is_err() {
            return;
        }
        match self.library.take() {
            Some(library) => {
                info!("Unloading module library {:?}", library.path());
                drop(library);
            }
            None => debug!("Module requested unload; no library handle to close"),
        }
    }
}

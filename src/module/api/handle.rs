//! Module-side handle to the host interface table
//!
//! Created once per process by the entry point, after the host accepts
//! the module's descriptor, and handed to `Module::on_load`. Every call
//! goes through a null-checked table entry, so a module built against a
//! newer table keeps working on an older host that lacks trailing
//! entries.

use std::cell::RefCell;
use std::ffi::{c_int, c_void, CString};
use std::os::fd::{FromRawFd, OwnedFd};
use std::ptr::{self, NonNull};
use std::rc::Rc;
use std::sync::atomic::AtomicPtr;
use tracing::{debug, error, warn};

use crate::module::abi::{ApiTable, JNIEnv, ModuleOption, StateFlags};
use crate::module::hooks::jni::{apply_results, to_raw_methods};
use crate::module::hooks::{HookLedger, NativeMethodHook, PltHookSet};
use crate::module::ipc::client::CompanionChannel;
use crate::module::traits::ModuleError;

#[derive(Debug, Default)]
struct ApiState {
    plt: RefCell<PltHookSet>,
    ledger: HookLedger,
}

/// Handle bound to the host's interface table
///
/// Cheap to clone; clones share hook bookkeeping. Not `Send`: it belongs
/// to the single thread that runs the lifecycle callbacks.
#[derive(Debug, Clone)]
pub struct Api {
    table: NonNull<ApiTable>,
    state: Rc<ApiState>,
}

impl Api {
    /// Bind a handle to a host table
    ///
    /// # Safety
    ///
    /// `table` must point to a host-populated table that stays valid and
    /// unmodified for the rest of the process.
    pub unsafe fn from_table(table: NonNull<ApiTable>) -> Self {
        Self {
            table,
            state: Rc::new(ApiState::default()),
        }
    }

    fn table(&self) -> &ApiTable {
        // SAFETY: guaranteed by `from_table`.
        unsafe { self.table.as_ref() }
    }

    fn host_this(&self) -> *mut c_void {
        self.table().this
    }

    /// Connect to this module's handler in the root companion daemon
    ///
    /// Only works from `on_load` and pre-specialize; after specialization
    /// the sandbox refuses the connection and this returns an error. The
    /// daemon instance reached matches the caller's ABI class. The call
    /// blocks until the daemon accepts, with no timeout.
    pub fn connect_companion(&self) -> Result<CompanionChannel, ModuleError> {
        let connect = self.table().connect_companion.ok_or_else(|| {
            ModuleError::CompanionUnavailable("host does not provide connect_companion".to_string())
        })?;

        // SAFETY: entry provided by the host, called with its own context.
        let fd = unsafe { connect(self.host_this()) };
        if fd < 0 {
            warn!("Companion connection failed (host returned {})", fd);
            return Err(ModuleError::CompanionUnavailable(
                "host could not reach the companion daemon".to_string(),
            ));
        }

        debug!("Connected to companion on fd {}", fd);
        // SAFETY: on success the host transfers ownership of a connected socket.
        Ok(unsafe { CompanionChannel::from_raw_fd(fd) })
    }

    /// Open the module's root directory
    ///
    /// Only usable in pre-specialize, or from the companion after the fd
    /// is sent over.
    pub fn get_module_dir(&self) -> Result<OwnedFd, ModuleError> {
        let get_dir = self
            .table()
            .get_module_dir
            .ok_or(ModuleError::TableUnavailable("get_module_dir"))?;

        // SAFETY: see `connect_companion`.
        let fd = unsafe { get_dir(self.host_this()) };
        if fd < 0 {
            return Err(ModuleError::Io(std::io::Error::other(
                "host could not open the module directory",
            )));
        }
        // SAFETY: the host hands over a fresh directory fd.
        Ok(unsafe { OwnedFd::from_raw_fd(fd) })
    }

    /// Set one module option
    ///
    /// Requesting [`ModuleOption::DlcloseModuleLibrary`] after installing
    /// any hook is a caller error: once the library is unmapped the hooks
    /// jump into freed memory. The request is still forwarded; debug
    /// builds assert.
    pub fn set_option(&self, option: ModuleOption) {
        if option == ModuleOption::DlcloseModuleLibrary {
            let outstanding = self.state.ledger.outstanding();
            if outstanding > 0 {
                error!(
                    "Self-unload requested with {} hook(s) installed; hooked code will be unmapped",
                    outstanding
                );
                debug_assert!(
                    outstanding == 0,
                    "DlcloseModuleLibrary requested while {} hook(s) are installed",
                    outstanding
                );
            }
        }

        match self.table().set_option {
            // SAFETY: see `connect_companion`.
            Some(set_option) => unsafe { set_option(self.host_this(), option.as_raw()) },
            None => debug!("Host does not provide set_option, ignoring {:?}", option),
        }
    }

    /// Process state flags, empty if the host does not report them
    pub fn get_flags(&self) -> StateFlags {
        match self.table().get_flags {
            // SAFETY: see `connect_companion`.
            Some(get_flags) => StateFlags::from_bits_retain(unsafe { get_flags(self.host_this()) }),
            None => StateFlags::empty(),
        }
    }

    /// Replace registered JNI native methods of `class_name`
    ///
    /// Afterwards each hook's `original()` holds the function that was
    /// registered before, or `None` if nothing matched its name and
    /// signature. Returns how many were resolved. Must run before
    /// specialization replaces `env`.
    pub fn hook_jni_native_methods(
        &self,
        env: *mut JNIEnv,
        class_name: &str,
        methods: &mut [NativeMethodHook],
    ) -> Result<usize, ModuleError> {
        if env.is_null() {
            return Err(ModuleError::InvalidArgument("JNIEnv is null".to_string()));
        }
        if methods.is_empty() {
            return Ok(0);
        }
        let count = c_int::try_from(methods.len())
            .map_err(|_| ModuleError::InvalidArgument("too many methods".to_string()))?;
        let class_name = CString::new(class_name)?;

        let Some(hook) = self.table().hook_jni_native_methods else {
            warn!("Host does not provide JNI hooking; {} method(s) unresolved", methods.len());
            methods.iter_mut().for_each(NativeMethodHook::clear_original);
            return Ok(0);
        };

        let mut raw = to_raw_methods(methods);
        // SAFETY: `raw` holds `count` entries whose strings live in `methods`.
        unsafe { hook(env, class_name.as_ptr(), raw.as_mut_ptr(), count) };

        let resolved = apply_results(methods, &raw);
        self.state.ledger.record_jni(resolved);
        debug!(
            "Hooked {}/{} native method(s) of {:?}",
            resolved,
            methods.len(),
            class_name
        );
        Ok(resolved)
    }

    /// Stage a PLT hook of `symbol` in libraries whose path matches `regex`
    ///
    /// Nothing is patched until [`Api::plt_hook_commit`]. When `old_func`
    /// is given, the original function is stored into it on commit.
    /// Registering an identical hook again before the next commit is a
    /// no-op.
    pub fn plt_hook_register(
        &self,
        regex: &str,
        symbol: &str,
        new_func: *mut c_void,
        old_func: Option<&'static AtomicPtr<c_void>>,
    ) -> Result<(), ModuleError> {
        let register = self
            .table()
            .plt_hook_register
            .ok_or(ModuleError::TableUnavailable("plt_hook_register"))?;

        // Every fallible step runs before staging; a failed call stages nothing.
        let c_regex = CString::new(regex)?;
        let c_symbol = CString::new(symbol)?;
        if !self
            .state
            .plt
            .borrow_mut()
            .stage_hook(regex, symbol, new_func, old_func)?
        {
            debug!("PLT hook {} in {} already staged", symbol, regex);
            return Ok(());
        }

        let old_func = old_func.map_or(ptr::null_mut(), |slot| slot.as_ptr());
        // SAFETY: strings outlive the call; `old_func` is null or 'static.
        unsafe { register(c_regex.as_ptr(), c_symbol.as_ptr(), new_func, old_func) };
        Ok(())
    }

    /// Stage an exclusion; `symbol: None` excludes every symbol in matching libraries
    pub fn plt_hook_exclude(&self, regex: &str, symbol: Option<&str>) -> Result<(), ModuleError> {
        let exclude = self
            .table()
            .plt_hook_exclude
            .ok_or(ModuleError::TableUnavailable("plt_hook_exclude"))?;

        let c_regex = CString::new(regex)?;
        let c_symbol = symbol.map(CString::new).transpose()?;
        if !self.state.plt.borrow_mut().stage_exclusion(regex, symbol)? {
            return Ok(());
        }

        let symbol_ptr = c_symbol.as_ref().map_or(ptr::null(), |s| s.as_ptr());
        // SAFETY: strings outlive the call.
        unsafe { exclude(c_regex.as_ptr(), symbol_ptr) };
        Ok(())
    }

    /// Apply every staged PLT hook
    ///
    /// On failure some hooks may have been applied anyway; no rollback
    /// happens, so they are counted as installed.
    pub fn plt_hook_commit(&self) -> Result<(), ModuleError> {
        let committed = self.state.plt.borrow_mut().drain();
        let Some(commit) = self.table().plt_hook_commit else {
            return Err(ModuleError::HookCommitFailed);
        };

        // SAFETY: entry provided by the host.
        let ok = unsafe { commit() };
        self.state.ledger.record_plt(committed.len());
        if ok {
            debug!("Committed {} PLT hook(s)", committed.len());
            Ok(())
        } else {
            error!("PLT hook commit failed; hooks may be partially applied");
            Err(ModuleError::HookCommitFailed)
        }
    }

    /// Hooks this handle has installed so far
    pub fn outstanding_hooks(&self) -> usize {
        self.state.ledger.outstanding()
    }

    /// PLT hooks staged and waiting for a commit
    pub fn staged_plt_hooks(&self) -> usize {
        self.state.plt.borrow().hooks().len()
    }
}

//! Module and companion entry points
//!
//! A module library exports `zygisk_module_entry` and, optionally,
//! `zygisk_companion_entry`. The [`register_module!`] and
//! [`register_companion!`] macros generate those exports; the functions
//! here do the actual work.
//!
//! [`register_module!`]: crate::register_module
//! [`register_companion!`]: crate::register_companion

use std::ffi::{c_int, c_void};
use std::mem::ManuallyDrop;
use std::os::fd::FromRawFd;
use std::os::unix::net::UnixStream;
use std::ptr::NonNull;
use tracing::{debug, info, warn};

use crate::module::abi::{
    AppSpecializeArgs, ApiTable, JNIEnv, ModuleAbi, ServerSpecializeArgs, API_VERSION,
};
use crate::module::api::Api;
use crate::module::traits::{
    LifecycleState, LifecycleTracker, Module, ModuleError, SpecializeKind,
};

/// Module instance plus where it is in its lifecycle
///
/// This is what the descriptor's `this` points at.
struct ModuleSlot<T> {
    module: T,
    tracker: LifecycleTracker,
}

impl<T: Module> ModuleSlot<T> {
    fn new(module: T) -> Self {
        Self {
            module,
            tracker: LifecycleTracker::new(),
        }
    }

    /// Move to `next`; out-of-order host calls are logged and skipped
    fn advance(&mut self, next: LifecycleState) -> bool {
        match self.tracker.advance(next) {
            Ok(()) => true,
            Err(e) => {
                warn!("Ignoring lifecycle callback: {}", e);
                false
            }
        }
    }
}

unsafe extern "C" fn pre_app_specialize<T: Module>(this: *mut c_void, args: *mut AppSpecializeArgs) {
    let (Some(slot), Some(args)) = (this.cast::<ModuleSlot<T>>().as_mut(), args.as_mut()) else {
        return;
    };
    if slot.advance(LifecycleState::PreSpecialize(SpecializeKind::App)) {
        slot.module.pre_app_specialize(args);
    }
}

unsafe extern "C" fn post_app_specialize<T: Module>(
    this: *mut c_void,
    args: *const AppSpecializeArgs,
) {
    let (Some(slot), Some(args)) = (this.cast::<ModuleSlot<T>>().as_mut(), args.as_ref()) else {
        return;
    };
    if slot.advance(LifecycleState::PostSpecialize(SpecializeKind::App)) {
        slot.module.post_app_specialize(args);
    }
}

unsafe extern "C" fn pre_server_specialize<T: Module>(
    this: *mut c_void,
    args: *mut ServerSpecializeArgs,
) {
    let (Some(slot), Some(args)) = (this.cast::<ModuleSlot<T>>().as_mut(), args.as_mut()) else {
        return;
    };
    if slot.advance(LifecycleState::PreSpecialize(SpecializeKind::Server)) {
        slot.module.pre_server_specialize(args);
    }
}

unsafe extern "C" fn post_server_specialize<T: Module>(
    this: *mut c_void,
    args: *const ServerSpecializeArgs,
) {
    let (Some(slot), Some(args)) = (this.cast::<ModuleSlot<T>>().as_mut(), args.as_ref()) else {
        return;
    };
    if slot.advance(LifecycleState::PostSpecialize(SpecializeKind::Server)) {
        slot.module.post_server_specialize(args);
    }
}

/// Register a `T` with the host and run its `on_load`
///
/// The module instance and its descriptor live for the rest of the
/// process once the host accepts them. If the host rejects the
/// descriptor both are dropped again and `on_load` never runs.
pub fn entry_impl<T: Module + Default + 'static>(
    table: *mut ApiTable,
    env: *mut JNIEnv,
) -> Result<(), ModuleError> {
    let table = NonNull::new(table)
        .ok_or_else(|| ModuleError::InvalidArgument("interface table is null".to_string()))?;
    // SAFETY: the host passes a populated table valid for the whole process.
    let Some(register) = (unsafe { table.as_ref() }).register_module else {
        warn!("Host table has no register_module entry");
        return Err(ModuleError::RegistrationRejected);
    };

    let slot = Box::into_raw(Box::new(ModuleSlot::new(T::default())));
    let descriptor = Box::into_raw(Box::new(ModuleAbi {
        api_version: API_VERSION,
        this: slot.cast(),
        pre_app_specialize: pre_app_specialize::<T>,
        post_app_specialize: post_app_specialize::<T>,
        pre_server_specialize: pre_server_specialize::<T>,
        post_server_specialize: post_server_specialize::<T>,
    }));

    // SAFETY: both pointers are valid; the host keeps them only on success.
    let accepted = unsafe { register(table.as_ptr(), descriptor) };
    if !accepted {
        // SAFETY: the host declined, so nothing else refers to these.
        unsafe {
            drop(Box::from_raw(descriptor));
            drop(Box::from_raw(slot));
        }
        warn!("Host rejected module descriptor (API version {})", API_VERSION);
        return Err(ModuleError::RegistrationRejected);
    }

    debug!("Module registered with API version {}", API_VERSION);
    // SAFETY: see above; the table outlives every use of the handle.
    let api = unsafe { Api::from_table(table) };
    // SAFETY: `slot` is leaked and only touched from the host's thread.
    unsafe { (*slot).module.on_load(api, env) };
    Ok(())
}

/// Run a companion handler on a socket owned by the daemon
///
/// The daemon closes `fd` after the handler returns. Handlers may read
/// and write freely but must not close it.
pub fn companion_entry_impl<F>(fd: c_int, handler: F)
where
    F: FnOnce(&mut UnixStream),
{
    if fd < 0 {
        warn!("Companion entry called with invalid fd {}", fd);
        return;
    }
    // SAFETY: the daemon keeps `fd` open for the duration of this call.
    let mut stream = ManuallyDrop::new(unsafe { UnixStream::from_raw_fd(fd) });
    info!("Companion handling client on fd {}", fd);
    handler(&mut stream);
}

/// Export `zygisk_module_entry` for a module type
///
/// The type must implement [`Module`](crate::module::Module) and
/// `Default`. Only one module may be registered per library.
#[macro_export]
macro_rules! register_module {
    ($module:ty) => {
        #[no_mangle]
        pub unsafe extern "C" fn zygisk_module_entry(
            table: *mut $crate::module::abi::ApiTable,
            env: *mut $crate::module::abi::JNIEnv,
        ) {
            let _ = $crate::module::entry::entry_impl::<$module>(table, env);
        }
    };
}

/// Export `zygisk_companion_entry` for a handler `fn(&mut UnixStream)`
#[macro_export]
macro_rules! register_companion {
    ($handler:path) => {
        #[no_mangle]
        pub unsafe extern "C" fn zygisk_companion_entry(fd: ::std::ffi::c_int) {
            $crate::module::entry::companion_entry_impl(fd, $handler);
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Noop;
    impl Module for Noop {}

    #[test]
    fn test_slot_skips_out_of_order_calls() {
        let mut slot = ModuleSlot::new(Noop);
        assert!(!slot.advance(LifecycleState::PostSpecialize(SpecializeKind::App)));
        assert_eq!(slot.tracker.state(), LifecycleState::Loaded);
        assert!(slot.advance(LifecycleState::PreSpecialize(SpecializeKind::App)));
        assert!(!slot.advance(LifecycleState::PostSpecialize(SpecializeKind::Server)));
        assert!(slot.advance(LifecycleState::PostSpecialize(SpecializeKind::App)));
    }

    #[test]
    fn test_entry_rejects_null_and_incomplete_tables() {
        assert!(matches!(
            entry_impl::<Noop>(std::ptr::null_mut(), std::ptr::null_mut()),
            Err(ModuleError::InvalidArgument(_))
        ));

        let mut table = ApiTable::empty();
        assert!(matches!(
            entry_impl::<Noop>(&mut table, std::ptr::null_mut()),
            Err(ModuleError::RegistrationRejected)
        ));
    }

    #[test]
    fn test_companion_entry_does_not_close_fd() {
        use std::io::{Read, Write};
        use std::os::fd::AsRawFd;

        let (mut ours, theirs) = UnixStream::pair().unwrap();
        companion_entry_impl(theirs.as_raw_fd(), |stream| {
            stream.write_all(b"ok").unwrap();
        });

        // Still usable after the handler returned.
        (&theirs).write_all(b"!").unwrap();
        let mut buf = [0u8; 3];
        ours.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"ok!");
    }
}

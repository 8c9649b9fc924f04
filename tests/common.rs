//! Simulated host for integration tests
//!
//! Implements the interface table with `extern "C"` functions over
//! thread-local state, the same way a real host backs the table with its
//! own globals. Each test runs on its own thread, so tests never see
//! each other's host state.

#![allow(dead_code)]

use std::cell::RefCell;
use std::ffi::{c_char, c_int, c_void, CStr};
use std::os::fd::IntoRawFd;
use std::path::{Path, PathBuf};
use std::ptr::NonNull;
use std::sync::Arc;
use tempfile::TempDir;
use tokio::runtime::Runtime;
use tokio::sync::oneshot;

use zygisk_module::module::abi::{ApiTable, JNIEnv, ModuleAbi};
use zygisk_module::module::hooks::JniNativeMethod;
use zygisk_module::module::entry::entry_impl;
use zygisk_module::module::{
    AbiClass, Api, CompanionConnector, CompanionHandler, CompanionRegistry, CompanionServer,
    LifecycleDispatcher, Module, ModuleError, RequestedOptions,
};

/// Everything the simulated host records or is told to answer
pub struct HostState {
    pub accept_registration: bool,
    pub descriptors: Vec<*mut ModuleAbi>,
    pub requested: RequestedOptions,
    pub options: Vec<c_int>,
    pub flags: u32,
    pub flag_queries: usize,
    pub companion: Option<(CompanionConnector, i32)>,
    pub companion_connects: usize,
    pub module_dir: Option<PathBuf>,
    pub jni_classes: Vec<String>,
    /// Registered natives the host knows: (name, signature, function)
    pub jni_natives: Vec<(String, String, usize)>,
    pub plt_registered: Vec<(String, String, usize)>,
    pub plt_excluded: Vec<(String, Option<String>)>,
    pub plt_commits: usize,
    pub commit_result: bool,
}

impl Default for HostState {
    fn default() -> Self {
        Self {
            accept_registration: true,
            descriptors: Vec::new(),
            requested: RequestedOptions::new(),
            options: Vec::new(),
            flags: 0,
            flag_queries: 0,
            companion: None,
            companion_connects: 0,
            module_dir: None,
            jni_classes: Vec::new(),
            jni_natives: Vec::new(),
            plt_registered: Vec::new(),
            plt_excluded: Vec::new(),
            plt_commits: 0,
            commit_result: true,
        }
    }
}

thread_local! {
    static HOST: RefCell<HostState> = RefCell::new(HostState::default());
}

/// Fresh host state for the current test
pub fn reset_host() {
    HOST.with(|h| *h.borrow_mut() = HostState::default());
}

pub fn with_host<R>(f: impl FnOnce(&mut HostState) -> R) -> R {
    HOST.with(|h| f(&mut h.borrow_mut()))
}

/// Value written into `old_func` slots on commit
pub const ORIGINAL_PLT_FUNC: usize = 0xDEAD_0000;

unsafe fn c_str(ptr: *const c_char) -> String {
    CStr::from_ptr(ptr).to_string_lossy().into_owned()
}

unsafe extern "C" fn host_register(_table: *mut ApiTable, descriptor: *mut ModuleAbi) -> bool {
    with_host(|h| {
        if h.accept_registration {
            h.descriptors.push(descriptor);
        }
        h.accept_registration
    })
}

unsafe extern "C" fn host_hook_jni(
    _env: *mut JNIEnv,
    class_name: *const c_char,
    methods: *mut JniNativeMethod,
    count: c_int,
) {
    let class_name = c_str(class_name);
    let methods = std::slice::from_raw_parts_mut(methods, count as usize);
    with_host(|h| {
        h.jni_classes.push(class_name);
        for method in methods {
            let name = c_str(method.name);
            let signature = c_str(method.signature);
            let original = h
                .jni_natives
                .iter_mut()
                .find(|(n, s, _)| *n == name && *s == signature);
            method.fn_ptr = match original {
                Some(entry) => {
                    let previous = entry.2;
                    entry.2 = method.fn_ptr as usize;
                    previous as *mut c_void
                }
                None => std::ptr::null_mut(),
            };
        }
    });
}

unsafe extern "C" fn host_plt_register(
    regex: *const c_char,
    symbol: *const c_char,
    new_func: *mut c_void,
    old_func: *mut *mut c_void,
) {
    let entry = (c_str(regex), c_str(symbol), new_func as usize);
    with_host(|h| h.plt_registered.push(entry));
    if !old_func.is_null() {
        // Real hosts write this during commit.
        *old_func = ORIGINAL_PLT_FUNC as *mut c_void;
    }
}

unsafe extern "C" fn host_plt_exclude(regex: *const c_char, symbol: *const c_char) {
    let symbol = (!symbol.is_null()).then(|| c_str(symbol));
    let regex = c_str(regex);
    with_host(|h| h.plt_excluded.push((regex, symbol)));
}

unsafe extern "C" fn host_plt_commit() -> bool {
    with_host(|h| {
        h.plt_commits += 1;
        h.commit_result
    })
}

unsafe extern "C" fn host_connect_companion(_this: *mut c_void) -> c_int {
    let target = with_host(|h| {
        h.companion_connects += 1;
        h.companion.clone()
    });
    match target {
        Some((connector, index)) => connector.connect_raw(index),
        None => -1,
    }
}

unsafe extern "C" fn host_set_option(_this: *mut c_void, option: c_int) {
    with_host(|h| {
        h.options.push(option);
        h.requested.set_raw(option);
    });
}

unsafe extern "C" fn host_get_module_dir(_this: *mut c_void) -> c_int {
    let dir = with_host(|h| h.module_dir.clone());
    dir.and_then(|dir| std::fs::File::open(dir).ok())
        .map_or(-1, |file| file.into_raw_fd())
}

unsafe extern "C" fn host_get_flags(_this: *mut c_void) -> u32 {
    with_host(|h| {
        h.flag_queries += 1;
        h.flags
    })
}

/// Table with every entry the host supports
pub fn full_table() -> &'static mut ApiTable {
    Box::leak(Box::new(ApiTable {
        this: std::ptr::null_mut(),
        register_module: Some(host_register),
        hook_jni_native_methods: Some(host_hook_jni),
        plt_hook_register: Some(host_plt_register),
        plt_hook_exclude: Some(host_plt_exclude),
        plt_hook_commit: Some(host_plt_commit),
        connect_companion: Some(host_connect_companion),
        set_option: Some(host_set_option),
        get_module_dir: Some(host_get_module_dir),
        get_flags: Some(host_get_flags),
    }))
}

/// Table of an old host that only knows how to register modules
pub fn minimal_table() -> &'static mut ApiTable {
    Box::leak(Box::new(ApiTable {
        register_module: Some(host_register),
        ..ApiTable::empty()
    }))
}

/// Stand-in for the VM's environment; never dereferenced
pub fn fake_env() -> *mut JNIEnv {
    NonNull::dangling().as_ptr()
}

/// Load a module against `table` and wrap its descriptor for dispatch
pub fn load_module<T: Module + Default + 'static>(
    table: &'static mut ApiTable,
) -> Result<LifecycleDispatcher, ModuleError> {
    entry_impl::<T>(table, fake_env())?;
    let (descriptor, options) = with_host(|h| (h.descriptors.last().copied(), h.requested.clone()));
    let descriptor = NonNull::new(descriptor.unwrap_or(std::ptr::null_mut()))
        .ok_or(ModuleError::RegistrationRejected)?;
    // SAFETY: accepted descriptors are leaked by the module side.
    unsafe { LifecycleDispatcher::new(descriptor, options) }
}

thread_local! {
    static CAPTURED_API: RefCell<Option<Api>> = const { RefCell::new(None) };
}

/// Module that only keeps its handle, for driving `Api` from tests
#[derive(Default)]
pub struct ApiCapture;

impl Module for ApiCapture {
    fn on_load(&mut self, api: Api, _env: *mut JNIEnv) {
        CAPTURED_API.with(|slot| *slot.borrow_mut() = Some(api));
    }
}

/// Register an [`ApiCapture`] and return its handle
pub fn capture_api(table: &'static mut ApiTable) -> Api {
    entry_impl::<ApiCapture>(table, fake_env()).expect("registration");
    CAPTURED_API.with(|slot| slot.borrow_mut().take().expect("on_load ran"))
}

/// Companion daemon running on its own runtime
pub struct DaemonFixture {
    pub dir: TempDir,
    pub socket_path: PathBuf,
    runtime: Runtime,
    shutdown: Option<oneshot::Sender<()>>,
}

impl DaemonFixture {
    pub fn start(registry: CompanionRegistry) -> Self {
        let dir = TempDir::new().expect("tempdir");
        let socket_path = dir.path().join(AbiClass::current().socket_name());
        let runtime = Runtime::new().expect("runtime");

        let server = CompanionServer::new(&socket_path, registry);
        let listener = {
            let _guard = runtime.enter();
            server.bind().expect("bind")
        };
        let (tx, rx) = oneshot::channel::<()>();
        runtime.spawn(async move {
            let _ = server
                .serve_with_shutdown(listener, async {
                    let _ = rx.await;
                })
                .await;
        });

        Self {
            dir,
            socket_path,
            runtime,
            shutdown: Some(tx),
        }
    }

    pub fn connector(&self) -> CompanionConnector {
        CompanionConnector::new(&self.socket_path)
    }

    pub fn socket_dir(&self) -> &Path {
        self.dir.path()
    }
}

impl Drop for DaemonFixture {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
    }
}

/// Registry with `handler` at index 0
pub fn single_handler<H>(handler: H) -> CompanionRegistry
where
    H: CompanionHandler + 'static,
{
    let mut registry = CompanionRegistry::new();
    registry.push(Some(Arc::new(handler) as Arc<dyn CompanionHandler>));
    registry
}

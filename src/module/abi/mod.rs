//! Host/module ABI
//!
//! The interface table and the module descriptor are the only things the
//! host and a module binary share. Both are `#[repr(C)]` and append-only:
//! new entries go at the end, nothing is ever reordered or removed. A
//! module built against a newer layout can run on an older host whose
//! table lacks trailing entries, so every function pointer is an `Option`
//! and is checked before each call.

pub mod args;
pub mod options;

use std::ffi::{c_char, c_int, c_long, c_void};

pub use args::{
    AppSpecializeArgs, AppSpecializeStorage, ServerSpecializeArgs, ServerSpecializeStorage,
};
pub use options::{ModuleOption, StateFlags};

use crate::module::hooks::jni::JniNativeMethod;

/// API version this crate's descriptor layout corresponds to
pub const API_VERSION: c_long = 2;

/// Oldest descriptor version a host built from this crate accepts
pub const MIN_API_VERSION: c_long = 1;

#[allow(non_camel_case_types)]
pub type jint = i32;
#[allow(non_camel_case_types)]
pub type jlong = i64;
#[allow(non_camel_case_types)]
pub type jboolean = u8;
#[allow(non_camel_case_types)]
pub type jobject = *mut c_void;
#[allow(non_camel_case_types)]
pub type jstring = jobject;
#[allow(non_camel_case_types)]
pub type jintArray = jobject;
#[allow(non_camel_case_types)]
pub type jobjectArray = jobject;

pub const JNI_FALSE: jboolean = 0;
pub const JNI_TRUE: jboolean = 1;

/// Opaque JNI environment owned by the host's VM
#[repr(C)]
pub struct JNIEnv {
    _opaque: [u8; 0],
}

/// Host-populated function table handed to `zygisk_module_entry`
///
/// The first two entries are permanent. The module never builds one of
/// these; it only reads the pointers the host filled in.
#[repr(C)]
pub struct ApiTable {
    /// Host context passed back to the `this`-taking entries
    pub this: *mut c_void,
    pub register_module: Option<unsafe extern "C" fn(*mut ApiTable, *mut ModuleAbi) -> bool>,

    pub hook_jni_native_methods:
        Option<unsafe extern "C" fn(*mut JNIEnv, *const c_char, *mut JniNativeMethod, c_int)>,
    pub plt_hook_register:
        Option<unsafe extern "C" fn(*const c_char, *const c_char, *mut c_void, *mut *mut c_void)>,
    pub plt_hook_exclude: Option<unsafe extern "C" fn(*const c_char, *const c_char)>,
    pub plt_hook_commit: Option<unsafe extern "C" fn() -> bool>,

    pub connect_companion: Option<unsafe extern "C" fn(*mut c_void) -> c_int>,
    pub set_option: Option<unsafe extern "C" fn(*mut c_void, c_int)>,
    pub get_module_dir: Option<unsafe extern "C" fn(*mut c_void) -> c_int>,
    pub get_flags: Option<unsafe extern "C" fn(*mut c_void) -> u32>,
}

impl ApiTable {
    /// A table with every entry absent
    ///
    /// Hosts start from this and fill in what they implement.
    pub const fn empty() -> Self {
        Self {
            this: std::ptr::null_mut(),
            register_module: None,
            hook_jni_native_methods: None,
            plt_hook_register: None,
            plt_hook_exclude: None,
            plt_hook_commit: None,
            connect_companion: None,
            set_option: None,
            get_module_dir: None,
            get_flags: None,
        }
    }
}

pub type PreAppFn = unsafe extern "C" fn(*mut c_void, *mut AppSpecializeArgs);
pub type PostAppFn = unsafe extern "C" fn(*mut c_void, *const AppSpecializeArgs);
pub type PreServerFn = unsafe extern "C" fn(*mut c_void, *mut ServerSpecializeArgs);
pub type PostServerFn = unsafe extern "C" fn(*mut c_void, *const ServerSpecializeArgs);

/// Module descriptor registered with the host
///
/// `this` is an opaque pointer to the module instance; the four
/// callbacks are plain functions taking it back, so no vtable layout
/// crosses the boundary.
#[repr(C)]
pub struct ModuleAbi {
    pub api_version: c_long,
    pub this: *mut c_void,
    pub pre_app_specialize: PreAppFn,
    pub post_app_specialize: PostAppFn,
    pub pre_server_specialize: PreServerFn,
    pub post_server_specialize: PostServerFn,
}

/// Signature of the exported `zygisk_module_entry` symbol
pub type ModuleEntryFn = unsafe extern "C" fn(*mut ApiTable, *mut JNIEnv);

/// Signature of the exported `zygisk_companion_entry` symbol
pub type CompanionEntryFn = unsafe extern "C" fn(c_int);

/// Exported symbol names, NUL-terminated for `dlsym`
pub const MODULE_ENTRY_SYMBOL: &[u8] = b"zygisk_module_entry\0";
pub const COMPANION_ENTRY_SYMBOL: &[u8] = b"zygisk_companion_entry\0";

/// Whether a host built from this crate accepts a descriptor version
pub fn accepts_api_version(version: c_long) -> bool {
    (MIN_API_VERSION..=API_VERSION).contains(&version)
}

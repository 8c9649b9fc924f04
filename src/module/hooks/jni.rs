//! JNI native method hooks

use std::ffi::{c_char, c_void, CString};
use std::ptr::{self, NonNull};

use crate::module::traits::ModuleError;

/// C layout of `JNINativeMethod`
///
/// On input `fn_ptr` holds the replacement; the host overwrites it with
/// the previously registered function, or null when nothing matched.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct JniNativeMethod {
    pub name: *const c_char,
    pub signature: *const c_char,
    pub fn_ptr: *mut c_void,
}

/// One method replacement request and, after hooking, its result
#[derive(Debug)]
pub struct NativeMethodHook {
    name: CString,
    signature: CString,
    replacement: *mut c_void,
    original: Option<NonNull<c_void>>,
}

impl NativeMethodHook {
    /// Replace the native method `name` with JNI signature `signature`
    pub fn new(name: &str, signature: &str, replacement: *mut c_void) -> Result<Self, ModuleError> {
        if replacement.is_null() {
            return Err(ModuleError::InvalidArgument(format!(
                "replacement for {}{} is null",
                name, signature
            )));
        }
        Ok(Self {
            name: CString::new(name)?,
            signature: CString::new(signature)?,
            replacement,
            original: None,
        })
    }

    pub fn name(&self) -> &str {
        self.name.to_str().unwrap_or_default()
    }

    pub fn signature(&self) -> &str {
        self.signature.to_str().unwrap_or_default()
    }

    pub fn replacement(&self) -> *mut c_void {
        self.replacement
    }

    /// Previously registered function, if the host found a match
    ///
    /// Calling through the replacement's "original" when this is `None`
    /// is a caller defect.
    pub fn original(&self) -> Option<NonNull<c_void>> {
        self.original
    }

    pub fn is_resolved(&self) -> bool {
        self.original.is_some()
    }

    pub(crate) fn to_raw(&self) -> JniNativeMethod {
        JniNativeMethod {
            name: self.name.as_ptr(),
            signature: self.signature.as_ptr(),
            fn_ptr: self.replacement,
        }
    }

    pub(crate) fn set_original(&mut self, raw: *mut c_void) {
        self.original = NonNull::new(raw);
    }

    pub(crate) fn clear_original(&mut self) {
        self.original = None;
    }
}

/// Build the raw method array handed to the host
pub(crate) fn to_raw_methods(hooks: &[NativeMethodHook]) -> Vec<JniNativeMethod> {
    hooks.iter().map(NativeMethodHook::to_raw).collect()
}

/// Copy the host's answers back into the hooks
///
/// Returns the number of methods the host resolved.
pub(crate) fn apply_results(hooks: &mut [NativeMethodHook], raw: &[JniNativeMethod]) -> usize {
    let mut resolved = 0;
    for (hook, method) in hooks.iter_mut().zip(raw) {
        hook.set_original(method.fn_ptr);
        if hook.is_resolved() {
            resolved += 1;
        }
    }
    resolved
}

/// Null raw entry, used when a host has to report a miss
pub const UNRESOLVED: *mut c_void = ptr::null_mut();

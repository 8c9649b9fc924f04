//! Specialization argument views
//!
//! The host keeps the real specialization parameters in its own frame
//! and hands modules a struct of pointers into that frame. Writes through
//! these views change how the process is specialized.
//!
//! Required fields are always present. Optional fields only exist on
//! some platform versions; their pointers may be null, so the getters
//! return `Option` and the setters report whether the write landed.
//!
//! A view is only valid for the duration of the callback that receives
//! it. Values of these types are never constructed by module code: the
//! host builds them, or a Rust host lends one out of an owned storage
//! struct through `with_args`.

use std::ptr;

use super::{jboolean, jint, jintArray, jlong, jobjectArray, jstring, JNI_FALSE, JNI_TRUE};

macro_rules! required_field {
    ($(#[$doc:meta])* $get:ident, $set:ident: $ty:ty) => {
        $(#[$doc])*
        pub fn $get(&self) -> $ty {
            // SAFETY: required pointers are non-null and point into the
            // host's specialization frame for the whole callback.
            unsafe { *self.$get }
        }

        pub fn $set(&mut self, value: $ty) {
            // SAFETY: see the getter.
            unsafe { *self.$get = value }
        }
    };
}

macro_rules! optional_flag {
    ($(#[$doc:meta])* $get:ident, $set:ident) => {
        $(#[$doc])*
        pub fn $get(&self) -> Option<bool> {
            // SAFETY: optional pointers are either null or valid for the callback.
            unsafe { self.$get.as_ref().map(|v| *v != JNI_FALSE) }
        }

        /// Returns `false` when the host does not provide this field
        pub fn $set(&mut self, value: bool) -> bool {
            // SAFETY: see the getter.
            match unsafe { self.$get.as_mut() } {
                Some(slot) => {
                    *slot = if value { JNI_TRUE } else { JNI_FALSE };
                    true
                }
                None => false,
            }
        }
    };
}

macro_rules! optional_object {
    ($(#[$doc:meta])* $get:ident, $set:ident) => {
        $(#[$doc])*
        pub fn $get(&self) -> Option<jobjectArray> {
            // SAFETY: optional pointers are either null or valid for the callback.
            unsafe { self.$get.as_ref().copied() }
        }

        /// Returns `false` when the host does not provide this field
        pub fn $set(&mut self, value: jobjectArray) -> bool {
            // SAFETY: see the getter.
            match unsafe { self.$get.as_mut() } {
                Some(slot) => {
                    *slot = value;
                    true
                }
                None => false,
            }
        }
    };
}

/// Arguments for app process specialization
#[repr(C)]
#[derive(Debug)]
pub struct AppSpecializeArgs {
    // Required
    uid: *mut jint,
    gid: *mut jint,
    gids: *mut jintArray,
    runtime_flags: *mut jint,
    mount_external: *mut jint,
    se_info: *mut jstring,
    nice_name: *mut jstring,
    instruction_set: *mut jstring,
    app_data_dir: *mut jstring,

    // Optional
    is_child_zygote: *mut jboolean,
    is_top_app: *mut jboolean,
    pkg_data_info_list: *mut jobjectArray,
    whitelisted_data_info_list: *mut jobjectArray,
    mount_data_dirs: *mut jboolean,
    mount_storage_dirs: *mut jboolean,
}

impl AppSpecializeArgs {
    required_field!(
        /// Linux uid the process will run as
        uid, set_uid: jint
    );
    required_field!(gid, set_gid: jint);
    required_field!(
        /// Supplementary group ids (Java `int[]`)
        gids, set_gids: jintArray
    );
    required_field!(runtime_flags, set_runtime_flags: jint);
    required_field!(mount_external, set_mount_external: jint);
    required_field!(se_info, set_se_info: jstring);
    required_field!(
        /// Process name (Java `String`)
        nice_name, set_nice_name: jstring
    );
    required_field!(instruction_set, set_instruction_set: jstring);
    required_field!(app_data_dir, set_app_data_dir: jstring);

    optional_flag!(is_child_zygote, set_is_child_zygote);
    optional_flag!(is_top_app, set_is_top_app);
    optional_object!(pkg_data_info_list, set_pkg_data_info_list);
    optional_object!(whitelisted_data_info_list, set_whitelisted_data_info_list);
    optional_flag!(mount_data_dirs, set_mount_data_dirs);
    optional_flag!(mount_storage_dirs, set_mount_storage_dirs);
}

/// Arguments for system server specialization
#[repr(C)]
#[derive(Debug)]
pub struct ServerSpecializeArgs {
    uid: *mut jint,
    gid: *mut jint,
    gids: *mut jintArray,
    runtime_flags: *mut jint,
    permitted_capabilities: *mut jlong,
    effective_capabilities: *mut jlong,
}

impl ServerSpecializeArgs {
    required_field!(uid, set_uid: jint);
    required_field!(gid, set_gid: jint);
    required_field!(gids, set_gids: jintArray);
    required_field!(runtime_flags, set_runtime_flags: jint);
    required_field!(permitted_capabilities, set_permitted_capabilities: jlong);
    required_field!(effective_capabilities, set_effective_capabilities: jlong);
}

fn optional_ptr<T>(slot: &mut Option<T>) -> *mut T {
    slot.as_mut().map_or(ptr::null_mut(), |value| value as *mut T)
}

/// Owned backing store for [`AppSpecializeArgs`]
///
/// Used by hosts written in Rust, and by tests, to own the parameters a
/// view points into. `None` in an optional field produces a null pointer
/// in the view, the same as a platform that lacks the field.
#[derive(Debug, Clone)]
pub struct AppSpecializeStorage {
    pub uid: jint,
    pub gid: jint,
    pub gids: jintArray,
    pub runtime_flags: jint,
    pub mount_external: jint,
    pub se_info: jstring,
    pub nice_name: jstring,
    pub instruction_set: jstring,
    pub app_data_dir: jstring,
    pub is_child_zygote: Option<jboolean>,
    pub is_top_app: Option<jboolean>,
    pub pkg_data_info_list: Option<jobjectArray>,
    pub whitelisted_data_info_list: Option<jobjectArray>,
    pub mount_data_dirs: Option<jboolean>,
    pub mount_storage_dirs: Option<jboolean>,
}

impl AppSpecializeStorage {
    /// Number of optional fields, in declaration order
    pub const OPTIONAL_FIELDS: u32 = 6;

    /// Storage for `uid` with every optional field present
    pub fn new(uid: jint) -> Self {
        Self::with_optional_fields(uid, u32::MAX)
    }

    /// Storage where bit `i` of `mask` selects optional field `i`
    pub fn with_optional_fields(uid: jint, mask: u32) -> Self {
        let present = |bit: u32| mask & (1 << bit) != 0;
        Self {
            uid,
            gid: uid,
            gids: ptr::null_mut(),
            runtime_flags: 0,
            mount_external: 0,
            se_info: ptr::null_mut(),
            nice_name: ptr::null_mut(),
            instruction_set: ptr::null_mut(),
            app_data_dir: ptr::null_mut(),
            is_child_zygote: present(0).then_some(JNI_FALSE),
            is_top_app: present(1).then_some(JNI_FALSE),
            pkg_data_info_list: present(2).then_some(ptr::null_mut()),
            whitelisted_data_info_list: present(3).then_some(ptr::null_mut()),
            mount_data_dirs: present(4).then_some(JNI_FALSE),
            mount_storage_dirs: present(5).then_some(JNI_FALSE),
        }
    }

    /// Lend a view over this storage to `f`
    pub fn with_args<R>(&mut self, f: impl FnOnce(&mut AppSpecializeArgs) -> R) -> R {
        let mut args = AppSpecializeArgs {
            uid: &mut self.uid,
            gid: &mut self.gid,
            gids: &mut self.gids,
            runtime_flags: &mut self.runtime_flags,
            mount_external: &mut self.mount_external,
            se_info: &mut self.se_info,
            nice_name: &mut self.nice_name,
            instruction_set: &mut self.instruction_set,
            app_data_dir: &mut self.app_data_dir,
            is_child_zygote: optional_ptr(&mut self.is_child_zygote),
            is_top_app: optional_ptr(&mut self.is_top_app),
            pkg_data_info_list: optional_ptr(&mut self.pkg_data_info_list),
            whitelisted_data_info_list: optional_ptr(&mut self.whitelisted_data_info_list),
            mount_data_dirs: optional_ptr(&mut self.mount_data_dirs),
            mount_storage_dirs: optional_ptr(&mut self.mount_storage_dirs),
        };
        f(&mut args)
    }
}

/// Owned backing store for [`ServerSpecializeArgs`]
#[derive(Debug, Clone)]
pub struct ServerSpecializeStorage {
    pub uid: jint,
    pub gid: jint,
    pub gids: jintArray,
    pub runtime_flags: jint,
    pub permitted_capabilities: jlong,
    pub effective_capabilities: jlong,
}

impl ServerSpecializeStorage {
    pub fn new(uid: jint) -> Self {
        Self {
            uid,
            gid: uid,
            gids: ptr::null_mut(),
            runtime_flags: 0,
            permitted_capabilities: 0,
            effective_capabilities: 0,
        }
    }

    /// Lend a view over this storage to `f`
    pub fn with_args<R>(&mut self, f: impl FnOnce(&mut ServerSpecializeArgs) -> R) -> R {
        let mut args = ServerSpecializeArgs {
            uid: &mut self.uid,
            gid: &mut self.gid,
            gids: &mut self.gids,
            runtime_flags: &mut self.runtime_flags,
            permitted_capabilities: &mut self.permitted_capabilities,
            effective_capabilities: &mut self.effective_capabilities,
        };
        f(&mut args)
    }
}

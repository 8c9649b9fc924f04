//! Staged PLT hooks
//!
//! PLT hooks are declarative: registrations and exclusions accumulate and
//! nothing is patched until commit. The staging set here sits in front
//! of the host's primitives so identical registrations made before one
//! commit reach the host once.
//!
//! Patterns are interpreted by the host's own matcher. Only what cannot
//! cross the C boundary (empty strings, interior NULs) is refused here.

use std::collections::HashSet;
use std::ffi::c_void;
use std::sync::atomic::AtomicPtr;

use crate::module::traits::ModuleError;

/// A staged symbol replacement
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PltHook {
    /// Pattern over loaded library paths
    pub regex: String,
    pub symbol: String,
    pub new_func: usize,
    /// Address of the slot receiving the original function, 0 when unused
    pub old_func: usize,
}

/// A staged exclusion; `symbol: None` excludes every symbol
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PltExclusion {
    pub regex: String,
    pub symbol: Option<String>,
}

/// Hooks and exclusions waiting for the next commit
#[derive(Debug, Default)]
pub struct PltHookSet {
    hooks: Vec<PltHook>,
    exclusions: Vec<PltExclusion>,
    seen_hooks: HashSet<PltHook>,
    seen_exclusions: HashSet<PltExclusion>,
}

fn validate_pattern(regex: &str) -> Result<(), ModuleError> {
    if regex.is_empty() {
        return Err(ModuleError::InvalidPattern("empty pattern".to_string()));
    }
    if regex.contains('\0') {
        return Err(ModuleError::InvalidPattern(format!(
            "{:?} contains a NUL byte",
            regex
        )));
    }
    Ok(())
}

fn validate_symbol(symbol: &str) -> Result<(), ModuleError> {
    if symbol.is_empty() {
        return Err(ModuleError::InvalidArgument("empty symbol name".to_string()));
    }
    if symbol.contains('\0') {
        return Err(ModuleError::InvalidArgument(format!(
            "symbol {:?} contains a NUL byte",
            symbol
        )));
    }
    Ok(())
}

impl PltHookSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stage a hook; returns `false` if an identical one is already staged
    pub fn stage_hook(
        &mut self,
        regex: &str,
        symbol: &str,
        new_func: *mut c_void,
        old_func: Option<&'static AtomicPtr<c_void>>,
    ) -> Result<bool, ModuleError> {
        validate_pattern(regex)?;
        validate_symbol(symbol)?;
        if new_func.is_null() {
            return Err(ModuleError::InvalidArgument(format!(
                "replacement for {} is null",
                symbol
            )));
        }

        let hook = PltHook {
            regex: regex.to_string(),
            symbol: symbol.to_string(),
            new_func: new_func as usize,
            old_func: old_func.map_or(0, |slot| slot.as_ptr() as usize),
        };
        if !self.seen_hooks.insert(hook.clone()) {
            return Ok(false);
        }
        self.hooks.push(hook);
        Ok(true)
    }

    /// Stage an exclusion; returns `false` if an identical one is already staged
    pub fn stage_exclusion(&mut self, regex: &str, symbol: Option<&str>) -> Result<bool, ModuleError> {
        validate_pattern(regex)?;
        if let Some(symbol) = symbol {
            validate_symbol(symbol)?;
        }

        let exclusion = PltExclusion {
            regex: regex.to_string(),
            symbol: symbol.map(str::to_string),
        };
        if !self.seen_exclusions.insert(exclusion.clone()) {
            return Ok(false);
        }
        self.exclusions.push(exclusion);
        Ok(true)
    }

    pub fn hooks(&self) -> &[PltHook] {
        &self.hooks
    }

    pub fn exclusions(&self) -> &[PltExclusion] {
        &self.exclusions
    }

    pub fn is_empty(&self) -> bool {
        self.hooks.is_empty() && self.exclusions.is_empty()
    }

    /// Empty the staging area after a commit and return the committed hooks
    pub fn drain(&mut self) -> Vec<PltHook> {
        self.exclusions.clear();
        self.seen_hooks.clear();
        self.seen_exclusions.clear();
        std::mem::take(&mut self.hooks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn func(addr: usize) -> *mut c_void {
        addr as *mut c_void
    }

    #[test]
    fn test_identical_registration_staged_once() {
        let mut set = PltHookSet::new();
        assert!(set.stage_hook(r".*/libc\.so$", "open", func(0x10), None).unwrap());
        assert!(!set.stage_hook(r".*/libc\.so$", "open", func(0x10), None).unwrap());
        assert_eq!(set.hooks().len(), 1);
    }

    #[test]
    fn test_different_replacement_is_a_new_hook() {
        let mut set = PltHookSet::new();
        set.stage_hook("libc", "open", func(0x10), None).unwrap();
        set.stage_hook("libc", "open", func(0x20), None).unwrap();
        assert_eq!(set.hooks().len(), 2);
    }

    #[test]
    fn test_unrepresentable_input_rejected() {
        let mut set = PltHookSet::new();
        let err = set.stage_hook("lib\0c", "open", func(0x10), None).unwrap_err();
        assert!(matches!(err, ModuleError::InvalidPattern(_)));
        let err = set.stage_hook("libc", "op\0en", func(0x10), None).unwrap_err();
        assert!(matches!(err, ModuleError::InvalidArgument(_)));
        let err = set.stage_exclusion("libc", Some("")).unwrap_err();
        assert!(matches!(err, ModuleError::InvalidArgument(_)));
        assert!(set.is_empty());
    }

    #[test]
    fn test_pattern_dialect_left_to_host() {
        let mut set = PltHookSet::new();
        assert!(set.stage_hook("lib(c", "open", func(0x10), None).unwrap());
        assert!(set.stage_exclusion(r"[[:alpha:]]+\.so$", None).unwrap());
    }

    #[test]
    fn test_drain_resets_dedup() {
        let mut set = PltHookSet::new();
        set.stage_hook("libc", "open", func(0x10), None).unwrap();
        set.stage_exclusion("libwebview", None).unwrap();
        assert_eq!(set.drain().len(), 1);
        assert!(set.is_empty());
        assert!(set.stage_hook("libc", "open", func(0x10), None).unwrap());
    }
}

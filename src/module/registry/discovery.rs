//! Module discovery
//!
//! Scans the modules directory for modules that ship a library for the
//! daemon's ABI class. Layout per module:
//!
//! ```text
//! <modules_dir>/<id>/module.prop
//! <modules_dir>/<id>/zygisk/<abi>.so
//! <modules_dir>/<id>/disable      (optional marker, skips the module)
//! <modules_dir>/<id>/remove       (optional marker, skips the module)
//! ```
//!
//! Modules are returned sorted by id. A module's position in that list is
//! its index on the companion routing handshake, so the host and the
//! daemon must scan the same tree.

use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::module::ipc::protocol::AbiClass;
use crate::module::registry::manifest::ModuleProp;
use crate::module::traits::ModuleError;

const DISABLE_MARKER: &str = "disable";
const REMOVE_MARKER: &str = "remove";

/// Discovered module information
#[derive(Debug, Clone)]
pub struct DiscoveredModule {
    pub id: String,
    /// Module directory path
    pub directory: PathBuf,
    /// Library for the scanned ABI class
    pub library_path: PathBuf,
    /// Parsed `module.prop`, if present and valid
    pub prop: Option<ModuleProp>,
}

/// Module discovery scanner
pub struct ModuleDiscovery {
    modules_dir: PathBuf,
    abi: AbiClass,
}

impl ModuleDiscovery {
    pub fn new<P: AsRef<Path>>(modules_dir: P, abi: AbiClass) -> Self {
        Self {
            modules_dir: modules_dir.as_ref().to_path_buf(),
            abi,
        }
    }

    pub fn modules_dir(&self) -> &Path {
        &self.modules_dir
    }

    /// Discover all enabled modules, sorted by id
    pub fn discover_modules(&self) -> Result<Vec<DiscoveredModule>, ModuleError> {
        info!("Discovering modules in {:?}", self.modules_dir);

        if !self.modules_dir.exists() {
            debug!("Modules directory {:?} does not exist", self.modules_dir);
            return Ok(Vec::new());
        }

        let mut modules = Vec::new();
        for entry in fs::read_dir(&self.modules_dir)? {
            let path = entry?.path();
            if !path.is_dir() {
                continue;
            }
            if let Some(module) = self.inspect(&path) {
                modules.push(module);
            }
        }

        modules.sort_by(|a, b| a.id.cmp(&b.id));
        info!("Discovered {} module(s) for {}-bit", modules.len(), self.abi);
        Ok(modules)
    }

    /// Discover a specific module by id
    pub fn discover_module(&self, id: &str) -> Result<DiscoveredModule, ModuleError> {
        let directory = self.modules_dir.join(id);
        if !directory.is_dir() {
            return Err(ModuleError::ModuleNotFound(id.to_string()));
        }
        self.inspect(&directory)
            .ok_or_else(|| ModuleError::ModuleNotFound(format!("{} has no usable library", id)))
    }

    fn inspect(&self, directory: &Path) -> Option<DiscoveredModule> {
        let id = directory.file_name()?.to_string_lossy().into_owned();

        if directory.join(DISABLE_MARKER).exists() || directory.join(REMOVE_MARKER).exists() {
            debug!("Module {} is disabled, skipping", id);
            return None;
        }

        let library_path = directory.join("zygisk").join(self.abi.library_name());
        if !library_path.is_file() {
            debug!("Module {} has no {}, skipping", id, self.abi.library_name());
            return None;
        }

        let prop_path = directory.join("module.prop");
        let prop = if prop_path.exists() {
            match ModuleProp::from_file(&prop_path) {
                Ok(prop) => {
                    if prop.id != id {
                        warn!("module.prop id {} does not match directory {}", prop.id, id);
                    }
                    Some(prop)
                }
                Err(e) => {
                    warn!("Failed to parse module.prop of {}: {}", id, e);
                    None
                }
            }
        } else {
            None
        };

        Some(DiscoveredModule {
            id,
            directory: directory.to_path_buf(),
            library_path,
            prop,
        })
    }
}

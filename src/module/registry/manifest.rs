//! Module manifest parsing
//!
//! Handles parsing `module.prop`, the `key=value` metadata file at the
//! root of every module directory.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::module::traits::ModuleError;

/// Module metadata from `module.prop`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleProp {
    /// Module identifier, also its directory name
    pub id: String,
    pub name: String,
    pub version: String,
    pub version_code: Option<i64>,
    pub author: String,
    pub description: String,
}

impl ModuleProp {
    /// Parse `module.prop` contents
    ///
    /// Blank lines and `#` comments are skipped, unknown keys ignored.
    pub fn parse(contents: &str) -> Result<Self, ModuleError> {
        let mut prop = ModuleProp::default();
        for line in contents.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let Some((key, value)) = line.split_once('=') else {
                continue;
            };
            let value = value.trim().to_string();
            match key.trim() {
                "id" => prop.id = value,
                "name" => prop.name = value,
                "version" => prop.version = value,
                "versionCode" => {
                    prop.version_code = Some(value.parse().map_err(|_| {
                        ModuleError::InvalidManifest(format!("versionCode '{}' is not a number", value))
                    })?)
                }
                "author" => prop.author = value,
                "description" => prop.description = value,
                _ => {}
            }
        }

        if prop.id.is_empty() {
            return Err(ModuleError::InvalidManifest(
                "Module id cannot be empty".to_string(),
            ));
        }
        Ok(prop)
    }

    /// Load manifest from file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ModuleError> {
        let contents = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            ModuleError::InvalidManifest(format!("Failed to read module.prop: {}", e))
        })?;
        Self::parse(&contents)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_module_prop() {
        let prop = ModuleProp::parse(
            "# generated\nid=sample\nname=Sample Module\nversion=v1.2\nversionCode=12\n\
             author=someone\ndescription=Does a thing = well\nupdateJson=https://example.invalid\n",
        )
        .unwrap();
        assert_eq!(prop.id, "sample");
        assert_eq!(prop.name, "Sample Module");
        assert_eq!(prop.version_code, Some(12));
        assert_eq!(prop.description, "Does a thing = well");
    }

    #[test]
    fn test_missing_id_or_bad_version_code() {
        assert!(matches!(
            ModuleProp::parse("name=x\n"),
            Err(ModuleError::InvalidManifest(_))
        ));
        assert!(ModuleProp::parse("id=x\nversionCode=abc\n").is_err());
    }
}

//! Configuration for the companion daemon
//!
//! Loaded from TOML. Every field has a default, so an empty file (or no
//! file at all) yields a working configuration. Command-line flags of
//! `companiond` override file values.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::module::ipc::protocol::AbiClass;
use crate::module::traits::ModuleError;
use crate::utils::with_fallback;

/// Logging configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// `EnvFilter` directives; `RUST_LOG` still takes precedence
    #[serde(default)]
    pub filter: Option<String>,

    /// JSON output (needs the `json-logging` feature)
    #[serde(default)]
    pub json_format: bool,
}

/// Companion daemon configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompanionConfig {
    /// Directory containing one subdirectory per installed module
    #[serde(default = "default_modules_dir")]
    pub modules_dir: PathBuf,

    /// Directory for the per-ABI listening sockets
    #[serde(default = "default_socket_dir")]
    pub socket_dir: PathBuf,

    /// ABI class to serve; defaults to the daemon's own
    #[serde(default)]
    pub abi: Option<AbiClass>,

    #[serde(default)]
    pub logging: Option<LoggingConfig>,
}

fn default_modules_dir() -> PathBuf {
    PathBuf::from("/data/adb/modules")
}

fn default_socket_dir() -> PathBuf {
    PathBuf::from("/dev/socket/zygisk")
}

impl Default for CompanionConfig {
    fn default() -> Self {
        Self {
            modules_dir: default_modules_dir(),
            socket_dir: default_socket_dir(),
            abi: None,
            logging: None,
        }
    }
}

impl CompanionConfig {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ModuleError> {
        let contents = std::fs::read_to_string(path.as_ref())?;
        Ok(toml::from_str(&contents)?)
    }

    /// Load configuration, falling back to defaults if the file is
    /// missing or malformed
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref();
        if !path.exists() {
            return Self::default();
        }
        with_fallback(
            || Self::from_file(path),
            Self::default,
            &format!("Failed to load {}, using defaults", path.display()),
        )
    }

    /// ABI class this daemon serves
    pub fn abi(&self) -> AbiClass {
        self.abi.unwrap_or_else(AbiClass::current)
    }

    /// Listening socket for [`abi`](Self::abi)
    pub fn socket_path(&self) -> PathBuf {
        self.socket_dir.join(self.abi().socket_name())
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.modules_dir.as_os_str().is_empty() {
            return Err(anyhow::anyhow!("modules_dir must not be empty"));
        }
        if self.socket_dir.as_os_str().is_empty() {
            return Err(anyhow::anyhow!("socket_dir must not be empty"));
        }
        // sun_path holds 108 bytes including the terminator.
        let socket_len = self.socket_path().as_os_str().len();
        if socket_len >= 108 {
            return Err(anyhow::anyhow!(
                "socket path is {} bytes, longer than a Unix socket address allows",
                socket_len
            ));
        }
        Ok(())
    }
}

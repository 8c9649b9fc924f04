//! Random number demo module
//!
//! Before specialization each process asks its companion for a random
//! number, logs it, and asks to be unloaded afterwards. The module
//! installs no hooks, so nothing is left pointing into its code once the
//! library is unmapped.
//!
//! Install layout:
//!   <modules_dir>/random-module/module.prop
//!   <modules_dir>/random-module/zygisk/<abi>.so

use std::fs::File;
use std::io::{Read, Write};
use std::os::unix::net::UnixStream;
use std::sync::{Mutex, OnceLock};
use std::time::Duration;
use tracing::{info, warn};

use zygisk_module::module::abi::{AppSpecializeArgs, JNIEnv, ServerSpecializeArgs};
use zygisk_module::module::{Api, Module, ModuleError, ModuleOption};
use zygisk_module::utils::init_module_logging;
use zygisk_module::{register_companion, register_module};

const COMPANION_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Default)]
struct RandomModule {
    api: Option<Api>,
}

impl RandomModule {
    fn ask_companion(api: &Api) -> Result<u32, ModuleError> {
        let mut channel = api.connect_companion()?;
        channel.set_read_timeout(Some(COMPANION_TIMEOUT))?;
        let mut buf = [0u8; 4];
        channel.read_exact(&mut buf)?;
        Ok(u32::from_ne_bytes(buf))
    }

    fn pre_specialize(&mut self, process: &str) {
        let Some(api) = &self.api else {
            return;
        };

        match Self::ask_companion(api) {
            Ok(r) => info!("process=[{}], r=[{}]", process, r),
            Err(e) => warn!("process=[{}], no number from companion: {}", process, e),
        }

        api.set_option(ModuleOption::DlcloseModuleLibrary);
    }
}

impl Module for RandomModule {
    fn on_load(&mut self, api: Api, _env: *mut JNIEnv) {
        init_module_logging("random_module", None);
        self.api = Some(api);
    }

    fn pre_app_specialize(&mut self, args: &mut AppSpecializeArgs) {
        self.pre_specialize(&format!("uid {}", args.uid()));
    }

    fn pre_server_specialize(&mut self, _args: &mut ServerSpecializeArgs) {
        self.pre_specialize("system_server");
    }
}

fn urandom() -> Option<&'static Mutex<File>> {
    static URANDOM: OnceLock<Option<Mutex<File>>> = OnceLock::new();
    URANDOM
        .get_or_init(|| File::open("/dev/urandom").ok().map(Mutex::new))
        .as_ref()
}

/// Runs in the root daemon; may be called from several threads at once
fn companion_handler(client: &mut UnixStream) {
    let Some(source) = urandom() else {
        warn!("/dev/urandom unavailable");
        return;
    };

    let mut buf = [0u8; 4];
    let read = match source.lock() {
        Ok(mut file) => file.read_exact(&mut buf),
        Err(poisoned) => poisoned.into_inner().read_exact(&mut buf),
    };
    if let Err(e) = read {
        warn!("Failed to read /dev/urandom: {}", e);
        return;
    }

    info!("companion r=[{}]", u32::from_ne_bytes(buf));
    if let Err(e) = client.write_all(&buf) {
        warn!("Failed to send random number: {}", e);
    }
}

register_module!(RandomModule);
register_companion!(companion_handler);

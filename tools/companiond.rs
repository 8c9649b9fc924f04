//! Companion daemon
//!
//! Runs as root, one instance per ABI class. Maps every enabled module's
//! library, collects their companion handlers, and serves requests from
//! specializing processes until SIGTERM/SIGINT.
//!
//! Usage:
//!   companiond [--config <file>] [--modules-dir <dir>] [--socket-dir <dir>] [--abi 32|64]

use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;
use tracing::info;

use zygisk_module::config::CompanionConfig;
use zygisk_module::module::ipc::protocol::AbiClass;
use zygisk_module::module::{CompanionServer, ModuleDiscovery, ModuleLoader};
use zygisk_module::utils::{init_logging_from_config, wait_for_shutdown_signal};

const DEFAULT_CONFIG: &str = "/data/adb/zygisk/companion.toml";

#[derive(Parser, Debug)]
#[command(name = "companiond", about = "Root companion daemon for Zygisk modules")]
struct Args {
    /// Configuration file; a missing default file is not an error
    #[arg(long)]
    config: Option<PathBuf>,

    /// Directory containing installed modules
    #[arg(long)]
    modules_dir: Option<PathBuf>,

    /// Directory for the listening socket
    #[arg(long)]
    socket_dir: Option<PathBuf>,

    /// ABI class to serve (32 or 64)
    #[arg(long)]
    abi: Option<AbiClass>,

    /// Log filter, overridden by RUST_LOG
    #[arg(long)]
    log_filter: Option<String>,
}

fn load_config(args: &Args) -> anyhow::Result<CompanionConfig> {
    let mut config = match &args.config {
        Some(path) => CompanionConfig::from_file(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => CompanionConfig::load_or_default(DEFAULT_CONFIG),
    };

    if let Some(dir) = &args.modules_dir {
        config.modules_dir = dir.clone();
    }
    if let Some(dir) = &args.socket_dir {
        config.socket_dir = dir.clone();
    }
    if let Some(abi) = args.abi {
        config.abi = Some(abi);
    }
    if let Some(filter) = &args.log_filter {
        config.logging.get_or_insert_with(Default::default).filter = Some(filter.clone());
    }

    config.validate()?;
    Ok(config)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let config = load_config(&args)?;
    init_logging_from_config(config.logging.as_ref());

    let abi = config.abi();
    info!("Companion daemon starting for {}-bit modules", abi);

    let modules = ModuleDiscovery::new(&config.modules_dir, abi)
        .discover_modules()
        .context("Failed to scan modules directory")?;
    let registry = ModuleLoader::load_companions(&modules);

    let server = CompanionServer::new(config.socket_path(), registry);
    let listener = server.bind().context("Failed to bind companion socket")?;
    server
        .serve_with_shutdown(listener, async {
            let signal = wait_for_shutdown_signal().await;
            info!("Received {}, shutting down", signal);
        })
        .await
        .context("Companion daemon failed")?;

    info!("Companion daemon stopped");
    Ok(())
}

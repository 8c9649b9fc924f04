//! Companion daemon server
//!
//! Accepts connections from specializing processes, routes each one to
//! the handler of the module it names, and runs handlers concurrently.
//! One connection is one request; the handler owns the stream from the
//! ack onwards.

use std::future::Future;
use std::os::unix::net::UnixStream as StdUnixStream;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::net::{UnixListener, UnixStream};
use tracing::{debug, error, info, warn};

use crate::module::ipc::protocol::{read_module_index_async, write_ack_async};
use crate::module::traits::ModuleError;

/// Handles one companion request
///
/// Called from many threads at once; implementations synchronize their
/// own shared state. The stream is blocking.
pub trait CompanionHandler: Send + Sync {
    fn handle(&self, client: StdUnixStream);
}

impl<F> CompanionHandler for F
where
    F: Fn(StdUnixStream) + Send + Sync,
{
    fn handle(&self, client: StdUnixStream) {
        self(client)
    }
}

/// Companion handlers by module index
///
/// Indices follow module load order. A module without a companion keeps
/// its slot so later indices stay aligned.
#[derive(Default, Clone)]
pub struct CompanionRegistry {
    handlers: Vec<Option<Arc<dyn CompanionHandler>>>,
}

impl CompanionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append the next module's handler and return its index
    pub fn push(&mut self, handler: Option<Arc<dyn CompanionHandler>>) -> i32 {
        self.handlers.push(handler);
        (self.handlers.len() - 1) as i32
    }

    pub fn get(&self, index: i32) -> Option<Arc<dyn CompanionHandler>> {
        let index = usize::try_from(index).ok()?;
        self.handlers.get(index).cloned().flatten()
    }

    /// Number of module slots, with or without a handler
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    pub fn handler_count(&self) -> usize {
        self.handlers.iter().filter(|h| h.is_some()).count()
    }
}

impl std::fmt::Debug for CompanionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompanionRegistry")
            .field("modules", &self.len())
            .field("handlers", &self.handler_count())
            .finish()
    }
}

/// Companion daemon listening on one ABI class socket
pub struct CompanionServer {
    socket_path: PathBuf,
    registry: Arc<CompanionRegistry>,
}

impl CompanionServer {
    pub fn new<P: AsRef<Path>>(socket_path: P, registry: CompanionRegistry) -> Self {
        Self {
            socket_path: socket_path.as_ref().to_path_buf(),
            registry: Arc::new(registry),
        }
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Bind the listening socket, replacing a stale one
    pub fn bind(&self) -> Result<UnixListener, ModuleError> {
        if self.socket_path.exists() {
            std::fs::remove_file(&self.socket_path).map_err(|e| {
                ModuleError::IpcError(format!("Failed to remove old socket: {}", e))
            })?;
        }

        if let Some(parent) = self.socket_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                ModuleError::IpcError(format!("Failed to create socket directory: {}", e))
            })?;
        }

        let listener = UnixListener::bind(&self.socket_path)
            .map_err(|e| ModuleError::IpcError(format!("Failed to bind socket: {}", e)))?;
        info!(
            "Companion daemon listening on {:?} ({} handler(s))",
            self.socket_path,
            self.registry.handler_count()
        );
        Ok(listener)
    }

    /// Bind and serve until the process exits
    pub async fn start(&self) -> Result<(), ModuleError> {
        let listener = self.bind()?;
        self.serve(listener).await
    }

    /// Serve connections from an already bound listener
    pub async fn serve(&self, listener: UnixListener) -> Result<(), ModuleError> {
        self.serve_with_shutdown(listener, std::future::pending()).await
    }

    /// Serve until `shutdown` resolves
    ///
    /// Stops accepting new connections; handlers already running finish
    /// on their own.
    pub async fn serve_with_shutdown<F>(
        &self,
        listener: UnixListener,
        shutdown: F,
    ) -> Result<(), ModuleError>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Companion daemon shutting down");
                    break;
                }
                accepted = listener.accept() => match accepted {
                    Ok((stream, _)) => {
                        debug!("New companion connection");
                        let registry = Arc::clone(&self.registry);
                        tokio::spawn(handle_connection(registry, stream));
                    }
                    Err(e) => {
                        error!("Failed to accept companion connection: {}", e);
                    }
                },
            }
        }

        if let Err(e) = std::fs::remove_file(&self.socket_path) {
            debug!("Socket {:?} not removed: {}", self.socket_path, e);
        }
        Ok(())
    }
}

async fn handle_connection(registry: Arc<CompanionRegistry>, mut stream: UnixStream) {
    let index = match read_module_index_async(&mut stream).await {
        Ok(index) => index,
        Err(e) => {
            debug!("Companion client left before naming a module: {}", e);
            return;
        }
    };

    let Some(handler) = registry.get(index) else {
        warn!("No companion handler for module {}", index);
        return;
    };

    if let Err(e) = write_ack_async(&mut stream).await {
        warn!("Failed to acknowledge module {}: {}", index, e);
        return;
    }

    let client = match stream.into_std().and_then(|s| {
        s.set_nonblocking(false)?;
        Ok(s)
    }) {
        Ok(client) => client,
        Err(e) => {
            error!("Failed to hand off companion stream: {}", e);
            return;
        }
    };

    if let Err(e) = tokio::task::spawn_blocking(move || handler.handle(client)).await {
        error!("Companion handler for module {} panicked: {}", index, e);
    }
}

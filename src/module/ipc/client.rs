//! Companion client side
//!
//! [`CompanionChannel`] is what a module gets back from
//! `Api::connect_companion`. [`CompanionConnector`] is the host half of
//! that call: it reaches the daemon for the right ABI class and performs
//! the routing handshake.

use std::ffi::c_int;
use std::io::{self, Read, Write};
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, FromRawFd, IntoRawFd, RawFd};
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};

use crate::module::ipc::protocol::{read_ack, write_module_index, AbiClass};
use crate::module::traits::ModuleError;

/// Open byte channel to a module's companion handler
///
/// Framing is up to the module and its handler. Dropping the channel
/// closes the connection.
#[derive(Debug)]
pub struct CompanionChannel {
    stream: UnixStream,
}

impl CompanionChannel {
    pub fn from_stream(stream: UnixStream) -> Self {
        Self { stream }
    }

    /// Bound blocking reads; there is no timeout by default
    pub fn set_read_timeout(&self, timeout: Option<Duration>) -> io::Result<()> {
        self.stream.set_read_timeout(timeout)
    }

    /// Signal end of request while still reading the reply
    pub fn finish_writing(&self) -> io::Result<()> {
        self.stream.shutdown(std::net::Shutdown::Write)
    }
}

impl Read for CompanionChannel {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.stream.read(buf)
    }
}

impl Write for CompanionChannel {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.stream.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.stream.flush()
    }
}

impl FromRawFd for CompanionChannel {
    unsafe fn from_raw_fd(fd: RawFd) -> Self {
        Self::from_stream(UnixStream::from_raw_fd(fd))
    }
}

impl AsRawFd for CompanionChannel {
    fn as_raw_fd(&self) -> RawFd {
        self.stream.as_raw_fd()
    }
}

impl AsFd for CompanionChannel {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.stream.as_fd()
    }
}

impl IntoRawFd for CompanionChannel {
    fn into_raw_fd(self) -> RawFd {
        self.stream.into_raw_fd()
    }
}

/// Connects specializing processes to the companion daemon
#[derive(Debug, Clone)]
pub struct CompanionConnector {
    socket_path: PathBuf,
}

impl CompanionConnector {
    pub fn new<P: AsRef<Path>>(socket_path: P) -> Self {
        Self {
            socket_path: socket_path.as_ref().to_path_buf(),
        }
    }

    /// Connector for the daemon serving `abi` under `socket_dir`
    pub fn for_abi<P: AsRef<Path>>(socket_dir: P, abi: AbiClass) -> Self {
        Self::new(socket_dir.as_ref().join(abi.socket_name()))
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Connect to the handler for module `index`
    ///
    /// Blocks until the daemon answers the handshake.
    pub fn connect(&self, index: i32) -> Result<UnixStream, ModuleError> {
        let mut stream = UnixStream::connect(&self.socket_path).map_err(|e| {
            ModuleError::CompanionUnavailable(format!(
                "cannot reach {}: {}",
                self.socket_path.display(),
                e
            ))
        })?;

        write_module_index(&mut stream, index)
            .map_err(|e| ModuleError::IpcError(format!("Failed to send module index: {}", e)))?;
        let accepted = read_ack(&mut stream)
            .map_err(|e| ModuleError::IpcError(format!("Failed to read handshake: {}", e)))?;
        if !accepted {
            return Err(ModuleError::CompanionRejected(index));
        }

        debug!("Companion accepted module {}", index);
        Ok(stream)
    }

    /// Same as [`connect`](Self::connect), in the table's raw form
    ///
    /// Returns an owned fd, or `-1` on any failure.
    pub fn connect_raw(&self, index: i32) -> c_int {
        match self.connect(index) {
            Ok(stream) => stream.into_raw_fd(),
            Err(e) => {
                warn!("Companion connection for module {} failed: {}", index, e);
                -1
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_daemon_is_unavailable() {
        let dir = TempDir::new().unwrap();
        let connector = CompanionConnector::for_abi(dir.path(), AbiClass::Bits64);
        assert!(connector.socket_path().ends_with("companion64.sock"));
        assert!(matches!(
            connector.connect(0),
            Err(ModuleError::CompanionUnavailable(_))
        ));
        assert_eq!(connector.connect_raw(0), -1);
    }

    #[test]
    fn test_channel_reads_and_writes() {
        let (a, mut b) = UnixStream::pair().unwrap();
        let mut channel = CompanionChannel::from_stream(a);
        channel.write_all(b"ping").unwrap();
        channel.finish_writing().unwrap();

        let mut request = Vec::new();
        b.read_to_end(&mut request).unwrap();
        assert_eq!(request, b"ping");

        b.write_all(b"pong").unwrap();
        let mut reply = [0u8; 4];
        channel.read_exact(&mut reply).unwrap();
        assert_eq!(&reply, b"pong");
    }

    #[test]
    fn test_read_timeout_bounds_silent_companion() {
        let (a, _silent) = UnixStream::pair().unwrap();
        let mut channel = CompanionChannel::from_stream(a);
        channel
            .set_read_timeout(Some(Duration::from_millis(50)))
            .unwrap();

        let mut buf = [0u8; 4];
        let err = channel.read_exact(&mut buf).unwrap_err();
        assert!(matches!(
            err.kind(),
            io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
        ));
    }
}

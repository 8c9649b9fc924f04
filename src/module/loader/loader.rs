//! Module library loading
//!
//! Handles mapping module libraries, resolving their entry symbols, and
//! turning exported companion entries into daemon handlers.

use std::ffi::{c_int, c_void, CStr, CString};
use std::os::fd::{IntoRawFd, RawFd};
use std::os::unix::ffi::OsStrExt;
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};
use std::ptr::NonNull;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::module::abi::{
    CompanionEntryFn, ModuleEntryFn, COMPANION_ENTRY_SYMBOL, MODULE_ENTRY_SYMBOL,
};
use crate::module::ipc::server::{CompanionHandler, CompanionRegistry};
use crate::module::registry::discovery::DiscoveredModule;
use crate::module::traits::ModuleError;
use crate::utils::log_error;

fn last_dl_error() -> String {
    // SAFETY: dlerror returns null or a NUL-terminated thread-local string.
    let message = unsafe { libc::dlerror() };
    if message.is_null() {
        "unknown dynamic loader error".to_string()
    } else {
        // SAFETY: checked for null above.
        unsafe { CStr::from_ptr(message) }.to_string_lossy().into_owned()
    }
}

/// A mapped module library; unmapped on drop
#[derive(Debug)]
pub struct ModuleLibrary {
    handle: NonNull<c_void>,
    path: PathBuf,
}

// SAFETY: a dlopen handle is a process-global token; dlsym and dlclose
// are thread-safe.
unsafe impl Send for ModuleLibrary {}
unsafe impl Sync for ModuleLibrary {}

impl ModuleLibrary {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, ModuleError> {
        let path = path.as_ref();
        let c_path = CString::new(path.as_os_str().as_bytes())?;
        // SAFETY: valid NUL-terminated path.
        let handle = unsafe { libc::dlopen(c_path.as_ptr(), libc::RTLD_NOW | libc::RTLD_LOCAL) };
        let handle = NonNull::new(handle).ok_or_else(|| {
            ModuleError::LibraryError(format!("{}: {}", path.display(), last_dl_error()))
        })?;

        debug!("Mapped module library {:?}", path);
        Ok(Self {
            handle,
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Look up a NUL-terminated symbol name
    pub fn symbol(&self, name: &[u8]) -> Option<NonNull<c_void>> {
        let name = CStr::from_bytes_with_nul(name).ok()?;
        // SAFETY: handle is live for `self`'s lifetime.
        NonNull::new(unsafe { libc::dlsym(self.handle.as_ptr(), name.as_ptr()) })
    }

    pub fn module_entry(&self) -> Option<ModuleEntryFn> {
        let symbol = self.symbol(MODULE_ENTRY_SYMBOL)?;
        // SAFETY: the exported symbol has this signature by contract.
        Some(unsafe { std::mem::transmute::<*mut c_void, ModuleEntryFn>(symbol.as_ptr()) })
    }

    pub fn companion_entry(&self) -> Option<CompanionEntryFn> {
        let symbol = self.symbol(COMPANION_ENTRY_SYMBOL)?;
        // SAFETY: as above.
        Some(unsafe { std::mem::transmute::<*mut c_void, CompanionEntryFn>(symbol.as_ptr()) })
    }
}

impl Drop for ModuleLibrary {
    fn drop(&mut self) {
        // SAFETY: handle came from dlopen and is closed exactly once.
        if unsafe { libc::dlclose(self.handle.as_ptr()) } != 0 {
            warn!("dlclose of {:?} failed: {}", self.path, last_dl_error());
        }
    }
}

fn file_identity(fd: RawFd) -> Option<(u64, u64)> {
    nix::sys::stat::fstat(fd)
        .ok()
        .map(|st| (st.st_dev as u64, st.st_ino as u64))
}

/// Companion handler backed by a module's `zygisk_companion_entry`
pub struct LibraryCompanion {
    id: String,
    entry: CompanionEntryFn,
    // Keeps `entry` mapped.
    _library: Option<Arc<ModuleLibrary>>,
}

impl LibraryCompanion {
    pub fn new(id: impl Into<String>, library: Arc<ModuleLibrary>) -> Result<Self, ModuleError> {
        let id = id.into();
        let entry = library
            .companion_entry()
            .ok_or_else(|| ModuleError::LibraryError(format!("{} exports no companion entry", id)))?;
        Ok(Self {
            id,
            entry,
            _library: Some(library),
        })
    }

    /// Wrap an entry that lives in an image which is never unmapped
    pub fn from_entry(id: impl Into<String>, entry: CompanionEntryFn) -> Self {
        Self {
            id: id.into(),
            entry,
            _library: None,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }
}

impl CompanionHandler for LibraryCompanion {
    fn handle(&self, client: UnixStream) {
        let fd = client.into_raw_fd();
        let before = file_identity(fd);
        // SAFETY: `fd` is an open socket for the duration of the call.
        unsafe { (self.entry)(fd as c_int) };

        // The handler may have closed the fd, and the number may even have
        // been reused since. Only close it if it is still our socket.
        match (before, file_identity(fd)) {
            (Some(before), Some(after)) if before == after => {
                if let Err(e) = nix::unistd::close(fd) {
                    debug!("Closing companion fd for {} failed: {}", self.id, e);
                }
            }
            _ => debug!("Companion handler of {} closed its fd", self.id),
        }
    }
}

/// Module loader for the companion daemon
pub struct ModuleLoader;

impl ModuleLoader {
    /// Map every discovered module and collect its companion handler
    ///
    /// A module that fails to load or exports no companion still takes
    /// its slot, so indices match the discovery order.
    pub fn load_companions(modules: &[DiscoveredModule]) -> CompanionRegistry {
        let mut registry = CompanionRegistry::new();
        for module in modules {
            let handler = log_error(
                || ModuleLibrary::open(&module.library_path),
                &format!("Failed to load module {}", module.id),
            )
            .and_then(|library| LibraryCompanion::new(module.id.clone(), Arc::new(library)).ok())
            .map(|companion| Arc::new(companion) as Arc<dyn CompanionHandler>);

            let has_handler = handler.is_some();
            let index = registry.push(handler);
            debug!(
                "Module {} at index {} (companion: {})",
                module.id, index, has_handler
            );
        }
        info!(
            "Loaded {} companion(s) from {} module(s)",
            registry.handler_count(),
            registry.len()
        );
        registry
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{ErrorKind, Read, Write};
    use std::os::fd::{AsRawFd, FromRawFd};
    use std::sync::atomic::{AtomicI32, Ordering};
    use std::time::Duration;

    static REPLACEMENT_FD: AtomicI32 = AtomicI32::new(-1);

    unsafe extern "C" fn greet_and_return(fd: c_int) {
        libc::write(fd, b"hi".as_ptr().cast(), 2);
    }

    // Closes the client and leaves another socket on the same number.
    unsafe extern "C" fn close_and_reuse(fd: c_int) {
        libc::dup2(REPLACEMENT_FD.load(Ordering::SeqCst), fd);
    }

    fn assert_peer_closed(peer: &mut UnixStream) {
        peer.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
        let mut rest = Vec::new();
        match peer.read_to_end(&mut rest) {
            Ok(_) => {}
            Err(e) if e.kind() == ErrorKind::ConnectionReset => {}
            Err(e) => panic!("peer still open: {}", e),
        }
    }

    #[test]
    fn test_open_missing_library_fails() {
        let err = ModuleLibrary::open("/nonexistent/zygisk/x86_64.so").unwrap_err();
        assert!(matches!(err, ModuleError::LibraryError(_)));
    }

    #[test]
    fn test_unloadable_modules_keep_their_slot() {
        let modules = vec![DiscoveredModule {
            id: "broken".to_string(),
            directory: PathBuf::from("/nonexistent"),
            library_path: PathBuf::from("/nonexistent/zygisk/lib.so"),
            prop: None,
        }];
        let registry = ModuleLoader::load_companions(&modules);
        assert_eq!(registry.len(), 1);
        assert!(registry.get(0).is_none());
    }

    #[test]
    fn test_file_identity_tracks_socket() {
        let (a, _b) = UnixStream::pair().unwrap();
        let (c, _d) = UnixStream::pair().unwrap();
        let fd = a.into_raw_fd();
        let first = file_identity(fd).unwrap();
        assert_eq!(file_identity(fd), Some(first));
        assert_ne!(file_identity(c.as_raw_fd()), Some(first));
        nix::unistd::close(fd).unwrap();
    }

    #[test]
    fn test_fd_closed_after_handler_returns() {
        let companion = LibraryCompanion::from_entry("greeter", greet_and_return);
        let (client, mut peer) = UnixStream::pair().unwrap();

        companion.handle(client);

        let mut greeting = [0u8; 2];
        peer.read_exact(&mut greeting).unwrap();
        assert_eq!(&greeting, b"hi");
        assert_peer_closed(&mut peer);
    }

    #[test]
    fn test_reused_fd_is_left_open() {
        let (replacement, mut replacement_peer) = UnixStream::pair().unwrap();
        let replacement_identity = file_identity(replacement.as_raw_fd()).unwrap();
        REPLACEMENT_FD.store(replacement.as_raw_fd(), Ordering::SeqCst);
        let companion = LibraryCompanion::from_entry("reuser", close_and_reuse);
        let (client, mut peer) = UnixStream::pair().unwrap();
        let fd = client.as_raw_fd();

        companion.handle(client);

        assert_peer_closed(&mut peer);
        // The number now names the replacement socket and must still work.
        assert_eq!(file_identity(fd), Some(replacement_identity));
        let mut reused = unsafe { UnixStream::from_raw_fd(fd) };
        reused.write_all(b"ok").unwrap();
        let mut buf = [0u8; 2];
        replacement_peer.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"ok");
    }
}

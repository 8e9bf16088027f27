//! Socket Endpoint lifecycle: `Created -> Bound -> Listening`.
//!
//! The standard library's `UnixListener::bind` fuses socket creation, bind and
//! listen with a fixed backlog, so the steps are done here with `libc` and the
//! finished descriptor is handed to a `UnixListener`.

use std::fs;
use std::io;
use std::mem;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};
use std::os::unix::ffi::OsStrExt;
use std::os::unix::fs::MetadataExt;
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::error::{EndpointError, Op};

// Removes the endpoint's filesystem entry when the owning endpoint goes away.
// Only created after a successful bind, so a failed bind never removes an
// entry that belongs to another live listener. The entry's device and inode
// are recorded at bind time: if another server has since reclaimed the path,
// its socket file is left alone.
#[derive(Debug)]
struct EndpointGuard {
    path: PathBuf,
    dev: u64,
    ino: u64,
}

impl EndpointGuard {
    fn new(path: &Path) -> io::Result<Self> {
        let meta = fs::symlink_metadata(path)?;
        Ok(EndpointGuard {
            path: path.to_path_buf(),
            dev: meta.dev(),
            ino: meta.ino(),
        })
    }

    fn still_ours(&self) -> io::Result<bool> {
        match fs::symlink_metadata(&self.path) {
            Ok(meta) => Ok(meta.dev() == self.dev && meta.ino() == self.ino),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e),
        }
    }
}

impl Drop for EndpointGuard {
    fn drop(&mut self) {
        match self.still_ours() {
            Ok(true) => match remove_stale(&self.path) {
                Ok(()) => debug!(path = ?self.path, "Removed socket file"),
                Err(e) => warn!(path = ?self.path, error = %e, "Failed to remove socket file"),
            },
            Ok(false) => debug!(path = ?self.path, "Socket file gone or replaced, leaving it"),
            Err(e) => warn!(path = ?self.path, error = %e, "Failed to inspect socket file"),
        }
    }
}

/// Removes an existing entry at `path`, treating "not found" as success.
fn remove_stale(path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

/// A socket bound to its path but not yet accepting connections.
#[derive(Debug)]
pub struct BoundEndpoint {
    fd: OwnedFd,
    guard: EndpointGuard,
}

/// A listening socket. Dropping it closes the socket and unlinks the path.
#[derive(Debug)]
pub struct Endpoint {
    listener: UnixListener,
    guard: EndpointGuard,
}

/// Reclaims `path` from a previous run and binds a fresh stream socket to it.
pub fn prepare_endpoint(path: impl AsRef<Path>) -> Result<BoundEndpoint, EndpointError> {
    let path = path.as_ref();
    remove_stale(path).map_err(|e| EndpointError::new(Op::Remove, path, e))?;
    bind(path)
}

/// Binds a stream socket to `path` without touching an existing entry.
///
/// Fails with `AddrInUse` when another listener (or a stale file) holds the
/// path.
pub fn bind(path: impl AsRef<Path>) -> Result<BoundEndpoint, EndpointError> {
    let path = path.as_ref();
    let addr = socket_addr(path).map_err(|e| EndpointError::new(Op::Bind, path, e))?;

    let raw = unsafe { libc::socket(libc::AF_UNIX, libc::SOCK_STREAM, 0) };
    if raw < 0 {
        return Err(EndpointError::new(
            Op::Socket,
            path,
            io::Error::last_os_error(),
        ));
    }
    let fd = unsafe { OwnedFd::from_raw_fd(raw) };
    debug!("Master socket created");

    let ret = unsafe {
        libc::bind(
            fd.as_raw_fd(),
            &addr as *const libc::sockaddr_un as *const libc::sockaddr,
            mem::size_of::<libc::sockaddr_un>() as libc::socklen_t,
        )
    };
    if ret < 0 {
        return Err(EndpointError::new(
            Op::Bind,
            path,
            io::Error::last_os_error(),
        ));
    }
    debug!(path = ?path, "bind() succeeded");

    let guard = EndpointGuard::new(path).map_err(|e| EndpointError::new(Op::Bind, path, e))?;
    Ok(BoundEndpoint { fd, guard })
}

fn socket_addr(path: &Path) -> io::Result<libc::sockaddr_un> {
    let bytes = path.as_os_str().as_bytes();
    let mut addr: libc::sockaddr_un = unsafe { mem::zeroed() };
    addr.sun_family = libc::AF_UNIX as libc::sa_family_t;
    // One byte is kept for the terminating NUL.
    if bytes.len() >= addr.sun_path.len() {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            "socket path too long",
        ));
    }
    if bytes.contains(&0) {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            "socket path contains a NUL byte",
        ));
    }
    for (dst, &src) in addr.sun_path.iter_mut().zip(bytes) {
        *dst = src as libc::c_char;
    }
    Ok(addr)
}

impl BoundEndpoint {
    /// Marks the socket ready to queue up to `backlog` pending connections.
    pub fn listen(self, backlog: i32) -> Result<Endpoint, EndpointError> {
        let ret = unsafe { libc::listen(self.fd.as_raw_fd(), backlog) };
        if ret < 0 {
            return Err(EndpointError::new(
                Op::Listen,
                &self.guard.path,
                io::Error::last_os_error(),
            ));
        }
        info!(path = ?self.guard.path, backlog, "Socket is listening");
        Ok(Endpoint {
            listener: UnixListener::from(self.fd),
            guard: self.guard,
        })
    }
}

impl Endpoint {
    pub fn path(&self) -> &Path {
        &self.guard.path
    }

    /// Blocks until a client connects.
    pub fn accept(&self) -> io::Result<UnixStream> {
        self.listener.accept().map(|(stream, _)| stream)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overlong_path_is_rejected_on_bind() {
        let long = "/tmp/".to_string() + &"x".repeat(200);
        let err = bind(&long).unwrap_err();
        assert_eq!(err.op, Op::Bind);
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
    }

    #[test]
    fn drop_unlinks_socket_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("endpoint.sock");
        let endpoint = prepare_endpoint(&path).unwrap().listen(4).unwrap();
        assert!(path.exists());
        drop(endpoint);
        assert!(!path.exists());
    }

    #[test]
    fn prepare_reclaims_stale_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stale.sock");
        fs::write(&path, b"left over").unwrap();
        let endpoint = prepare_endpoint(&path).unwrap().listen(4).unwrap();
        assert_eq!(endpoint.path(), path.as_path());
    }

    #[test]
    fn drop_leaves_reclaimed_path_alone() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("shared.sock");
        let first = prepare_endpoint(&path).unwrap().listen(4).unwrap();
        let second = prepare_endpoint(&path).unwrap().listen(4).unwrap();

        drop(first);
        assert!(path.exists());
        let _client = UnixStream::connect(&path).unwrap();
        second.accept().unwrap();

        drop(second);
        assert!(!path.exists());
    }
}

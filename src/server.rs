//! Listener/Dispatcher and the per-connection Summation Session.

use std::collections::HashMap;
use std::io::{ErrorKind, Read, Write};
use std::net::Shutdown;
use std::os::unix::net::UnixStream;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;

use tracing::{debug, error, info, info_span, warn};

use crate::endpoint::Endpoint;
use crate::error::{Op, ServeError, SessionError};
use crate::protocol::{self, Accumulator, TERMINATOR};

/// How accepted connections are dispatched.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ServeMode {
    /// One session at a time; later clients wait in the backlog.
    #[default]
    Sequential,
    /// Each session runs on its own thread.
    Concurrent,
}

///////////////////////////////////////////// Shutdown /////////////////////////////////////////////

// Cancellation flag plus a clone of every open session's stream, so a
// shutdown can unblock sessions stuck in a read.
#[derive(Debug, Default)]
struct ShutdownState {
    requested: AtomicBool,
    open: Mutex<HashMap<u64, UnixStream>>,
}

impl ShutdownState {
    fn open_sessions(&self) -> MutexGuard<'_, HashMap<u64, UnixStream>> {
        // A panicking session thread leaves the map itself intact.
        self.open.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Records a session's stream. Returns false, and records nothing, once
    /// shutdown has been requested.
    fn register(&self, id: u64, stream: UnixStream) -> bool {
        let mut open = self.open_sessions();
        if self.requested.load(Ordering::Acquire) {
            return false;
        }
        open.insert(id, stream);
        true
    }

    fn release(&self, id: u64) {
        self.open_sessions().remove(&id);
    }

    fn cancel(&self) -> bool {
        if self.requested.swap(true, Ordering::AcqRel) {
            return false;
        }
        for (id, stream) in self.open_sessions().drain() {
            if let Err(e) = stream.shutdown(Shutdown::Both) {
                debug!(session = id, error = %e, "Failed to shut down session stream");
            }
        }
        true
    }

    fn canceled(&self) -> bool {
        self.requested.load(Ordering::Acquire)
    }
}

/// Stops a running [`Server`] from another thread or a signal handler.
#[derive(Clone, Debug)]
pub struct ShutdownHandle {
    state: Arc<ShutdownState>,
    path: PathBuf,
}

impl ShutdownHandle {
    /// Requests shutdown, cuts off every open session and wakes the blocked
    /// `accept`. Never blocks. Calling it more than once has no further
    /// effect.
    pub fn trigger(&self) {
        if !self.state.cancel() {
            return;
        }
        // The backlog may be full, in which case connect blocks until the
        // listener closes. Keep that off the caller's thread.
        let path = self.path.clone();
        thread::spawn(move || {
            if let Err(e) = UnixStream::connect(&path) {
                debug!(error = %e, "Wake-up connection failed");
            }
        });
    }

    pub fn is_triggered(&self) -> bool {
        self.state.canceled()
    }
}

////////////////////////////////////////////// Server //////////////////////////////////////////////

pub struct Server {
    endpoint: Endpoint,
    mode: ServeMode,
    state: Arc<ShutdownState>,
}

impl Server {
    pub fn new(endpoint: Endpoint) -> Self {
        Server {
            endpoint,
            mode: ServeMode::Sequential,
            state: Arc::new(ShutdownState::default()),
        }
    }

    pub fn with_mode(mut self, mode: ServeMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            state: Arc::clone(&self.state),
            path: self.endpoint.path().to_path_buf(),
        }
    }

    /// Accepts connections until shutdown is requested or `accept` fails.
    ///
    /// A failing session is logged and its connection closed; the loop keeps
    /// going. The endpoint is unlinked when this returns, either way.
    pub fn serve_forever(self) -> Result<(), ServeError> {
        let mut next_session: u64 = 0;
        loop {
            debug!("Waiting on accept()");
            let stream = match self.endpoint.accept() {
                Ok(stream) => stream,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => {
                    error!(error = %e, "Accept failed");
                    return Err(ServeError::Accept(e));
                }
            };

            if self.state.canceled() {
                info!("Shutdown requested, stopping accept loop");
                break;
            }

            next_session += 1;
            let id = next_session;
            let control = match stream.try_clone() {
                Ok(control) => control,
                Err(e) => {
                    warn!(session = id, error = %e, "Failed to clone session stream, dropping client");
                    continue;
                }
            };
            if !self.state.register(id, control) {
                info!("Shutdown requested, stopping accept loop");
                break;
            }

            match self.mode {
                ServeMode::Sequential => handle_connection(&self.state, id, stream),
                ServeMode::Concurrent => {
                    let state = Arc::clone(&self.state);
                    // Detached: a stalled client only holds its own thread.
                    thread::spawn(move || handle_connection(&state, id, stream));
                }
            }
        }
        info!(path = ?self.endpoint.path(), "Connection closed");
        Ok(())
    }
}

fn handle_connection(state: &ShutdownState, id: u64, mut stream: UnixStream) {
    let span = info_span!("session", id);
    let _enter = span.enter();
    info!("Connection accepted from the client");
    match run_session(&mut stream) {
        Ok(sum) => info!(sum, "Sent final result back to the client"),
        Err(_) if state.canceled() => info!("Session cut off by shutdown"),
        Err(e) => warn!(error = %e, "Session aborted"),
    }
    state.release(id);
}

/// Runs the read-sum-reply exchange for one connection.
///
/// Integers are summed in arrival order until the terminator; the full
/// fixed-size result block is then written. Returns the sum that was sent.
pub fn run_session<S: Read + Write>(stream: &mut S) -> Result<i32, SessionError> {
    let mut accumulator = Accumulator::new();
    loop {
        let value = protocol::read_integer(stream)?;
        if value == TERMINATOR {
            break;
        }
        debug!(value, "Received data from client");
        accumulator.add(value);
    }

    let sum = accumulator.total();
    let reply = protocol::encode_reply(sum);
    stream
        .write_all(&reply)
        .and_then(|()| stream.flush())
        .map_err(|source| SessionError::Io {
            op: Op::Write,
            source,
        })?;
    Ok(sum)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{decode_reply, encode_integer, REPLY_CAPACITY};
    use std::io::{self, Cursor};

    struct MockStream {
        input: Cursor<Vec<u8>>,
        output: Vec<u8>,
        fail_writes: bool,
    }

    impl MockStream {
        fn new(values: &[i32]) -> Self {
            let input = values.iter().flat_map(|&v| encode_integer(v)).collect();
            MockStream {
                input: Cursor::new(input),
                output: Vec::new(),
                fail_writes: false,
            }
        }
    }

    impl Read for MockStream {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            self.input.read(buf)
        }
    }

    impl Write for MockStream {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            if self.fail_writes {
                return Err(io::Error::new(ErrorKind::BrokenPipe, "closed"));
            }
            self.output.write(buf)
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn sums_until_terminator() {
        let mut stream = MockStream::new(&[5, 10, -3, 0]);
        assert_eq!(run_session(&mut stream).unwrap(), 12);
        assert_eq!(stream.output.len(), REPLY_CAPACITY);
        assert_eq!(decode_reply(&stream.output), "Result = 12");
    }

    #[test]
    fn immediate_terminator_yields_zero() {
        let mut stream = MockStream::new(&[0]);
        assert_eq!(run_session(&mut stream).unwrap(), 0);
        assert_eq!(decode_reply(&stream.output), "Result = 0");
    }

    #[test]
    fn values_after_terminator_are_left_unread() {
        let mut stream = MockStream::new(&[1, 0, 99]);
        assert_eq!(run_session(&mut stream).unwrap(), 1);
        assert_eq!(stream.input.position(), 8);
    }

    #[test]
    fn missing_terminator_is_an_error() {
        let mut stream = MockStream::new(&[1, 2]);
        assert!(matches!(
            run_session(&mut stream),
            Err(SessionError::PeerClosed)
        ));
        assert!(stream.output.is_empty());
    }

    #[test]
    fn write_failure_is_reported() {
        let mut stream = MockStream::new(&[4, 0]);
        stream.fail_writes = true;
        match run_session(&mut stream) {
            Err(SessionError::Io { op, .. }) => assert_eq!(op, Op::Write),
            other => panic!("unexpected result: {other:?}"),
        }
    }
}

use std::fmt;
use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// The socket operation that failed, printed as the diagnostic tag.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Op {
    Socket,
    Bind,
    Listen,
    Accept,
    Read,
    Write,
    Remove,
}

impl fmt::Display for Op {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self {
            Op::Socket => "socket",
            Op::Bind => "bind",
            Op::Listen => "listen",
            Op::Accept => "accept",
            Op::Read => "read",
            Op::Write => "write",
            Op::Remove => "remove",
        };
        f.write_str(tag)
    }
}

/// Failure while setting up the listening endpoint.
#[derive(Debug, Error)]
#[error("{op}: {source} ({path:?})")]
pub struct EndpointError {
    pub op: Op,
    pub path: PathBuf,
    #[source]
    pub source: io::Error,
}

impl EndpointError {
    pub(crate) fn new(op: Op, path: impl Into<PathBuf>, source: io::Error) -> Self {
        EndpointError {
            op,
            path: path.into(),
            source,
        }
    }

    pub fn kind(&self) -> io::ErrorKind {
        self.source.kind()
    }
}

/// Failure inside one summation session. Never fatal to the dispatcher.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("{op}: {source}")]
    Io {
        op: Op,
        #[source]
        source: io::Error,
    },
    /// The peer closed the connection before sending the terminator.
    #[error("read: peer closed the connection before the terminator")]
    PeerClosed,
    /// The peer closed the connection in the middle of a wire integer.
    #[error("read: short read, got {received} of 4 bytes")]
    ShortRead { received: usize },
}

/// Failure that ends `serve_forever`.
#[derive(Debug, Error)]
pub enum ServeError {
    #[error("accept: {0}")]
    Accept(#[source] io::Error),
}

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("The server is down ({path:?}): {source}")]
    ServerDown {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("{op}: {source}")]
    Io {
        op: Op,
        #[source]
        source: io::Error,
    },
}

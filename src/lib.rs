//! Sum integers over a UNIX-domain stream socket.
//!
//! A server accepts one client at a time, reads 4-byte integers until a zero
//! terminator and answers with `Result = <sum>`. See [`protocol`] for the wire
//! format.

pub mod client;
pub mod endpoint;
pub mod error;
pub mod protocol;
pub mod server;

pub use client::{run_interactive, Client};
pub use endpoint::{bind, prepare_endpoint, BoundEndpoint, Endpoint};
pub use error::{ClientError, EndpointError, Op, ServeError, SessionError};
pub use protocol::{Accumulator, DEFAULT_BACKLOG, REPLY_CAPACITY, SOCKET_NAME, TERMINATOR};
pub use server::{run_session, ServeMode, Server, ShutdownHandle};

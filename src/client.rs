//! Client Session: connect, send integers, read the single reply.

use std::io::{self, BufRead, ErrorKind, Read, Write};
use std::os::unix::net::UnixStream;
use std::path::Path;

use tracing::{debug, info, warn};

use crate::error::{ClientError, Op};
use crate::protocol::{self, REPLY_CAPACITY, TERMINATOR, WIRE_INTEGER_LEN};

pub struct Client {
    stream: UnixStream,
}

impl Client {
    /// Connects to the endpoint at `path`. No retry.
    pub fn connect(path: impl AsRef<Path>) -> Result<Self, ClientError> {
        let path = path.as_ref();
        let stream = UnixStream::connect(path).map_err(|source| ClientError::ServerDown {
            path: path.to_path_buf(),
            source,
        })?;
        info!(path = ?path, "Connected to server");
        Ok(Client { stream })
    }

    pub fn send_value(&mut self, value: i32) -> io::Result<()> {
        protocol::write_integer(&mut self.stream, value)
    }

    /// Sends `values` up to and including the first zero, appending the
    /// terminator when the input has none.
    ///
    /// A write failure is logged and ends sending early. Returns how many
    /// integers were sent.
    pub fn send_values<I: IntoIterator<Item = i32>>(&mut self, values: I) -> usize {
        let mut sent = 0;
        for value in values {
            if let Err(e) = self.send_value(value) {
                warn!(value, error = %e, "write failed");
                return sent;
            }
            sent += 1;
            debug!(value, "Data sent");
            if value == TERMINATOR {
                return sent;
            }
        }
        match self.send_value(TERMINATOR) {
            Ok(()) => sent + 1,
            Err(e) => {
                warn!(error = %e, "write failed");
                sent
            }
        }
    }

    /// Reads the result message.
    ///
    /// Stops at the first NUL, at [`REPLY_CAPACITY`] bytes, or at EOF, so both
    /// a full result block and a bare text prefix are accepted.
    pub fn read_reply(&mut self) -> Result<String, ClientError> {
        let mut buffer = [0u8; REPLY_CAPACITY];
        let mut filled = 0;
        while filled < REPLY_CAPACITY {
            match self.stream.read(&mut buffer[filled..]) {
                Ok(0) => break,
                Ok(n) => {
                    let seen_nul = buffer[filled..filled + n].contains(&0);
                    filled += n;
                    if seen_nul {
                        break;
                    }
                }
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(source) => {
                    return Err(ClientError::Io {
                        op: Op::Read,
                        source,
                    })
                }
            }
        }
        Ok(protocol::decode_reply(&buffer[..filled]))
    }
}

/// Drives one session from an operator's console.
///
/// One integer per input line; lines that do not parse are re-prompted and
/// EOF on `input` counts as the terminator. Returns the server's reply.
pub fn run_interactive<R: BufRead, W: Write>(
    client: &mut Client,
    mut input: R,
    mut output: W,
) -> Result<String, ClientError> {
    let console = |source: io::Error| ClientError::Io {
        op: Op::Write,
        source,
    };
    let mut line = String::new();
    loop {
        writeln!(output, "Enter the data to send to the server").map_err(console)?;
        output.flush().map_err(console)?;

        line.clear();
        let read = input.read_line(&mut line).map_err(|source| ClientError::Io {
            op: Op::Read,
            source,
        })?;
        let value = if read == 0 {
            TERMINATOR
        } else {
            match line.trim().parse::<i32>() {
                Ok(value) => value,
                Err(_) => {
                    writeln!(output, "Not an integer: {}", line.trim()).map_err(console)?;
                    continue;
                }
            }
        };

        if let Err(e) = client.send_value(value) {
            warn!(value, error = %e, "write failed");
            break;
        }
        writeln!(
            output,
            "Number of bytes sent {WIRE_INTEGER_LEN}\t Data sent {value}"
        )
        .map_err(console)?;
        if value == TERMINATOR {
            break;
        }
    }

    let reply = client.read_reply()?;
    writeln!(output, "Received from server : {reply}").map_err(console)?;
    Ok(reply)
}

//! Wire format shared by the server and the client.
//!
//! Two message shapes exist:
//!
//! - an integer message: exactly [`WIRE_INTEGER_LEN`] bytes, a signed 32-bit
//!   integer in the host's native byte order. Zero is the terminator.
//! - a result message: a block of [`REPLY_CAPACITY`] bytes holding the
//!   NUL-terminated text `Result = <sum>`, zero-filled to the end.
//!
//! There is no byte-order tag, so both ends must run on hosts with the same
//! integer representation.

use std::io::{self, ErrorKind, Read, Write};

use crate::error::{Op, SessionError};

/// Well-known endpoint path shared by both processes.
pub const SOCKET_NAME: &str = "/tmp/DemoSocket";

/// Maximum size of a result message, terminating NUL included.
pub const REPLY_CAPACITY: usize = 128;

/// Pending connections the listener queues by default.
pub const DEFAULT_BACKLOG: i32 = 20;

pub const WIRE_INTEGER_LEN: usize = std::mem::size_of::<i32>();

/// The value that ends the request phase of a session.
pub const TERMINATOR: i32 = 0;

const REPLY_PREFIX: &str = "Result = ";

pub fn encode_integer(value: i32) -> [u8; WIRE_INTEGER_LEN] {
    value.to_ne_bytes()
}

pub fn decode_integer(bytes: [u8; WIRE_INTEGER_LEN]) -> i32 {
    i32::from_ne_bytes(bytes)
}

/// Reads exactly one wire integer.
///
/// A clean EOF before the first byte is [`SessionError::PeerClosed`]; an EOF
/// after a partial integer is [`SessionError::ShortRead`]. Partial bytes are
/// never interpreted as a value.
pub fn read_integer<R: Read>(reader: &mut R) -> Result<i32, SessionError> {
    let mut buffer = [0u8; WIRE_INTEGER_LEN];
    let mut filled = 0;
    while filled < WIRE_INTEGER_LEN {
        match reader.read(&mut buffer[filled..]) {
            Ok(0) if filled == 0 => return Err(SessionError::PeerClosed),
            Ok(0) => return Err(SessionError::ShortRead { received: filled }),
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(source) => {
                return Err(SessionError::Io {
                    op: Op::Read,
                    source,
                })
            }
        }
    }
    Ok(decode_integer(buffer))
}

pub fn write_integer<W: Write>(writer: &mut W, value: i32) -> io::Result<()> {
    writer.write_all(&encode_integer(value))
}

/// Builds the fixed-size result block for `sum`.
///
/// The text is cut at `REPLY_CAPACITY - 1` bytes so the block always ends in
/// at least one NUL.
pub fn encode_reply(sum: i32) -> [u8; REPLY_CAPACITY] {
    let text = format!("{REPLY_PREFIX}{sum}");
    let mut block = [0u8; REPLY_CAPACITY];
    let len = text.len().min(REPLY_CAPACITY - 1);
    block[..len].copy_from_slice(&text.as_bytes()[..len]);
    block
}

/// Extracts the message text from a result block or a bare prefix of one.
pub fn decode_reply(bytes: &[u8]) -> String {
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    String::from_utf8_lossy(&bytes[..end]).into_owned()
}

/// Per-session running sum. Overflow wraps in two's complement.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Accumulator {
    total: i32,
}

impl Accumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, value: i32) {
        self.total = self.total.wrapping_add(value);
    }

    pub fn total(&self) -> i32 {
        self.total
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn integer_uses_native_byte_order() {
        assert_eq!(encode_integer(-3), (-3i32).to_ne_bytes());
        assert_eq!(decode_integer(7i32.to_ne_bytes()), 7);
    }

    #[test]
    fn read_integer_sequence() {
        let mut wire = Vec::new();
        for value in [5, 10, -3, 0] {
            write_integer(&mut wire, value).unwrap();
        }
        let mut reader = Cursor::new(wire);
        let values: Vec<i32> = (0..4).map(|_| read_integer(&mut reader).unwrap()).collect();
        assert_eq!(values, vec![5, 10, -3, 0]);
    }

    #[test]
    fn read_integer_reports_clean_eof() {
        let mut reader = Cursor::new(Vec::<u8>::new());
        assert!(matches!(
            read_integer(&mut reader),
            Err(SessionError::PeerClosed)
        ));
    }

    #[test]
    fn read_integer_rejects_partial_value() {
        let mut reader = Cursor::new(vec![1u8, 2, 3]);
        assert!(matches!(
            read_integer(&mut reader),
            Err(SessionError::ShortRead { received: 3 })
        ));
    }

    #[test]
    fn reply_block_is_nul_padded() {
        let block = encode_reply(12);
        assert_eq!(block.len(), REPLY_CAPACITY);
        assert_eq!(&block[..11], b"Result = 12");
        assert!(block[11..].iter().all(|&b| b == 0));
        assert_eq!(decode_reply(&block), "Result = 12");
    }

    #[test]
    fn reply_handles_extremes() {
        assert_eq!(decode_reply(&encode_reply(i32::MIN)), "Result = -2147483648");
        assert_eq!(decode_reply(&encode_reply(0)), "Result = 0");
    }

    #[test]
    fn decode_reply_accepts_bare_prefix() {
        assert_eq!(decode_reply(b"Result = 4"), "Result = 4");
        assert_eq!(decode_reply(b""), "");
    }

    #[test]
    fn accumulator_wraps_on_overflow() {
        let mut acc = Accumulator::new();
        acc.add(i32::MAX);
        acc.add(1);
        assert_eq!(acc.total(), i32::MIN);
    }

    #[test]
    fn accumulator_sums_in_order() {
        let mut acc = Accumulator::new();
        for value in [5, 10, -3] {
            acc.add(value);
        }
        assert_eq!(acc.total(), 12);
    }
}

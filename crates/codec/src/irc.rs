//! RFC 2812 text framing: CRLF-terminated lines, 512 bytes max including the
//! terminator.
//!
//! This module only handles *framing* — splitting a byte stream into
//! complete lines and capping/terminating outbound ones. Command parsing is
//! a dispatcher concern and lives outside this crate.

use bytes::{BufMut, BytesMut};

/// Maximum size of a line on the wire, CRLF included.
pub const MAX_LINE: usize = 512;

/// Maximum payload size before the CRLF terminator is appended.
pub const MAX_PAYLOAD: usize = MAX_LINE - 2;

/// Appends `content` to `out` as a single framed line: truncated to
/// [`MAX_PAYLOAD`] bytes if necessary, then terminated with CRLF.
///
/// Truncation never splits a line into two — the tail is simply dropped,
/// matching the "truncated, not split" testable property.
///
/// # Test
///
/// ```
/// use bytes::BytesMut;
/// use ircd_codec::irc::encode_line;
///
/// let mut buf = BytesMut::new();
/// encode_line(&mut buf, "PRIVMSG #dev :hi");
/// assert_eq!(&buf[..], b"PRIVMSG #dev :hi\r\n");
/// ```
pub fn encode_line(out: &mut BytesMut, content: &str) {
    let bytes = content.as_bytes();
    let truncated = &bytes[..bytes.len().min(MAX_PAYLOAD)];
    out.reserve(truncated.len() + 2);
    out.put_slice(truncated);
    out.put_slice(b"\r\n");
}

/// Incrementally extracts complete CRLF-terminated lines out of an
/// accumulating receive buffer.
///
/// Lines are handed back without the terminator. A line (including any
/// bare-LF variant some clients send) longer than [`MAX_LINE`] bytes without
/// a terminator in sight is itself an error condition the caller should
/// treat as a protocol violation on that link; this reader surfaces it as
/// `Err` rather than silently buffering forever.
#[derive(Default)]
pub struct FrameReader {
    buf: BytesMut,
}

impl FrameReader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends newly-read bytes from the socket.
    pub fn feed(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Pops the next complete line, if any. Accepts both `\r\n` and a bare
    /// `\n` as the terminator, per common client leniency; the terminator
    /// itself is stripped from the returned bytes.
    pub fn next_line(&mut self) -> Result<Option<BytesMut>, crate::Error> {
        let Some(pos) = memchr::memchr(b'\n', &self.buf) else {
            if self.buf.len() > MAX_LINE * 4 {
                return Err(crate::Error::InvalidInput);
            }
            return Ok(None);
        };

        let mut line = self.buf.split_to(pos + 1);
        line.truncate(line.len() - 1);
        if line.last() == Some(&b'\r') {
            line.truncate(line.len() - 1);
        }
        Ok(Some(line))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncates_long_payload_without_splitting() {
        let mut buf = BytesMut::new();
        let long = "x".repeat(600);
        encode_line(&mut buf, &long);
        assert_eq!(buf.len(), MAX_LINE);
        assert_eq!(&buf[buf.len() - 2..], b"\r\n");
    }

    #[test]
    fn frame_reader_splits_multiple_lines_in_one_feed() {
        let mut reader = FrameReader::new();
        reader.feed(b"NICK alice\r\nUSER alice 0 * :Alice\r\n");

        let first = reader.next_line().unwrap().unwrap();
        assert_eq!(&first[..], b"NICK alice");

        let second = reader.next_line().unwrap().unwrap();
        assert_eq!(&second[..], b"USER alice 0 * :Alice");

        assert!(reader.next_line().unwrap().is_none());
    }

    #[test]
    fn frame_reader_handles_partial_feeds() {
        let mut reader = FrameReader::new();
        reader.feed(b"PING :toke");
        assert!(reader.next_line().unwrap().is_none());
        reader.feed(b"n\r\n");
        let line = reader.next_line().unwrap().unwrap();
        assert_eq!(&line[..], b"PING :token");
    }

    #[test]
    fn frame_reader_accepts_bare_lf() {
        let mut reader = FrameReader::new();
        reader.feed(b"PONG :token\n");
        let line = reader.next_line().unwrap().unwrap();
        assert_eq!(&line[..], b"PONG :token");
    }
}

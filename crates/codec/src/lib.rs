//! Wire codecs for the protocols spoken at the edges of an IRC server core.
//!
//! [RFC 2812]: https://www.rfc-editor.org/rfc/rfc2812
//! [RFC 1035]: https://www.rfc-editor.org/rfc/rfc1035
//! [RFC 1413]: https://www.rfc-editor.org/rfc/rfc1413
//!
//! Three framings are handled here: the CRLF-terminated client/server text
//! framing of [RFC 2812], the binary message format of [RFC 1035] used to
//! talk to nameservers, and the single-line reply format of [RFC 1413] used
//! to talk to an ident daemon on a peer. None of these modules know
//! anything about IRC command semantics, DNS record *meaning*, or ident
//! *policy* — they only turn bytes into structured values and back.

pub mod dns;
pub mod ident;
pub mod irc;

use std::fmt;

#[derive(Debug)]
pub enum Error {
    /// The buffer ended before a complete structure could be read.
    Truncated,
    /// A length, offset, or count field was inconsistent with the buffer.
    InvalidInput,
    /// A name contained a byte this protocol forbids in that position.
    InvalidName,
    /// The buffer was not valid UTF-8 where text was expected.
    Utf8Error(std::str::Utf8Error),
}

impl std::error::Error for Error {}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Truncated => write!(f, "truncated input"),
            Self::InvalidInput => write!(f, "invalid input"),
            Self::InvalidName => write!(f, "invalid name"),
            Self::Utf8Error(e) => write!(f, "invalid utf8: {e}"),
        }
    }
}

impl From<std::str::Utf8Error> for Error {
    fn from(value: std::str::Utf8Error) -> Self {
        Self::Utf8Error(value)
    }
}

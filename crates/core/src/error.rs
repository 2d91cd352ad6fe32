//! The exit-code taxonomy carried on a [`crate::link::Link`].
//!
//! These are not merely diagnostic strings: the first field of every audit
//! line is the tag's single-letter rendering, so the set and the
//! mapping are a wire artifact and get a typed enum rather than an
//! `anyhow::Error`.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExitCode {
    /// Unset sentinel; must never appear in an audit line.
    Undef,
    /// Normal registered-client quit.
    Reg,
    /// Outbound queue cap exceeded.
    SendQ,
    /// Allocator refused.
    MBuf,
    /// Socket read/write error.
    Io,
    /// Peer exceeded ping timeout (set by the command layer).
    Ping,
    /// Auth-refused by iauth, quiet variant.
    ARef,
    /// Auth-refused by iauth, noisy variant.
    ARefQ,
    KLine,
    Clone,
    AuthFail,
    AuthTout,
    GhMax,
    GuhMax,
    LhMax,
    LuhMax,
    YLineMax,
    NoILine,
    Failure,
}

impl ExitCode {
    /// The single-character tag written as the first field of an audit
    /// line. Chosen to be stable and grep-able, not to resemble any
    /// particular historical release's numbering.
    pub fn tag(self) -> char {
        match self {
            Self::Undef => '?',
            Self::Reg => '0',
            Self::SendQ => 'Q',
            Self::MBuf => 'B',
            Self::Io => 'I',
            Self::Ping => 'P',
            Self::ARef => 'a',
            Self::ARefQ => 'A',
            Self::KLine => 'K',
            Self::Clone => 'C',
            Self::AuthFail => 'f',
            Self::AuthTout => 't',
            Self::GhMax => 'g',
            Self::GuhMax => 'G',
            Self::LhMax => 'l',
            Self::LuhMax => 'L',
            Self::YLineMax => 'y',
            Self::NoILine => 'n',
            Self::Failure => 'F',
        }
    }

    /// A short human-readable description for operator-facing diagnostics.
    /// Never appears in an audit line; `tag()` is the wire-stable form.
    pub fn label(self) -> &'static str {
        match self {
            Self::Undef => "unset",
            Self::Reg => "normal quit",
            Self::SendQ => "SendQ exceeded",
            Self::MBuf => "allocator refused",
            Self::Io => "socket I/O error",
            Self::Ping => "ping timeout",
            Self::ARef => "auth refused",
            Self::ARefQ => "auth refused",
            Self::KLine => "K-lined",
            Self::Clone => "clone limit exceeded",
            Self::AuthFail => "auth failed",
            Self::AuthTout => "auth timed out",
            Self::GhMax => "global host limit",
            Self::GuhMax => "global user/host limit",
            Self::LhMax => "local host limit",
            Self::LuhMax => "local user/host limit",
            Self::YLineMax => "Y-line limit",
            Self::NoILine => "no matching I-line",
            Self::Failure => "failure",
        }
    }
}

impl Default for ExitCode {
    fn default() -> Self {
        Self::Undef
    }
}

impl fmt::Display for ExitCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.tag())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn undef_never_looks_like_a_real_tag() {
        assert_eq!(ExitCode::default(), ExitCode::Undef);
        assert_eq!(ExitCode::Undef.tag(), '?');
    }
}

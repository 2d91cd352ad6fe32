//! The newline-delimited text protocol spoken to the optional external
//! iauth helper over a pipe.

use std::net::IpAddr;

/// Any line discarded as malformed, truncated to at most 64 bytes for the
/// `&AUTH` garbage notice.
pub const GARBAGE_NOTICE_MAX: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verb {
    /// `U fd peerip peerport username` — ident confirmed.
    Confirmed { fd: u32, peer_ip: IpAddr, peer_port: u16, username: String },
    /// `u fd peerip peerport username` — ident confirmed, untrusted.
    ConfirmedUntrusted { fd: u32, peer_ip: IpAddr, peer_port: u16, username: String },
    /// `K fd peerip peerport` — kill this link.
    Kill { fd: u32, peer_ip: IpAddr, peer_port: u16 },
    /// `D fd peerip peerport` — done; clear `EXTERNAL_AUTH`.
    Done { fd: u32, peer_ip: IpAddr, peer_port: u16 },
    /// `>text` — informational, posted to `&AUTH`.
    Info(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Garbage(String);

impl Garbage {
    fn new(line: &str) -> Self {
        Self(line.chars().take(GARBAGE_NOTICE_MAX).collect())
    }

    pub fn notice(&self) -> String {
        format!("Garbage from iauth [{}]", self.0)
    }
}

/// `fd C peerip peerport localip localport\n`, sent at connection start.
pub fn format_connect_request(fd: u32, peer_ip: IpAddr, peer_port: u16, local_ip: IpAddr, local_port: u16) -> String {
    format!("{fd} C {peer_ip} {peer_port} {local_ip} {local_port}\n")
}

/// `fd d\n`, sent when DNS has given up on this link.
pub fn format_giveup_request(fd: u32) -> String {
    format!("{fd} d\n")
}

/// Parses one response line. `lookup` resolves the known `(peer_ip,
/// peer_port)` tuple for a given fd; every response's tuple must match the
/// known values for that fd, or the line is discarded as garbage.
pub fn parse_line(line: &str, lookup: impl Fn(u32) -> Option<(IpAddr, u16)>) -> Result<Verb, Garbage> {
    if let Some(text) = line.strip_prefix('>') {
        return Ok(Verb::Info(text.to_string()));
    }

    let mut parts = line.split_whitespace();
    let verb = parts.next().ok_or_else(|| Garbage::new(line))?;
    let fd: u32 = parts.next().and_then(|s| s.parse().ok()).ok_or_else(|| Garbage::new(line))?;
    let peer_ip: IpAddr = parts.next().and_then(|s| s.parse().ok()).ok_or_else(|| Garbage::new(line))?;
    let peer_port: u16 = parts.next().and_then(|s| s.parse().ok()).ok_or_else(|| Garbage::new(line))?;

    let Some((known_ip, known_port)) = lookup(fd) else {
        return Err(Garbage::new(line));
    };
    if known_ip != peer_ip || known_port != peer_port {
        return Err(Garbage::new(line));
    }

    match verb {
        "U" | "u" => {
            let username = parts.next().ok_or_else(|| Garbage::new(line))?.to_string();
            if verb == "U" {
                Ok(Verb::Confirmed { fd, peer_ip, peer_port, username })
            } else {
                Ok(Verb::ConfirmedUntrusted { fd, peer_ip, peer_port, username })
            }
        }
        "K" => Ok(Verb::Kill { fd, peer_ip, peer_port }),
        "D" => Ok(Verb::Done { fd, peer_ip, peer_port }),
        _ => Err(Garbage::new(line)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn known(_fd: u32) -> Option<(IpAddr, u16)> {
        Some(("192.0.2.7".parse().unwrap(), 6667))
    }

    #[test]
    fn confirmed_ident_parses() {
        let verb = parse_line("U 4 192.0.2.7 6667 alice", known).unwrap();
        assert_eq!(
            verb,
            Verb::Confirmed {
                fd: 4,
                peer_ip: "192.0.2.7".parse().unwrap(),
                peer_port: 6667,
                username: "alice".into(),
            }
        );
    }

    #[test]
    fn mismatched_tuple_is_garbage() {
        let err = parse_line("U 4 203.0.113.1 6667 alice", known).unwrap_err();
        assert_eq!(err.notice(), "Garbage from iauth [U 4 203.0.113.1 6667 alice]");
    }

    #[test]
    fn unknown_fd_is_garbage() {
        let err = parse_line("U 4 192.0.2.7 6667 alice", |_| None).unwrap_err();
        assert!(err.notice().starts_with("Garbage from iauth ["));
    }

    #[test]
    fn info_line_passes_through_verbatim() {
        let verb = parse_line(">helper started", known).unwrap();
        assert_eq!(verb, Verb::Info("helper started".into()));
    }

    #[test]
    fn garbage_notice_is_truncated_at_64_bytes() {
        let long_line = "Z ".to_string() + &"x".repeat(200);
        let err = parse_line(&long_line, known).unwrap_err();
        assert_eq!(err.notice().len(), "Garbage from iauth []".len() + GARBAGE_NOTICE_MAX);
    }
}

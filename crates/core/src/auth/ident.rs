//! The RFC 1413 ident probe issued against every freshly accepted
//! connection.

use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use log::debug;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpSocket;
use tokio::time::timeout;

use codec::ident::{self, Reply};

pub const PROBE_TIMEOUT: Duration = Duration::from_secs(4);
pub const MAX_REPLY_LEN: usize = 1024;

pub struct IdentResult {
    pub username: String,
    /// False when the peer's ident daemon reported an `OTHER`-prefixed
    /// system tag; the username is still used, just with a `-` marker the
    /// caller already applied via [`ident::derive_username`].
    pub trusted: bool,
}

/// Opens a non-blocking connection back to the peer's port 113, binding
/// the local endpoint to the address the peer connected to. Never
/// surfaces an error to the caller: refusal, timeout, a malformed reply,
/// or a port mismatch all simply yield `None`, and the link proceeds
/// without a `GOT_IDENT` flag.
pub async fn probe(
    local: SocketAddr,
    peer_ip: IpAddr,
    peer_port: u16,
    our_port: u16,
    max_username_len: usize,
) -> Option<IdentResult> {
    let outcome = timeout(PROBE_TIMEOUT, run_probe(local, peer_ip, peer_port, our_port)).await;
    let reply = match outcome {
        Ok(Ok(reply)) => reply,
        Ok(Err(e)) => {
            debug!("ident probe to {peer_ip} failed: {e}");
            return None;
        }
        Err(_) => {
            debug!("ident probe to {peer_ip} timed out");
            return None;
        }
    };
    validate_and_derive(reply, peer_port, our_port, max_username_len)
}

fn validate_and_derive(reply: Reply, expected_peer_port: u16, expected_our_port: u16, max_len: usize) -> Option<IdentResult> {
    let Reply::Ident(r) = reply else {
        return None;
    };
    if r.remote_port != expected_peer_port || r.local_port != expected_our_port {
        return None;
    }
    let username = ident::derive_username(&r.system, &r.user_id, max_len);
    let trusted = !r.system.to_ascii_uppercase().starts_with("OTHER");
    Some(IdentResult { username, trusted })
}

async fn run_probe(local: SocketAddr, peer_ip: IpAddr, peer_port: u16, our_port: u16) -> std::io::Result<Reply> {
    let socket = match local {
        SocketAddr::V4(_) => TcpSocket::new_v4()?,
        SocketAddr::V6(_) => TcpSocket::new_v6()?,
    };
    socket.bind(local)?;
    let mut stream = socket.connect(SocketAddr::new(peer_ip, 113)).await?;

    let query = ident::encode_query(peer_port, our_port);
    stream.write_all(query.as_bytes()).await?;

    let mut buf = Vec::new();
    let mut chunk = [0u8; 256];
    loop {
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);
        if buf.windows(2).any(|w| w == b"\r\n") || buf.len() >= MAX_REPLY_LEN {
            break;
        }
    }

    let line = String::from_utf8_lossy(&buf);
    ident::parse_reply(line.trim_end())
        .map_err(|_| std::io::Error::new(std::io::ErrorKind::InvalidData, "malformed ident reply"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use codec::ident::{IdentReply, IdentError};

    #[test]
    fn port_mismatch_is_rejected_without_erroring() {
        let reply = Reply::Ident(IdentReply {
            remote_port: 1,
            local_port: 2,
            system: "UNIX".into(),
            user_id: "ruser".into(),
        });
        assert!(validate_and_derive(reply, 9999, 2, 9).is_none());
    }

    #[test]
    fn other_system_tag_marks_untrusted() {
        let reply = Reply::Ident(IdentReply {
            remote_port: 1,
            local_port: 2,
            system: "OTHER-OS".into(),
            user_id: "ruser".into(),
        });
        let result = validate_and_derive(reply, 1, 2, 9).unwrap();
        assert!(!result.trusted);
        assert_eq!(result.username, "-ruser");
    }

    #[test]
    fn error_reply_yields_none() {
        let reply = Reply::Error(IdentError {
            remote_port: 1,
            local_port: 2,
            kind: "NO-USER".into(),
        });
        assert!(validate_and_derive(reply, 1, 2, 9).is_none());
    }
}

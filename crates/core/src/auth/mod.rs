//! The two per-link auth backends: the built-in ident probe and the
//! optional external iauth helper, either or both of which may be active
//! on a given link.

pub mod iauth;
pub mod ident;

use std::net::IpAddr;
use std::process::Stdio;

use ahash::AHashMap;
use log::warn;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};

/// A running iauth child process, tracked only long enough to keep its
/// pipes open; process supervision (restart policy) is the dispatcher's
/// concern, not this core.
pub struct IauthChild {
    _child: Child,
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
    known: AHashMap<u32, (IpAddr, u16)>,
}

impl IauthChild {
    pub async fn spawn(path: &str) -> std::io::Result<Self> {
        let mut child = Command::new(path)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .spawn()?;
        let stdin = child.stdin.take().expect("iauth spawned with piped stdin");
        let stdout = BufReader::new(child.stdout.take().expect("iauth spawned with piped stdout"));
        Ok(Self {
            _child: child,
            stdin,
            stdout,
            known: AHashMap::new(),
        })
    }

    pub async fn notify_connect(
        &mut self,
        fd: u32,
        peer_ip: IpAddr,
        peer_port: u16,
        local_ip: IpAddr,
        local_port: u16,
    ) -> std::io::Result<()> {
        self.known.insert(fd, (peer_ip, peer_port));
        let line = iauth::format_connect_request(fd, peer_ip, peer_port, local_ip, local_port);
        self.stdin.write_all(line.as_bytes()).await
    }

    pub async fn notify_giveup(&mut self, fd: u32) -> std::io::Result<()> {
        self.stdin.write_all(iauth::format_giveup_request(fd).as_bytes()).await
    }

    pub fn forget(&mut self, fd: u32) {
        self.known.remove(&fd);
    }

    /// Reads and parses the next response line. `Ok(None)` means the
    /// helper closed its end of the pipe.
    pub async fn next_event(&mut self) -> std::io::Result<Option<Result<iauth::Verb, iauth::Garbage>>> {
        let mut line = String::new();
        let n = self.stdout.read_line(&mut line).await?;
        if n == 0 {
            return Ok(None);
        }
        let known = self.known.clone();
        Ok(Some(iauth::parse_line(line.trim_end(), |fd| known.get(&fd).copied())))
    }
}

/// Owns the optional iauth child and the configured ident username-length
/// cap. A helper socket error disables external auth for the remainder of
/// the process lifetime by dropping it here.
#[derive(Default)]
pub struct AuthAgent {
    pub iauth: Option<IauthChild>,
    pub ident_max_username_len: usize,
}

impl AuthAgent {
    pub fn new(iauth: Option<IauthChild>, ident_max_username_len: usize) -> Self {
        Self {
            iauth,
            ident_max_username_len,
        }
    }

    pub fn has_external_auth(&self) -> bool {
        self.iauth.is_some()
    }

    /// Disables external auth after a helper-pipe error, matching the
    /// "close it and disable for the process lifetime" contract.
    pub fn disable_external_auth(&mut self) {
        if self.iauth.take().is_some() {
            warn!("iauth helper pipe failed; external auth disabled for this process");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabling_external_auth_is_idempotent() {
        let mut agent = AuthAgent::new(None, 9);
        assert!(!agent.has_external_auth());
        agent.disable_external_auth();
        agent.disable_external_auth();
        assert!(!agent.has_external_auth());
    }
}

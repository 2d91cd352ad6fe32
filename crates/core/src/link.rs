//! `BufferedLink`: the per-socket byte-oriented object every higher layer
//! writes through.
//!
//! A [`Link`] does not embed `prev`/`next` pointers; it lives in the
//! [`crate::registry::Registry`] arena addressed by a stable [`LinkId`], and
//! the socket itself is owned by the connection task that drives the link's
//! readability/writability — `BufferedLink` only ever sees non-blocking I/O
//! through [`Link::flush`].

use std::net::SocketAddr;
use std::time::Instant;

use bitflags::bitflags;
use tokio::net::tcp::OwnedWriteHalf;

use crate::dbuf::DBuf;
use crate::error::ExitCode;
use crate::sendq::SendClass;
use std::sync::Arc;

/// A stable small-integer handle into the Registry's link arena. Doubles as
/// a file-descriptor-like index: `Registry::local[fd] -> Link` becomes
/// `Registry::local[LinkId]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LinkId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Unknown,
    Client,
    Server,
    Service,
    /// The local server itself, used as a source identity for server-
    /// generated notices.
    Me,
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct LinkFlags: u32 {
        const DEAD                = 1 << 0;
        const CLOSING             = 1 << 1;
        const DOING_DNS           = 1 << 2;
        const DOING_AUTH          = 1 << 3;
        const WRITE_AUTH_PENDING  = 1 << 4;
        const GOT_IDENT           = 1 << 5;
        const EXTERNAL_AUTH       = 1 << 6;
        const CONNECTING          = 1 << 7;
        const HANDSHAKE           = 1 << 8;
        const ZIP                 = 1 << 9;
        /// Initial netjoin window during which the SendQ class cap may be
        /// auto-enlarged. Not part of the original link-state enumeration;
        /// added so admission control has somewhere to read "is this link
        /// still inside its burst window" from.
        const BURST               = 1 << 10;
    }
}

#[derive(Default)]
pub struct Identity {
    pub nickname: Option<String>,
    pub user: Option<String>,
    pub host: Option<String>,
    pub unique_id: Option<String>,
}

#[derive(Default, Clone, Copy)]
pub struct Counters {
    pub messages_sent: u64,
    pub messages_received: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
}

/// What happened on a successful [`Link::enqueue`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    /// The write fit under the cap as-is.
    Accepted,
    /// The write only fit because this call's connect-burst expansion
    /// doubled the class cap; `new_poolsize` is the pool's aggregate size
    /// after the adjustment, for the operator-facing "New poolsize N."
    /// notice.
    AcceptedAfterBurstExpansion { new_poolsize: u64 },
}

/// Why a [`Link::enqueue`] failed, carrying the magnitudes the caller needs
/// to compose the `&ERRORS` diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueError {
    Overflow { current: u64, cap: u64 },
    AllocatorRefused,
}

impl EnqueueError {
    pub fn exit_code(self) -> ExitCode {
        match self {
            Self::Overflow { .. } => ExitCode::SendQ,
            Self::AllocatorRefused => ExitCode::MBuf,
        }
    }
}

pub struct Link {
    pub id: LinkId,
    pub identity: Identity,
    pub role: Role,
    pub peer_addr: SocketAddr,
    /// The server-side address the peer connected to, used in place of a
    /// user-declared host for prefix injection when the source is
    /// locally connected.
    pub sockhost: String,

    pub inbound: DBuf,
    pub outbound: DBuf,
    /// Last observed outbound queue length in kilobytes.
    pub lastsq: u64,

    pub flags: LinkFlags,
    pub counters: Counters,
    pub connect_time: Instant,
    pub last_activity: Instant,
    pub exit_code: ExitCode,

    /// For a routed client, the server Link through which it entered.
    pub introducer: Option<LinkId>,
    pub class: Option<Arc<SendClass>>,

    /// Negotiated protocol-version capability bitmask, consulted by
    /// `send_servers_with_capability` / `…_without_capability`. Meaningless
    /// for non-SERVER roles.
    pub capabilities: u32,

    /// For a server Link still `CONNECTING`/`HANDSHAKE`, the UID of the
    /// local operator who initiated the connect.
    pub connected_by: Option<String>,
}

impl Link {
    pub fn new(id: LinkId, role: Role, peer_addr: SocketAddr, sockhost: String) -> Self {
        let now = Instant::now();
        Self {
            id,
            identity: Identity::default(),
            role,
            peer_addr,
            sockhost,
            inbound: DBuf::new(),
            outbound: DBuf::new(),
            lastsq: 0,
            flags: LinkFlags::empty(),
            counters: Counters::default(),
            connect_time: now,
            last_activity: now,
            exit_code: ExitCode::Undef,
            introducer: None,
            class: None,
            capabilities: 0,
            connected_by: None,
        }
    }

    pub fn is_dead(&self) -> bool {
        self.flags.contains(LinkFlags::DEAD)
    }

    pub fn is_registered(&self) -> bool {
        !self.flags.intersects(
            LinkFlags::DOING_DNS | LinkFlags::DOING_AUTH | LinkFlags::EXTERNAL_AUTH,
        ) && !self.is_dead()
    }

    /// Enqueues raw, already-framed bytes onto the outbound dbuf, applying
    /// the SendQ admission discipline. Returns `Err` carrying the magnitudes
    /// the caller needs to compose its operator-facing diagnostic, and the
    /// exit code to pass to [`crate::registry::Registry::mark_dead`] if the
    /// link must die as a result.
    ///
    /// A no-op on a link that is already dead: enqueue must never revive a
    /// dead link.
    pub fn enqueue(&mut self, pool: &crate::sendq::Pool, bytes: &[u8]) -> Result<EnqueueOutcome, EnqueueError> {
        if self.is_dead() {
            return Ok(EnqueueOutcome::Accepted);
        }

        let mut outcome = EnqueueOutcome::Accepted;
        if let Some(class) = &self.class {
            let burst = self.flags.contains(LinkFlags::BURST);
            match pool.admit(class, self.outbound.len() as u64, bytes.len() as u64, burst) {
                crate::sendq::Admission::Accepted => {}
                crate::sendq::Admission::AcceptedAfterBurstExpansion { new_poolsize } => {
                    outcome = EnqueueOutcome::AcceptedAfterBurstExpansion { new_poolsize };
                }
                crate::sendq::Admission::Overflow { current, cap } => {
                    return Err(EnqueueError::Overflow { current, cap });
                }
                crate::sendq::Admission::AllocatorRefused => return Err(EnqueueError::AllocatorRefused),
            }
        }

        self.outbound.append(bytes);
        self.counters.bytes_sent += bytes.len() as u64;
        self.counters.messages_sent += 1;

        let new_kb = self.outbound.len() as u64 / 1024;
        if new_kb > self.lastsq {
            // Best-effort synchronous flush; errors are reported by the
            // caller via `flush` on its own schedule, not swallowed here.
            let _ = self.try_flush_nonblocking_hint();
        }

        Ok(outcome)
    }

    /// Marker used only to decide whether a best-effort flush is worth
    /// attempting from `enqueue`; the actual flush happens in
    /// [`Link::flush`] against a real socket, since `Link` does not own one.
    fn try_flush_nonblocking_hint(&mut self) -> Result<(), ()> {
        self.lastsq = self.outbound.len() as u64 / 1024;
        Ok(())
    }

    /// Drains the outbound dbuf into `sock` using non-blocking writes until
    /// the socket would block or errors. On short write, the remainder
    /// stays queued and `lastsq` is updated.
    pub fn flush(&mut self, sock: &OwnedWriteHalf) -> Result<(), ExitCode> {
        loop {
            let Some(head) = self.outbound.head() else {
                break;
            };

            match sock.try_write(head) {
                Ok(0) => break,
                Ok(n) => {
                    self.outbound.consume(n);
                    self.last_activity = Instant::now();
                }
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => break,
                Err(_) => return Err(ExitCode::Io),
            }
        }

        self.lastsq = self.outbound.len() as u64 / 1024;
        Ok(())
    }

    /// Clears both dbufs and sets `DEAD`. Buffer-clear happens strictly
    /// before the caller composes any `&ERRORS` diagnostic: callers must
    /// call this before formatting a notice about this link's death.
    pub fn mark_dead(&mut self, reason: ExitCode) {
        if self.is_dead() {
            return;
        }
        self.inbound.clear();
        self.outbound.clear();
        self.flags.insert(LinkFlags::DEAD);
        self.exit_code = reason;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sendq::Pool;

    fn addr() -> SocketAddr {
        "127.0.0.1:6667".parse().unwrap()
    }

    #[test]
    fn enqueue_on_dead_link_is_a_noop() {
        let pool = Pool::new();
        let mut link = Link::new(LinkId(1), Role::Client, addr(), "irc.example.".into());
        link.mark_dead(ExitCode::Io);
        link.enqueue(&pool, b"should not appear").unwrap();
        assert!(link.outbound.is_empty());
    }

    #[test]
    fn overflow_without_burst_reports_sendq() {
        let pool = Pool::new();
        let class = pool.register_class("clients", 10);
        let mut link = Link::new(LinkId(2), Role::Client, addr(), "irc.example.".into());
        link.class = Some(class);
        let err = link.enqueue(&pool, b"this is far more than ten bytes").unwrap_err();
        assert_eq!(err.exit_code(), ExitCode::SendQ);
        assert!(matches!(err, EnqueueError::Overflow { current, cap } if current > cap));
    }

    #[test]
    fn mark_dead_clears_queues_before_diagnostic_is_composed() {
        let pool = Pool::new();
        let mut link = Link::new(LinkId(3), Role::Client, addr(), "irc.example.".into());
        link.enqueue(&pool, b"pending").unwrap();
        link.mark_dead(ExitCode::SendQ);
        assert!(link.outbound.is_empty());
        assert!(link.is_dead());
        assert_eq!(link.exit_code, ExitCode::SendQ);
    }

    #[test]
    fn mark_dead_is_monotonic() {
        let mut link = Link::new(LinkId(4), Role::Client, addr(), "irc.example.".into());
        link.mark_dead(ExitCode::Io);
        link.mark_dead(ExitCode::Reg);
        assert_eq!(link.exit_code, ExitCode::Io);
    }
}

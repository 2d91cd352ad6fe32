//! Outstanding DNS requests: the in-flight list indexed by transaction ID.

use std::net::IpAddr;
use std::time::{Duration, Instant};

use codec::dns::QType;

use crate::link::LinkId;

pub const DEFAULT_RETRIES: u8 = 3;
pub const INITIAL_TIMEOUT: Duration = Duration::from_secs(4);

/// Who receives the eventual result: an awaiting link, or a configuration
/// entry being resolved independently of any connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Context {
    Link(LinkId),
    ConfigEntry(String),
}

#[derive(Debug, Clone)]
pub enum Query {
    Name(String),
    Addr(IpAddr),
}

#[derive(Default, Debug, Clone)]
pub struct PartialResult {
    pub name: Option<String>,
    pub aliases: Vec<String>,
    pub addresses: Vec<IpAddr>,
    pub ttl: Option<Duration>,
}

pub struct Request {
    pub id: u16,
    pub qtype: QType,
    pub query: Query,
    pub retries_remaining: u8,
    pub next_deadline: Instant,
    pub timeout: Duration,
    pub resend_enabled: bool,
    pub context: Context,
    pub partial: PartialResult,
    /// Set while this request is a PTR lookup awaiting the
    /// forward-confirmation query it spawned.
    pub awaiting_confirmation_of: Option<IpAddr>,
}

impl Request {
    pub fn new(id: u16, qtype: QType, query: Query, context: Context) -> Self {
        Self {
            id,
            qtype,
            query,
            retries_remaining: DEFAULT_RETRIES,
            next_deadline: Instant::now() + INITIAL_TIMEOUT,
            timeout: INITIAL_TIMEOUT,
            resend_enabled: true,
            context,
            partial: PartialResult::default(),
            awaiting_confirmation_of: None,
        }
    }

    /// Doubles the timeout and schedules the next deadline; called on
    /// every resend.
    pub fn arm_next_deadline(&mut self, now: Instant) {
        self.timeout *= 2;
        self.next_deadline = now + self.timeout;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_request_starts_with_full_retry_budget() {
        let req = Request::new(1, QType::A, Query::Name("host.example.".into()), Context::Link(LinkId(0)));
        assert_eq!(req.retries_remaining, DEFAULT_RETRIES);
        assert!(req.resend_enabled);
    }

    #[test]
    fn timeout_doubles_on_each_rearm() {
        let mut req = Request::new(1, QType::A, Query::Name("host.example.".into()), Context::Link(LinkId(0)));
        let now = Instant::now();
        req.arm_next_deadline(now);
        assert_eq!(req.timeout, INITIAL_TIMEOUT * 2);
        req.arm_next_deadline(now);
        assert_eq!(req.timeout, INITIAL_TIMEOUT * 4);
    }
}

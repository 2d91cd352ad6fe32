//! Asynchronous DNS client: a single UDP socket serves all traffic to the
//! configured nameservers, backed by the cache in [`cache`] and the
//! in-flight list in [`request`].

pub mod cache;
pub mod request;

use std::io;
use std::net::{IpAddr, SocketAddr};
use std::time::{Duration, Instant};

use ahash::AHashMap;
use log::{debug, warn};
use rand::Rng;
use tokio::net::UdpSocket;

use codec::dns::{self, QType, RData, RCode};

use cache::{Cache, MAX_ALIASES, TTL_FLOOR};
use request::{PartialResult, Query, Request};

pub use request::Context;

/// Builds the wire packet for a query, or `None` for an IPv6 PTR lookup
/// (unsupported: this resolver only speaks `in-addr.arpa`).
fn build_packet(id: u16, qtype: QType, query: &Query) -> Option<bytes::BytesMut> {
    match query {
        Query::Name(name) => Some(dns::encode_query(id, name, qtype)),
        Query::Addr(IpAddr::V4(v4)) => Some(dns::encode_ptr_query(id, *v4)),
        Query::Addr(IpAddr::V6(_)) => None,
    }
}

#[derive(Default, Clone, Copy)]
pub struct ResolverStats {
    pub errors: u64,
    pub name_lookups: u64,
    pub addr_lookups: u64,
    pub replies: u64,
    pub requests: u64,
    pub resends: u64,
    pub sent: u64,
    pub timeouts: u64,
    pub short_ttl: u64,
    pub unknown_reply: u64,
}

/// The outcome of asking for a name or address.
pub enum Outcome {
    /// A cache hit; the lookup is complete.
    Resolved {
        name: String,
        addresses: Vec<IpAddr>,
    },
    /// No cache entry; a query was issued and `context` will be notified
    /// asynchronously.
    Pending,
}

/// What the caller's context learns once an in-flight request concludes.
pub enum Completion {
    Resolved {
        context: Context,
        name: String,
        addresses: Vec<IpAddr>,
    },
    Failed {
        context: Context,
    },
}

pub struct Resolver {
    socket: UdpSocket,
    nameservers: Vec<SocketAddr>,
    cache: Cache,
    inflight: AHashMap<u16, Request>,
    stats: ResolverStats,
}

impl Resolver {
    pub async fn bind(bind_addr: SocketAddr, nameservers: Vec<SocketAddr>) -> io::Result<Self> {
        let socket = UdpSocket::bind(bind_addr).await?;
        Ok(Self {
            socket,
            nameservers,
            cache: Cache::new(),
            inflight: AHashMap::new(),
            stats: ResolverStats::default(),
        })
    }

    pub fn stats(&self) -> ResolverStats {
        self.stats
    }

    pub fn cache(&self) -> &Cache {
        &self.cache
    }

    fn alloc_id(&self) -> u16 {
        let mut rng = rand::rng();
        loop {
            let id: u16 = rng.random();
            if !self.inflight.contains_key(&id) {
                return id;
            }
        }
    }

    /// `gethost_byname`: cache lookup, else issue an A query.
    pub async fn gethost_byname(&mut self, name: &str, ctx: Context) -> Outcome {
        self.stats.name_lookups += 1;
        if let Some(entry) = self.cache.lookup_by_name(name) {
            return Outcome::Resolved {
                name: entry.name.clone(),
                addresses: entry.addresses.clone(),
            };
        }
        self.issue(QType::A, Query::Name(name.to_string()), ctx).await;
        Outcome::Pending
    }

    /// `gethost_byaddr`: cache lookup, else issue a PTR query.
    pub async fn gethost_byaddr(&mut self, addr: IpAddr, ctx: Context) -> Outcome {
        self.stats.addr_lookups += 1;
        if let Some(entry) = self.cache.lookup_by_address(addr) {
            return Outcome::Resolved {
                name: entry.name.clone(),
                addresses: entry.addresses.clone(),
            };
        }
        self.issue(QType::Ptr, Query::Addr(addr), ctx).await;
        Outcome::Pending
    }

    async fn issue(&mut self, qtype: QType, query: Query, ctx: Context) {
        let id = self.alloc_id();
        let req = Request::new(id, qtype, query.clone(), ctx);

        let Some(packet) = build_packet(id, qtype, &query) else {
            warn!("IPv6 PTR lookups are not supported");
            return;
        };

        self.inflight.insert(id, req);
        self.stats.requests += 1;
        self.send_to_first_server(&packet).await;
    }

    async fn send_to_first_server(&mut self, packet: &[u8]) {
        let Some(server) = self.nameservers.first().copied() else {
            warn!("no nameservers configured; DNS request dropped");
            return;
        };
        match self.socket.send_to(packet, server).await {
            Ok(_) => self.stats.sent += 1,
            Err(e) => {
                self.stats.errors += 1;
                warn!("DNS send to {server} failed: {e}");
            }
        }
    }

    /// Reads one datagram and processes it, returning the completion (if
    /// any) for the caller to deliver. Drops datagrams from unconfigured
    /// sources and unknown transaction IDs.
    pub async fn recv_and_dispatch(&mut self) -> io::Result<Option<Completion>> {
        let mut buf = [0u8; 512];
        let (n, from) = self.socket.recv_from(&mut buf).await?;

        if !self.nameservers.iter().any(|ns| ns.ip() == from.ip()) {
            self.stats.unknown_reply += 1;
            return Ok(None);
        }

        let bytes = &buf[..n];
        let Ok(id) = dns::peek_id(bytes) else {
            self.stats.errors += 1;
            return Ok(None);
        };
        let Some(mut req) = self.inflight.remove(&id) else {
            return Ok(None);
        };
        self.stats.replies += 1;

        let message = match dns::decode_message(bytes) {
            Ok(m) => m,
            Err(_) => {
                self.stats.errors += 1;
                return Ok(self.fail_or_retry(req, "malformed DNS reply").await);
            }
        };

        if message.header.rcode != RCode::NoError || message.answers.is_empty() {
            if message.header.rcode.is_retryable() {
                return Ok(self.fail_or_retry(req, "TRY_AGAIN").await);
            }
            return Ok(Some(self.finish_failed(req)));
        }

        self.collect_answers(&mut req, &message.answers);

        match req.qtype {
            QType::Ptr => Ok(self.handle_ptr_result(req).await),
            _ => Ok(Some(self.finish_resolved(req))),
        }
    }

    fn collect_answers(&mut self, req: &mut Request, answers: &[dns::Record]) {
        for record in answers {
            match &record.rdata {
                RData::A(addr) => req.partial.addresses.push(IpAddr::V4(*addr)),
                RData::Aaaa(addr) => req.partial.addresses.push(IpAddr::V6(*addr)),
                RData::Ptr(name) | RData::Cname(name) => {
                    if !dns::is_valid_hostname(name) {
                        continue;
                    }
                    if req.partial.name.is_none() {
                        req.partial.name = Some(name.clone());
                    } else if req.partial.aliases.len() < MAX_ALIASES {
                        req.partial.aliases.push(name.clone());
                    }
                }
                RData::Other(_) => {}
            }
            if req.partial.ttl.is_none() {
                let ttl = Duration::from_secs(record.ttl as u64);
                if ttl < TTL_FLOOR {
                    self.stats.short_ttl += 1;
                }
                req.partial.ttl = Some(ttl);
            }
        }
    }

    /// PTR success spawns a forward-confirmation A query on the returned
    /// name; the reverse caller's context rides along on the forward
    /// request so completion can compare addresses.
    async fn handle_ptr_result(&mut self, req: Request) -> Option<Completion> {
        let Some(candidate) = req.partial.name.clone() else {
            return Some(self.finish_failed(req));
        };
        let Query::Addr(original_addr) = req.query else {
            return Some(self.finish_failed(req));
        };

        let id = self.alloc_id();
        let mut forward = Request::new(id, QType::A, Query::Name(candidate.clone()), req.context);
        forward.awaiting_confirmation_of = Some(original_addr);
        let packet = dns::encode_query(id, &candidate, QType::A);
        self.inflight.insert(id, forward);
        self.stats.requests += 1;
        self.send_to_first_server(&packet).await;
        None
    }

    fn finish_resolved(&mut self, req: Request) -> Completion {
        let name = req.partial.name.clone().unwrap_or_else(|| match &req.query {
            Query::Name(n) => n.clone(),
            Query::Addr(a) => a.to_string(),
        });

        if let Some(expect) = req.awaiting_confirmation_of {
            if !req.partial.addresses.contains(&expect) {
                debug!("forward confirmation mismatch for {name}: expected {expect}");
                return Completion::Failed { context: req.context };
            }
        }

        let ttl = req.partial.ttl.unwrap_or(TTL_FLOOR);
        self.cache
            .insert(name.clone(), req.partial.aliases.clone(), req.partial.addresses.clone(), ttl);

        Completion::Resolved {
            context: req.context,
            name,
            addresses: req.partial.addresses,
        }
    }

    fn finish_failed(&mut self, req: Request) -> Completion {
        self.stats.timeouts += 1;
        Completion::Failed { context: req.context }
    }

    async fn fail_or_retry(&mut self, mut req: Request, reason: &str) -> Option<Completion> {
        if req.retries_remaining == 0 {
            return Some(self.finish_failed(req));
        }
        req.retries_remaining -= 1;
        req.arm_next_deadline(Instant::now());
        debug!("retrying DNS request {} after {}", req.id, reason);
        self.stats.resends += 1;
        let Some(packet) = build_packet(req.id, req.qtype, &req.query) else {
            return Some(self.finish_failed(req));
        };
        let id = req.id;
        self.inflight.insert(id, req);
        self.send_to_first_server(&packet).await;
        None
    }

    /// Inspects the in-flight list for expired deadlines, retrying or
    /// failing each; returns the next wakeup deadline, if any requests
    /// remain outstanding.
    pub async fn timeout_tick(&mut self, now: Instant) -> (Vec<Completion>, Option<Instant>) {
        let expired: Vec<u16> = self
            .inflight
            .iter()
            .filter(|(_, req)| req.next_deadline <= now)
            .map(|(id, _)| *id)
            .collect();

        let mut completions = Vec::new();
        for id in expired {
            let Some(req) = self.inflight.remove(&id) else { continue };
            if let Some(completion) = self.fail_or_retry(req, "timeout").await {
                completions.push(completion);
            }
        }

        let next = self.inflight.values().map(|r| r.next_deadline).min();
        (completions, next)
    }

    /// Removes every outstanding request whose context matches `ctx`,
    /// implementing explicit `del_queries(ctx)` cancellation.
    pub fn cancel_context(&mut self, ctx: &Context) {
        self.inflight.retain(|_, req| &req.context != ctx);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_result_starts_empty() {
        let partial = PartialResult::default();
        assert!(partial.name.is_none());
        assert!(partial.addresses.is_empty());
    }
}

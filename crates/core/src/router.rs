//! The message-distribution layer: formats a message once, then delivers it
//! to the right set of links according to a target predicate.
//!
//! Every multi-target primitive renders its payload lazily — only once a
//! live recipient is actually found — via the `render` closures taken
//! below, and memoizes the bare vs. prefix-injected variants so a channel
//! with many local members pays for one allocation, not one per member.

use codec::irc::encode_line;

use crate::channel::ServerChannel;
use crate::link::{EnqueueError, EnqueueOutcome, LinkId, Role};
use crate::registry::Registry;
use crate::sendq::Pool;

use bytes::BytesMut;

/// The identity substituted into a `:%s` prefix token, synthesized from a
/// source Link's identity (using `sockhost` in place of a user-declared
/// host when the source is locally connected) or, for an `ANONYMOUS`
/// channel, the canonical anonymous identity.
#[derive(Debug, Clone)]
pub struct Source {
    pub nick: String,
    pub user: String,
    pub host: String,
}

impl Source {
    pub fn anonymous() -> Self {
        Self {
            nick: "anonymous".into(),
            user: "anonymous".into(),
            host: "anonymous.".into(),
        }
    }

    pub fn from_link(reg: &Registry, id: LinkId) -> Option<Self> {
        let link = reg.get(id)?;
        let nick = link.identity.nickname.clone().unwrap_or_default();
        let user = link.identity.user.clone().unwrap_or_default();
        let host = if link.introducer.is_none() {
            link.sockhost.clone()
        } else {
            link.identity.host.clone().unwrap_or_else(|| link.sockhost.clone())
        };
        Some(Self { nick, user, host })
    }

    pub fn render(&self) -> String {
        format!(":{}!{}@{}", self.nick, self.user, self.host)
    }

    /// The bare form used for remote/server recipients: the raw prefix
    /// argument passed through unchanged with a leading colon, with no
    /// user/host expansion.
    pub fn render_bare(&self, raw_prefix: &str) -> String {
        format!(":{raw_prefix}")
    }
}

fn enqueue_line(reg: &mut Registry, pool: &Pool, to: LinkId, line: &str) {
    let Some(link) = reg.get_mut(to) else { return };
    if link.is_dead() {
        return;
    }
    let mut out = BytesMut::new();
    encode_line(&mut out, line);
    match link.enqueue(pool, &out) {
        Ok(EnqueueOutcome::Accepted) => {}
        Ok(EnqueueOutcome::AcceptedAfterBurstExpansion { new_poolsize }) => {
            post_to_flag(
                reg,
                pool,
                ServerChannel::Notices,
                &format!("New poolsize {new_poolsize}. (sendq adjusted)"),
            );
        }
        Err(err) => {
            let tag = link.identity.nickname.clone().unwrap_or_else(|| link.sockhost.clone());
            link.mark_dead(err.exit_code());
            let text = match err {
                EnqueueError::Overflow { current, cap } => {
                    format!("Max SendQ limit exceeded for {tag}: {current} > {cap}")
                }
                EnqueueError::AllocatorRefused => format!("Max SendQ limit exceeded for {tag}"),
            };
            post_to_flag(reg, pool, ServerChannel::Errors, &text);
        }
    }
}

fn introducer_of(reg: &Registry, id: LinkId) -> LinkId {
    reg.get(id).and_then(|l| l.introducer).unwrap_or(id)
}

/// Deliver to exactly one recipient. Used for direct replies.
pub fn send_one(reg: &mut Registry, pool: &Pool, to: LinkId, rest: &str) {
    enqueue_line(reg, pool, to, rest);
}

/// As `send_one`, but rewrites a leading `:%s` token into a full
/// `nick!user@host` prefix drawn from `source`.
pub fn send_with_prefix(reg: &mut Registry, pool: &Pool, to: LinkId, source: &Source, rest: &str) {
    let line = format!("{} {}", source.render(), rest);
    enqueue_line(reg, pool, to, &line);
}

/// Deliver to every member of `channel` except the side the message arrived
/// from (identified by introducing-peer equality with `origin`). Local
/// members get the prefix-injected form; each distinct remote introducing
/// server gets the bare form exactly once. If `origin` is itself a local
/// client it also receives the prefix-injected echo.
pub fn send_channel_except(
    reg: &mut Registry,
    pool: &Pool,
    origin: LinkId,
    source: &Source,
    channel_name: &str,
    rest: &str,
) {
    let Some(channel) = reg.channel(channel_name) else { return };
    let anonymous = channel.is_anonymous();
    let members: Vec<LinkId> = channel.members().collect();
    let origin_introducer = introducer_of(reg, origin);

    let effective_source = if anonymous { Source::anonymous() } else { source.clone() };

    let mut prefixed: Option<String> = None;
    let mut bare: Option<String> = None;
    let mut notified_servers: Vec<LinkId> = Vec::new();

    for member in members {
        if member == origin {
            continue;
        }
        let Some(link) = reg.get(member) else { continue };
        match link.introducer {
            None => {
                let line = prefixed
                    .get_or_insert_with(|| format!("{} {}", effective_source.render(), rest))
                    .clone();
                enqueue_line(reg, pool, member, &line);
            }
            Some(server_id) => {
                if server_id == origin_introducer || notified_servers.contains(&server_id) {
                    continue;
                }
                notified_servers.push(server_id);
                let line = bare
                    .get_or_insert_with(|| format!("{} {}", source.render_bare(&source.nick), rest))
                    .clone();
                enqueue_line(reg, pool, server_id, &line);
            }
        }
    }

    if reg.get(origin).is_some_and(|l| l.introducer.is_none() && l.role == Role::Client) {
        let line = prefixed.unwrap_or_else(|| format!("{} {}", effective_source.render(), rest));
        enqueue_line(reg, pool, origin, &line);
    }
}

/// As `send_channel_except`, but restricted to locally connected members.
/// Respects `QUIET` (no fan-out), with the one exception that a local
/// source is still echoed.
pub fn send_channel_local_only(reg: &mut Registry, pool: &Pool, channel_name: &str, source: &Source, rest: &str) {
    let Some(channel) = reg.channel(channel_name) else { return };
    let quiet = channel.is_quiet();
    let anonymous = channel.is_anonymous();
    let members: Vec<LinkId> = channel.members().collect();
    let effective_source = if anonymous { Source::anonymous() } else { source.clone() };
    let line = format!("{} {}", effective_source.render(), rest);

    for member in members {
        let Some(link) = reg.get(member) else { continue };
        if link.introducer.is_some() {
            continue;
        }
        let is_source = link.identity.nickname == Some(source.nick.clone());
        if quiet && !is_source {
            continue;
        }
        enqueue_line(reg, pool, member, &line);
    }
}

/// Deliver to every locally connected SERVER link except `origin`'s
/// introducing peer.
pub fn send_servers_except(reg: &mut Registry, pool: &Pool, origin: LinkId, rest: &str) {
    let origin_introducer = introducer_of(reg, origin);
    let targets: Vec<LinkId> = reg
        .server_links()
        .map(|(id, _)| id)
        .filter(|&id| id != origin_introducer)
        .collect();
    for id in targets {
        enqueue_line(reg, pool, id, rest);
    }
}

/// As `send_servers_except`, filtered by whether the server link's
/// negotiated capability bitmask intersects `mask`. Returns whether at
/// least one server was filtered out (i.e. did not match).
pub fn send_servers_with_capability(reg: &mut Registry, pool: &Pool, origin: LinkId, mask: u32, rest: &str) -> bool {
    send_servers_filtered(reg, pool, origin, rest, |caps| caps & mask != 0)
}

pub fn send_servers_without_capability(reg: &mut Registry, pool: &Pool, origin: LinkId, mask: u32, rest: &str) -> bool {
    send_servers_filtered(reg, pool, origin, rest, |caps| caps & mask == 0)
}

fn send_servers_filtered(
    reg: &mut Registry,
    pool: &Pool,
    origin: LinkId,
    rest: &str,
    matches: impl Fn(u32) -> bool,
) -> bool {
    let origin_introducer = introducer_of(reg, origin);
    let mut filtered_any = false;
    let targets: Vec<LinkId> = reg
        .server_links()
        .filter(|&(id, link)| {
            if id == origin_introducer {
                return false;
            }
            if matches(link.capabilities) {
                true
            } else {
                filtered_any = true;
                false
            }
        })
        .map(|(id, _)| id)
        .collect();
    for id in targets {
        enqueue_line(reg, pool, id, rest);
    }
    filtered_any
}

fn eligible_channel_names(reg: &Registry, user: LinkId) -> Vec<String> {
    reg.channels()
        .filter(|c| c.is_member(user) && !c.is_quiet() && !c.is_anonymous())
        .map(|c| c.name.clone())
        .collect()
}

/// Deliver to every local peer sharing at least one non-quiet,
/// non-anonymous channel with `user` (plus `user` itself if locally
/// connected), each peer exactly once. Dispatches between two equivalent
/// strategies on a throughput heuristic; both are exercised in tests for
/// output equivalence.
pub fn send_common_channels(reg: &mut Registry, pool: &Pool, user: LinkId, rest: &str) {
    let chans = eligible_channel_names(reg, user);
    let recipients = if (reg.highest_id() as usize) < 4 * chans.len().max(1) {
        common_channel_recipients_fd_scan(reg, user, &chans)
    } else {
        common_channel_recipients_bitmap(reg, user, &chans)
    };
    for id in recipients {
        enqueue_line(reg, pool, id, rest);
    }
}

fn common_channel_recipients_fd_scan(reg: &Registry, user: LinkId, chans: &[String]) -> Vec<LinkId> {
    let mut out = Vec::new();
    for raw in 0..=reg.highest_id() {
        let candidate = LinkId(raw);
        let Some(link) = reg.get(candidate) else { continue };
        if link.introducer.is_some() {
            continue;
        }
        if chans.iter().any(|c| reg.channel(c).is_some_and(|c| c.is_member(candidate))) {
            out.push(candidate);
        }
    }
    if reg.get(user).is_some_and(|l| l.introducer.is_none()) && !out.contains(&user) {
        out.push(user);
    }
    out
}

fn common_channel_recipients_bitmap(reg: &Registry, user: LinkId, chans: &[String]) -> Vec<LinkId> {
    let mut seen = vec![false; reg.highest_id() as usize + 1];
    let mut out = Vec::new();
    for name in chans {
        let Some(channel) = reg.channel(name) else { continue };
        for member in channel.members() {
            let Some(link) = reg.get(member) else { continue };
            if link.introducer.is_some() {
                continue;
            }
            let slot = &mut seen[member.0 as usize];
            if !*slot {
                *slot = true;
                out.push(member);
            }
        }
    }
    if reg.get(user).is_some_and(|l| l.introducer.is_none()) && !out.contains(&user) {
        out.push(user);
    }
    out
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MaskKind {
    Server,
    Host,
}

/// Deliver to every local registered user whose server name or hostname
/// matches `mask` (classic `*`/`?` glob), excluding `origin`. Remote
/// delivery sweeps server links, delivering once per server with at least
/// one matching user behind it.
pub fn send_mask(reg: &mut Registry, pool: &Pool, origin: LinkId, kind: MaskKind, mask: &str, rest: &str) {
    let mut local_targets = Vec::new();
    let mut remote_servers = Vec::new();

    let candidates: Vec<LinkId> = reg.iter().map(|(id, _)| id).collect();
    for id in candidates {
        if id == origin {
            continue;
        }
        let Some(link) = reg.get(id) else { continue };
        if link.role != Role::Client && link.role != Role::Service {
            continue;
        }
        let field = match kind {
            MaskKind::Host => link.identity.host.as_deref().unwrap_or(&link.sockhost),
            MaskKind::Server => &link.sockhost,
        };
        if !mask_match(mask, field) {
            continue;
        }
        match link.introducer {
            None => local_targets.push(id),
            Some(server) => {
                if !remote_servers.contains(&server) {
                    remote_servers.push(server);
                }
            }
        }
    }

    for id in local_targets {
        enqueue_line(reg, pool, id, rest);
    }
    for id in remote_servers {
        enqueue_line(reg, pool, id, rest);
    }
}

/// `WALLOPS` to every remote server except `origin`, plus a post of the
/// same text to the local `&WALLOPS` server channel.
pub fn broadcast_to_ops(reg: &mut Registry, pool: &Pool, origin: LinkId, from_name: &str, text: &str) {
    let line = format!(":{from_name} WALLOPS :{text}");
    send_servers_except(reg, pool, origin, &line);
    post_to_flag(reg, pool, ServerChannel::Wallops, text);
}

/// Resolves `tag` to its `ServerChannel` record and fans `text` out as a
/// `NOTICE` to all locally connected subscribers.
pub fn post_to_flag(reg: &mut Registry, pool: &Pool, tag: ServerChannel, text: &str) {
    let members = reg.server_channel_members(tag);
    let line = format!("NOTICE {} :{}", tag.name(), text);
    for id in members {
        enqueue_line(reg, pool, id, &line);
    }
}

/// Simple IRC-style glob matcher: `*` matches any run, `?` matches one
/// character. No escaping support, matching the wire masks this targets.
fn mask_match(pattern: &str, text: &str) -> bool {
    fn rec(p: &[u8], t: &[u8]) -> bool {
        match p.first() {
            None => t.is_empty(),
            Some(b'*') => {
                let rest = &p[1..];
                rec(rest, t) || (!t.is_empty() && rec(p, &t[1..]))
            }
            Some(b'?') => !t.is_empty() && rec(&p[1..], &t[1..]),
            Some(&c) => {
                !t.is_empty() && t[0].eq_ignore_ascii_case(&c) && rec(&p[1..], &t[1..])
            }
        }
    }
    rec(pattern.as_bytes(), text.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link::{Link, Role};
    use std::net::SocketAddr;

    fn addr() -> SocketAddr {
        "127.0.0.1:6667".parse().unwrap()
    }

    fn new_registry() -> (Registry, std::sync::Arc<Pool>) {
        (
            Registry::new(crate::registry::AuditLog::new("/tmp/t-user", "/tmp/t-conn")),
            Pool::new(),
        )
    }

    #[test]
    fn mask_glob_matches_star_and_question_mark() {
        assert!(mask_match("*.example.", "host.example."));
        assert!(mask_match("h?st.example.", "host.example."));
        assert!(!mask_match("h?st.example.", "heest.example."));
    }

    #[test]
    fn channel_fanout_never_sends_back_to_the_introducing_server() {
        let (mut reg, pool) = new_registry();
        let server = reg.insert(|id| Link::new(id, Role::Server, addr(), "irc.example.".into()));
        let alice = reg.insert(|id| Link::new(id, Role::Client, addr(), "irc.example.".into()));
        let carol = reg.insert(|id| Link::new(id, Role::Client, addr(), "irc.example.".into()));
        reg.get_mut(carol).unwrap().introducer = Some(server);

        reg.channel_or_create("#dev").join(alice);
        reg.channel_or_create("#dev").join(carol);
        reg.set_nickname(alice, "alice".into());

        let source = Source::from_link(&reg, server).unwrap_or(Source {
            nick: "alice".into(),
            user: "~alice".into(),
            host: "host.local".into(),
        });

        send_channel_except(&mut reg, &pool, server, &source, "#dev", "PRIVMSG #dev :hi");

        assert!(reg.get(server).unwrap().outbound.is_empty());
    }

    #[test]
    fn common_channels_fd_scan_and_bitmap_agree() {
        let (mut reg, _pool) = new_registry();
        let user = reg.insert(|id| Link::new(id, Role::Client, addr(), "irc.example.".into()));
        let peer = reg.insert(|id| Link::new(id, Role::Client, addr(), "irc.example.".into()));
        reg.channel_or_create("#a").join(user);
        reg.channel_or_create("#a").join(peer);
        reg.channel_or_create("#b").join(user);
        reg.channel_or_create("#b").join(peer);

        let chans = eligible_channel_names(&reg, user);
        let mut a = common_channel_recipients_fd_scan(&reg, user, &chans);
        let mut b = common_channel_recipients_bitmap(&reg, user, &chans);
        a.sort();
        b.sort();
        assert_eq!(a, b);
        assert_eq!(a.iter().filter(|&&id| id == peer).count(), 1);
    }

    #[test]
    fn lazy_formatting_is_not_invoked_when_there_are_no_recipients() {
        let (mut reg, pool) = new_registry();
        let origin = reg.insert(|id| Link::new(id, Role::Client, addr(), "irc.example.".into()));
        let source = Source {
            nick: "alice".into(),
            user: "~alice".into(),
            host: "host.local".into(),
        };
        // empty channel: no panics, no sends, regardless of arguments
        send_channel_except(&mut reg, &pool, origin, &source, "#empty", "PRIVMSG #empty :hi");
        assert!(reg.get(origin).unwrap().outbound.is_empty());
    }

    #[test]
    fn channel_fanout_gives_servers_the_bare_prefix_and_locals_the_full_one() {
        let (mut reg, pool) = new_registry();
        let alice = reg.insert(|id| Link::new(id, Role::Client, addr(), "irc.example.".into()));
        reg.get_mut(alice).unwrap().class = Some(pool.register_class("clients", u64::MAX));
        let bob = reg.insert(|id| Link::new(id, Role::Client, addr(), "irc.example.".into()));
        reg.get_mut(bob).unwrap().class = Some(pool.class("clients").unwrap());
        let peer = reg.insert(|id| Link::new(id, Role::Server, addr(), "peer.example.".into()));
        reg.get_mut(peer).unwrap().class = Some(pool.register_class("servers", u64::MAX));

        reg.channel_or_create("#dev").join(alice);
        reg.channel_or_create("#dev").join(bob);
        reg.channel_or_create("#dev").join(peer);
        reg.set_nickname(alice, "alice".into());

        let source = Source {
            nick: "alice".into(),
            user: "~alice".into(),
            host: "host.local".into(),
        };

        send_channel_except(&mut reg, &pool, alice, &source, "#dev", "PRIVMSG #dev :hi");

        let bob_line = String::from_utf8(reg.get(bob).unwrap().outbound.head().unwrap().to_vec()).unwrap();
        assert_eq!(bob_line, ":alice!~alice@host.local PRIVMSG #dev :hi\r\n");

        let peer_line = String::from_utf8(reg.get(peer).unwrap().outbound.head().unwrap().to_vec()).unwrap();
        assert_eq!(peer_line, ":alice PRIVMSG #dev :hi\r\n");
    }
}

//! The process-wide index of active links and channels, plus the
//! connection/exit audit log.

use std::fs::OpenOptions;
use std::io::Write as _;
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};

use ahash::AHashMap;
use log::warn;

use crate::channel::{Channel, ServerChannel};
use crate::error::ExitCode;
use crate::link::{Link, LinkId, Role};

/// `local[fd] -> Link`, realized as a vector arena addressed by `LinkId`
/// rather than a raw fd table, with a freelist for reuse.
#[derive(Default)]
pub struct Registry {
    links: Vec<Option<Link>>,
    free: Vec<u32>,
    highest_id: u32,
    /// `fdas`: the sub-list of ids that are SERVER links, materialized
    /// separately since server fan-out is frequent.
    server_ids: Vec<LinkId>,
    by_name: AHashMap<String, LinkId>,
    by_unique_id: AHashMap<String, LinkId>,
    channels: AHashMap<String, Channel>,
    audit: AuditLog,
}

impl Registry {
    pub fn new(audit: AuditLog) -> Self {
        Self {
            audit,
            ..Default::default()
        }
    }

    /// The maximum occupied index, maintained on every open/close so scans
    /// can stop early.
    pub fn highest_id(&self) -> u32 {
        self.highest_id
    }

    pub fn insert(&mut self, mut build: impl FnMut(LinkId) -> Link) -> LinkId {
        let id = match self.free.pop() {
            Some(id) => id,
            None => {
                let id = self.links.len() as u32;
                self.links.push(None);
                id
            }
        };
        let link_id = LinkId(id);
        let link = build(link_id);
        if link.role == Role::Server {
            self.server_ids.push(link_id);
        }
        self.links[id as usize] = Some(link);
        self.highest_id = self.highest_id.max(id);
        link_id
    }

    pub fn get(&self, id: LinkId) -> Option<&Link> {
        self.links.get(id.0 as usize).and_then(|slot| slot.as_ref())
    }

    pub fn get_mut(&mut self, id: LinkId) -> Option<&mut Link> {
        self.links.get_mut(id.0 as usize).and_then(|slot| slot.as_mut())
    }

    pub fn iter(&self) -> impl Iterator<Item = (LinkId, &Link)> {
        self.links
            .iter()
            .enumerate()
            .filter_map(|(i, slot)| slot.as_ref().map(|l| (LinkId(i as u32), l)))
    }

    pub fn server_links(&self) -> impl Iterator<Item = (LinkId, &Link)> {
        self.server_ids
            .iter()
            .filter_map(move |id| self.get(*id).map(|l| (*id, l)))
    }

    pub fn set_nickname(&mut self, id: LinkId, nickname: String) {
        if let Some(link) = self.get_mut(id) {
            if let Some(old) = link.identity.nickname.replace(nickname.clone()) {
                self.by_name.remove(&old);
            }
        }
        self.by_name.insert(nickname, id);
    }

    pub fn set_unique_id(&mut self, id: LinkId, unique_id: String) {
        if let Some(link) = self.get_mut(id) {
            link.identity.unique_id = Some(unique_id.clone());
        }
        self.by_unique_id.insert(unique_id, id);
    }

    pub fn find_by_name(&self, nickname: &str) -> Option<LinkId> {
        self.by_name.get(nickname).copied()
    }

    pub fn find_by_unique_id(&self, unique_id: &str) -> Option<LinkId> {
        self.by_unique_id.get(unique_id).copied()
    }

    /// Removes a link from every index. Does not itself write the audit
    /// line; callers decide which log (`record_user_exit` vs
    /// `record_rejected_connection`) applies.
    pub fn remove(&mut self, id: LinkId) -> Option<Link> {
        let link = self.links.get_mut(id.0 as usize)?.take()?;
        self.free.push(id.0);
        self.server_ids.retain(|&sid| sid != id);
        if let Some(nick) = &link.identity.nickname {
            self.by_name.remove(nick);
        }
        if let Some(uid) = &link.identity.unique_id {
            self.by_unique_id.remove(uid);
        }
        Some(link)
    }

    pub fn channel(&self, name: &str) -> Option<&Channel> {
        self.channels.get(name)
    }

    pub fn channel_mut(&mut self, name: &str) -> Option<&mut Channel> {
        self.channels.get_mut(name)
    }

    pub fn channel_or_create(&mut self, name: &str) -> &mut Channel {
        self.channels.entry(name.to_string()).or_insert_with(|| Channel::new(name))
    }

    /// Destroys a channel once its last member leaves.
    pub fn drop_channel_if_empty(&mut self, name: &str) {
        if self.channels.get(name).is_some_and(Channel::is_empty) {
            self.channels.remove(name);
        }
    }

    pub fn channels(&self) -> impl Iterator<Item = &Channel> {
        self.channels.values()
    }

    /// Local members of the given internal diagnostic channel, created
    /// lazily on first subscription.
    pub fn server_channel_members(&self, tag: ServerChannel) -> Vec<LinkId> {
        self.channels
            .get(tag.name())
            .map(|c| c.members().collect())
            .unwrap_or_default()
    }

    pub fn subscribe_server_channel(&mut self, tag: ServerChannel, id: LinkId) {
        self.channel_or_create(tag.name()).join(id);
    }

    pub fn audit(&self) -> &AuditLog {
        &self.audit
    }
}

/// The two append-only audit files named in the configuration's `auth`
/// section: one for registered-client departures, one for rejected
/// connections.
pub struct AuditLog {
    user_log: PathBuf,
    conn_log: PathBuf,
}

impl Default for AuditLog {
    fn default() -> Self {
        Self::new("./var/userlog", "./var/connlog")
    }
}

impl AuditLog {
    pub fn new(user_log: impl Into<PathBuf>, conn_log: impl Into<PathBuf>) -> Self {
        Self {
            user_log: user_log.into(),
            conn_log: conn_log.into(),
        }
    }

    /// Space-separated record: exit-code char, signon-time, signoff-time,
    /// username, hostname, ident, IP, port, server-side sockhost,
    /// sent-messages, sent-bytes, received-messages, received-bytes.
    #[allow(clippy::too_many_arguments)]
    pub fn record_user_exit(
        &self,
        exit_code: ExitCode,
        signon: u64,
        signoff: u64,
        username: &str,
        hostname: &str,
        ident: &str,
        ip: &str,
        port: u16,
        sockhost: &str,
        sent_messages: u64,
        sent_bytes: u64,
        recv_messages: u64,
        recv_bytes: u64,
    ) {
        let line = format!(
            "{} {} {} {} {} {} {} {} {} {} {} {} {}\n",
            exit_code.tag(),
            signon,
            signoff,
            username,
            hostname,
            ident,
            ip,
            port,
            sockhost,
            sent_messages,
            sent_bytes,
            recv_messages,
            recv_bytes,
        );
        append_line(&self.user_log, &line);
    }

    pub fn record_rejected_connection(&self, exit_code: ExitCode, ip: &str, port: u16, reason: &str) {
        let line = format!("{} {} {} {}\n", exit_code.tag(), ip, port, reason);
        append_line(&self.conn_log, &line);
    }
}

fn append_line(path: &Path, line: &str) {
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .mode(0o600)
        .open(path);

    match file {
        Ok(mut file) => {
            if let Err(e) = file.write_all(line.as_bytes()) {
                warn!("audit log write to {path:?} failed: {e}");
            }
        }
        Err(e) => warn!("audit log open {path:?} failed: {e}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::SocketAddr;

    fn addr() -> SocketAddr {
        "127.0.0.1:6667".parse().unwrap()
    }

    #[test]
    fn insert_reuses_freed_ids_and_tracks_highest() {
        let mut reg = Registry::new(AuditLog::default());
        let a = reg.insert(|id| Link::new(id, Role::Client, addr(), "irc.example.".into()));
        let b = reg.insert(|id| Link::new(id, Role::Client, addr(), "irc.example.".into()));
        assert_eq!(reg.highest_id(), b.0);
        reg.remove(a);
        let c = reg.insert(|id| Link::new(id, Role::Client, addr(), "irc.example.".into()));
        assert_eq!(c, a);
    }

    #[test]
    fn server_links_are_tracked_separately() {
        let mut reg = Registry::new(AuditLog::default());
        let server = reg.insert(|id| Link::new(id, Role::Server, addr(), "irc.example.".into()));
        let _client = reg.insert(|id| Link::new(id, Role::Client, addr(), "irc.example.".into()));
        let ids: Vec<_> = reg.server_links().map(|(id, _)| id).collect();
        assert_eq!(ids, vec![server]);
    }

    #[test]
    fn nickname_index_tracks_rename() {
        let mut reg = Registry::new(AuditLog::default());
        let id = reg.insert(|id| Link::new(id, Role::Client, addr(), "irc.example.".into()));
        reg.set_nickname(id, "alice".into());
        assert_eq!(reg.find_by_name("alice"), Some(id));
        reg.set_nickname(id, "alice2".into());
        assert_eq!(reg.find_by_name("alice"), None);
        assert_eq!(reg.find_by_name("alice2"), Some(id));
    }

    #[test]
    fn channel_is_dropped_once_last_member_parts() {
        let mut reg = Registry::new(AuditLog::default());
        let id = LinkId(0);
        reg.channel_or_create("#dev").join(id);
        assert!(reg.channel("#dev").is_some());
        reg.channel_mut("#dev").unwrap().part(id);
        reg.drop_channel_if_empty("#dev");
        assert!(reg.channel("#dev").is_none());
    }

    #[test]
    fn server_channel_subscription_is_visible_to_post_to_flag_lookup() {
        let mut reg = Registry::new(AuditLog::default());
        let op = LinkId(0);
        reg.subscribe_server_channel(ServerChannel::Errors, op);
        assert_eq!(reg.server_channel_members(ServerChannel::Errors), vec![op]);
    }
}

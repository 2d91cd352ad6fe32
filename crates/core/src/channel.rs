//! Channels and the fixed set of internal diagnostic channels operators
//! subscribe to.

use bitflags::bitflags;

use crate::link::LinkId;
use ahash::AHashMap;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ChannelModes: u32 {
        /// Suppress fan-out to members entirely (`send_channel_local_only`
        /// still echoes the source itself).
        const QUIET     = 1 << 0;
        /// Rewrite the source prefix to a canonical anonymous identity on
        /// fan-out.
        const ANONYMOUS = 1 << 1;
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct MemberFlags: u8 {
        const VOICE = 1 << 0;
        const OP    = 1 << 1;
    }
}

/// `&` local-only, `#` network-wide. A network channel may carry a trailing
/// `:mask` suffix constraining which servers it is relayed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    Local,
    Network,
}

pub struct Channel {
    pub name: String,
    pub scope: Scope,
    /// The `:mask` suffix on a network channel name, if present.
    pub relay_mask: Option<String>,
    pub modes: ChannelModes,
    members: AHashMap<LinkId, MemberFlags>,
}

impl Channel {
    pub fn new(name: &str) -> Self {
        let scope = match name.as_bytes().first() {
            Some(b'&') => Scope::Local,
            _ => Scope::Network,
        };
        let relay_mask = name.split_once(':').map(|(_, mask)| mask.to_string());
        Self {
            name: name.to_string(),
            scope,
            relay_mask,
            modes: ChannelModes::empty(),
            members: AHashMap::new(),
        }
    }

    pub fn is_anonymous(&self) -> bool {
        self.modes.contains(ChannelModes::ANONYMOUS)
    }

    pub fn is_quiet(&self) -> bool {
        self.modes.contains(ChannelModes::QUIET)
    }

    pub fn join(&mut self, link: LinkId) {
        self.members.entry(link).or_insert_with(MemberFlags::empty);
    }

    pub fn part(&mut self, link: LinkId) {
        self.members.remove(&link);
    }

    pub fn is_member(&self, link: LinkId) -> bool {
        self.members.contains_key(&link)
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn member_flags(&self, link: LinkId) -> Option<MemberFlags> {
        self.members.get(&link).copied()
    }

    pub fn members(&self) -> impl Iterator<Item = LinkId> + '_ {
        self.members.keys().copied()
    }
}

/// The fixed set of internal diagnostic channels. Operators subscribe to
/// these by ordinary channel join.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServerChannel {
    Errors,
    Notices,
    Kills,
    Numerics,
    Servers,
    Hash,
    Local,
    Services,
    Debug,
    Auth,
    Save,
    Wallops,
    Clients,
}

impl ServerChannel {
    pub fn name(self) -> &'static str {
        match self {
            Self::Errors => "&ERRORS",
            Self::Notices => "&NOTICES",
            Self::Kills => "&KILLS",
            Self::Numerics => "&NUMERICS",
            Self::Servers => "&SERVERS",
            Self::Hash => "&HASH",
            Self::Local => "&LOCAL",
            Self::Services => "&SERVICES",
            Self::Debug => "&DEBUG",
            Self::Auth => "&AUTH",
            Self::Save => "&SAVE",
            Self::Wallops => "&WALLOPS",
            Self::Clients => "&CLIENTS",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "&ERRORS" => Self::Errors,
            "&NOTICES" => Self::Notices,
            "&KILLS" => Self::Kills,
            "&NUMERICS" => Self::Numerics,
            "&SERVERS" => Self::Servers,
            "&HASH" => Self::Hash,
            "&LOCAL" => Self::Local,
            "&SERVICES" => Self::Services,
            "&DEBUG" => Self::Debug,
            "&AUTH" => Self::Auth,
            "&SAVE" => Self::Save,
            "&WALLOPS" => Self::Wallops,
            "&CLIENTS" => Self::Clients,
            _ => return None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scope_is_derived_from_leading_sigil() {
        assert_eq!(Channel::new("#dev").scope, Scope::Network);
        assert_eq!(Channel::new("&LOCAL").scope, Scope::Local);
    }

    #[test]
    fn relay_mask_suffix_is_split_off() {
        let chan = Channel::new("#dev:*.example.");
        assert_eq!(chan.name, "#dev:*.example.");
        assert_eq!(chan.relay_mask.as_deref(), Some("*.example."));
    }

    #[test]
    fn join_part_is_idempotent() {
        let mut chan = Channel::new("#dev");
        let a = LinkId(1);
        chan.join(a);
        chan.join(a);
        assert_eq!(chan.members().count(), 1);
        chan.part(a);
        assert!(chan.is_empty());
    }

    #[test]
    fn server_channel_name_round_trips() {
        for sc in [
            ServerChannel::Errors,
            ServerChannel::Auth,
            ServerChannel::Wallops,
        ] {
            assert_eq!(ServerChannel::from_name(sc.name()), Some(sc));
        }
    }
}

//! RFC 1413 ident protocol: a single query line out, a single reply line
//! back.

use crate::Error;

/// Formats the query line sent once the ident socket is writable:
/// `theirport , ourport\r\n`.
///
/// # Test
///
/// ```
/// use ircd_codec::ident::encode_query;
///
/// assert_eq!(encode_query(6667, 54321), "6667 , 54321\r\n");
/// ```
pub fn encode_query(their_port: u16, our_port: u16) -> String {
    format!("{their_port} , {our_port}\r\n")
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentReply {
    pub remote_port: u16,
    pub local_port: u16,
    pub system: String,
    pub user_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentError {
    pub remote_port: u16,
    pub local_port: u16,
    pub kind: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Ident(IdentReply),
    Error(IdentError),
}

/// Parses one accumulated, CRLF-stripped reply line:
/// `remp , locp : USERID : system : ruser` or `remp , locp : ERROR : error-type`.
///
/// # Test
///
/// ```
/// use ircd_codec::ident::{parse_reply, Reply};
///
/// let reply = parse_reply("6667, 54321 : USERID : UNIX : ruser").unwrap();
/// match reply {
///     Reply::Ident(r) => {
///         assert_eq!(r.remote_port, 6667);
///         assert_eq!(r.user_id, "ruser");
///         assert_eq!(r.system, "UNIX");
///     }
///     Reply::Error(_) => panic!("expected ident reply"),
/// }
/// ```
pub fn parse_reply(line: &str) -> Result<Reply, Error> {
    let mut fields = line.splitn(4, ':');

    let ports = fields.next().ok_or(Error::InvalidInput)?;
    let (remote_port, local_port) = parse_ports(ports)?;

    let kind = fields.next().ok_or(Error::InvalidInput)?.trim();

    if kind.eq_ignore_ascii_case("ERROR") {
        let error_type = fields.next().unwrap_or("").trim().to_owned();
        return Ok(Reply::Error(IdentError {
            remote_port,
            local_port,
            kind: error_type,
        }));
    }

    if !kind.eq_ignore_ascii_case("USERID") {
        return Err(Error::InvalidInput);
    }

    let system = fields.next().ok_or(Error::InvalidInput)?.trim().to_owned();
    let user_id = fields.next().ok_or(Error::InvalidInput)?.trim().to_owned();

    Ok(Reply::Ident(IdentReply {
        remote_port,
        local_port,
        system,
        user_id,
    }))
}

fn parse_ports(field: &str) -> Result<(u16, u16), Error> {
    let (remote, local) = field.split_once(',').ok_or(Error::InvalidInput)?;
    let remote_port: u16 = remote.trim().parse().map_err(|_| Error::InvalidInput)?;
    let local_port: u16 = local.trim().parse().map_err(|_| Error::InvalidInput)?;
    Ok((remote_port, local_port))
}

/// Applies the username-derivation rule: a `system` tag beginning with
/// `OTHER` marks the identity untrusted and the username gets a `-` prefix;
/// otherwise the raw user id is used, truncated to `max_len`.
///
/// # Test
///
/// ```
/// use ircd_codec::ident::derive_username;
///
/// assert_eq!(derive_username("UNIX", "ruser", 9), "ruser");
/// assert_eq!(derive_username("OTHER", "ruser", 9), "-ruser");
/// assert_eq!(derive_username("UNIX", "a_very_long_name", 4), "a_ve");
/// ```
pub fn derive_username(system: &str, user_id: &str, max_len: usize) -> String {
    let truncated: String = user_id.chars().take(max_len).collect();
    if system.to_ascii_uppercase().starts_with("OTHER") {
        format!("-{truncated}")
    } else {
        truncated
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_error_reply() {
        let reply = parse_reply("113, 6667 : ERROR : NO-USER").unwrap();
        assert_eq!(
            reply,
            Reply::Error(IdentError {
                remote_port: 113,
                local_port: 6667,
                kind: "NO-USER".to_string(),
            })
        );
    }

    #[test]
    fn rejects_malformed_ports() {
        assert!(parse_reply("not-a-port : USERID : UNIX : x").is_err());
    }

    #[test]
    fn rejects_unknown_verb() {
        assert!(parse_reply("1, 2 : BOGUS : x").is_err());
    }
}

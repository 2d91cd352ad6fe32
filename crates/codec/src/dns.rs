//! RFC 1035 DNS message encode/decode, scoped to what the resolver needs:
//! A/AAAA/PTR/CNAME questions and answers over UDP.
//!
//! [RFC 1035 §4.1]: https://www.rfc-editor.org/rfc/rfc1035#section-4.1

use std::net::{Ipv4Addr, Ipv6Addr};

use bytes::{BufMut, Bytes, BytesMut};

use crate::Error;

/// Maximum size of a UDP DNS message this resolver will send or accept.
pub const MAX_PACKET_SIZE: usize = 512;

/// Upper bound on alias names retained per answer.
pub const MAX_ALIASES: usize = 15;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QType {
    A,
    Aaaa,
    Cname,
    Ptr,
    Other(u16),
}

impl QType {
    fn code(self) -> u16 {
        match self {
            Self::A => 1,
            Self::Cname => 5,
            Self::Ptr => 12,
            Self::Aaaa => 28,
            Self::Other(v) => v,
        }
    }

    fn from_code(v: u16) -> Self {
        match v {
            1 => Self::A,
            5 => Self::Cname,
            12 => Self::Ptr,
            28 => Self::Aaaa,
            other => Self::Other(other),
        }
    }
}

pub const CLASS_IN: u16 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RCode {
    NoError,
    FormErr,
    ServFail,
    NxDomain,
    NotImp,
    Refused,
    Other(u8),
}

impl RCode {
    fn from_code(v: u8) -> Self {
        match v {
            0 => Self::NoError,
            1 => Self::FormErr,
            2 => Self::ServFail,
            3 => Self::NxDomain,
            4 => Self::NotImp,
            5 => Self::Refused,
            other => Self::Other(other),
        }
    }

    /// Whether this response code permits a retry (`TRY_AGAIN`).
    pub fn is_retryable(self) -> bool {
        matches!(self, Self::ServFail | Self::Other(_))
    }
}

#[derive(Debug, Clone)]
pub struct Header {
    pub id: u16,
    pub is_response: bool,
    pub rcode: RCode,
    pub qdcount: u16,
    pub ancount: u16,
    pub nscount: u16,
    pub arcount: u16,
}

#[derive(Debug, Clone)]
pub struct Question {
    pub name: String,
    pub qtype: QType,
    pub qclass: u16,
}

#[derive(Debug, Clone)]
pub enum RData {
    A(Ipv4Addr),
    Aaaa(Ipv6Addr),
    Cname(String),
    Ptr(String),
    Other(Bytes),
}

#[derive(Debug, Clone)]
pub struct Record {
    pub name: String,
    pub rtype: QType,
    pub class: u16,
    pub ttl: u32,
    pub rdata: RData,
}

#[derive(Debug, Clone)]
pub struct Message {
    pub header: Header,
    pub questions: Vec<Question>,
    pub answers: Vec<Record>,
}

/// Builds a single-question query packet with the given transaction id.
///
/// # Test
///
/// ```
/// use ircd_codec::dns::{encode_query, decode_message, QType};
///
/// let packet = encode_query(0x1234, "host.example.", QType::A);
/// let msg = decode_message(&packet).unwrap();
/// assert_eq!(msg.header.id, 0x1234);
/// assert_eq!(msg.questions[0].name, "host.example.");
/// ```
pub fn encode_query(id: u16, name: &str, qtype: QType) -> BytesMut {
    let mut buf = BytesMut::with_capacity(MAX_PACKET_SIZE);

    buf.put_u16(id);
    buf.put_u16(0x0100); // RD=1, standard query
    buf.put_u16(1); // qdcount
    buf.put_u16(0);
    buf.put_u16(0);
    buf.put_u16(0);

    encode_name(&mut buf, name);
    buf.put_u16(qtype.code());
    buf.put_u16(CLASS_IN);

    buf
}

/// Builds a PTR query for the given dotted-quad address, in
/// `in-addr.arpa` form.
pub fn encode_ptr_query(id: u16, addr: Ipv4Addr) -> BytesMut {
    let octets = addr.octets();
    let name = format!(
        "{}.{}.{}.{}.in-addr.arpa.",
        octets[3], octets[2], octets[1], octets[0]
    );
    encode_query(id, &name, QType::Ptr)
}

fn encode_name(buf: &mut BytesMut, name: &str) {
    for label in name.trim_end_matches('.').split('.') {
        if label.is_empty() {
            continue;
        }
        let bytes = label.as_bytes();
        buf.put_u8(bytes.len() as u8);
        buf.put_slice(bytes);
    }
    buf.put_u8(0);
}

/// Reads the 16-bit transaction ID without fully decoding the message —
/// used by the resolver to dispatch a reply to its in-flight request
/// before doing the heavier walk of the answer section.
pub fn peek_id(bytes: &[u8]) -> Result<u16, Error> {
    if bytes.len() < 2 {
        return Err(Error::Truncated);
    }
    Ok(u16::from_be_bytes([bytes[0], bytes[1]]))
}

pub fn decode_message(bytes: &[u8]) -> Result<Message, Error> {
    if bytes.len() < 12 {
        return Err(Error::Truncated);
    }

    let id = u16::from_be_bytes([bytes[0], bytes[1]]);
    let flags = u16::from_be_bytes([bytes[2], bytes[3]]);
    let qdcount = u16::from_be_bytes([bytes[4], bytes[5]]);
    let ancount = u16::from_be_bytes([bytes[6], bytes[7]]);
    let nscount = u16::from_be_bytes([bytes[8], bytes[9]]);
    let arcount = u16::from_be_bytes([bytes[10], bytes[11]]);

    let header = Header {
        id,
        is_response: flags & 0x8000 != 0,
        rcode: RCode::from_code((flags & 0x000f) as u8),
        qdcount,
        ancount,
        nscount,
        arcount,
    };

    let mut cursor = 12usize;
    let mut questions = Vec::with_capacity(qdcount as usize);
    for _ in 0..qdcount {
        let (name, next) = decode_name(bytes, cursor)?;
        if next + 4 > bytes.len() {
            return Err(Error::Truncated);
        }
        let qtype = QType::from_code(u16::from_be_bytes([bytes[next], bytes[next + 1]]));
        let qclass = u16::from_be_bytes([bytes[next + 2], bytes[next + 3]]);
        cursor = next + 4;
        questions.push(Question { name, qtype, qclass });
    }

    let mut answers = Vec::with_capacity(ancount as usize);
    for _ in 0..ancount {
        let (name, next) = decode_name(bytes, cursor)?;
        if next + 10 > bytes.len() {
            return Err(Error::Truncated);
        }
        let rtype = QType::from_code(u16::from_be_bytes([bytes[next], bytes[next + 1]]));
        let class = u16::from_be_bytes([bytes[next + 2], bytes[next + 3]]);
        let ttl = u32::from_be_bytes([bytes[next + 4], bytes[next + 5], bytes[next + 6], bytes[next + 7]]);
        let rdlength = u16::from_be_bytes([bytes[next + 8], bytes[next + 9]]) as usize;
        let rdata_start = next + 10;
        let rdata_end = rdata_start + rdlength;
        if rdata_end > bytes.len() {
            return Err(Error::Truncated);
        }

        let rdata = match rtype {
            QType::A => {
                if rdlength != 4 {
                    return Err(Error::InvalidInput);
                }
                RData::A(Ipv4Addr::new(
                    bytes[rdata_start],
                    bytes[rdata_start + 1],
                    bytes[rdata_start + 2],
                    bytes[rdata_start + 3],
                ))
            }
            QType::Aaaa => {
                if rdlength != 16 {
                    return Err(Error::InvalidInput);
                }
                let mut octets = [0u8; 16];
                octets.copy_from_slice(&bytes[rdata_start..rdata_end]);
                RData::Aaaa(Ipv6Addr::from(octets))
            }
            QType::Cname => RData::Cname(decode_name(bytes, rdata_start)?.0),
            QType::Ptr => RData::Ptr(decode_name(bytes, rdata_start)?.0),
            QType::Other(_) => RData::Other(Bytes::copy_from_slice(&bytes[rdata_start..rdata_end])),
        };

        cursor = rdata_end;
        answers.push(Record {
            name,
            rtype,
            class,
            ttl,
            rdata,
        });
    }

    Ok(Message {
        header,
        questions,
        answers,
    })
}

/// Decodes a (possibly compressed) name starting at `offset`, returning the
/// name and the offset immediately following it in the *original* buffer
/// (a pointer jump does not advance this return value past the two bytes
/// of the pointer itself).
fn decode_name(bytes: &[u8], offset: usize) -> Result<(String, usize), Error> {
    let mut labels: Vec<String> = Vec::new();
    let mut pos = offset;
    let mut end: Option<usize> = None;
    let mut jumps = 0;

    loop {
        if jumps > 16 {
            return Err(Error::InvalidInput);
        }
        let Some(&len) = bytes.get(pos) else {
            return Err(Error::Truncated);
        };

        if len == 0 {
            pos += 1;
            if end.is_none() {
                end = Some(pos);
            }
            break;
        } else if len & 0xc0 == 0xc0 {
            let Some(&lo) = bytes.get(pos + 1) else {
                return Err(Error::Truncated);
            };
            if end.is_none() {
                end = Some(pos + 2);
            }
            pos = (((len as usize) & 0x3f) << 8) | lo as usize;
            jumps += 1;
        } else {
            let len = len as usize;
            let start = pos + 1;
            let stop = start + len;
            if stop > bytes.len() {
                return Err(Error::Truncated);
            }
            labels.push(std::str::from_utf8(&bytes[start..stop])?.to_owned());
            pos = stop;
        }
    }

    let mut name = labels.join(".");
    name.push('.');
    Ok((name, end.unwrap()))
}

/// Hostname validation: reject whitespace, `:`, `*`, `?`, or BEL.
///
/// # Test
///
/// ```
/// use ircd_codec::dns::is_valid_hostname;
///
/// assert!(is_valid_hostname("host.example."));
/// assert!(!is_valid_hostname("evil*host"));
/// assert!(!is_valid_hostname("has space"));
/// assert!(!is_valid_hostname("colon:here"));
/// ```
pub fn is_valid_hostname(name: &str) -> bool {
    !name
        .bytes()
        .any(|b| b.is_ascii_whitespace() || matches!(b, b':' | b'*' | b'?' | 0x07))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header_bytes(id: u16, flags: u16, qd: u16, an: u16) -> Vec<u8> {
        let mut v = vec![];
        v.extend_from_slice(&id.to_be_bytes());
        v.extend_from_slice(&flags.to_be_bytes());
        v.extend_from_slice(&qd.to_be_bytes());
        v.extend_from_slice(&an.to_be_bytes());
        v.extend_from_slice(&0u16.to_be_bytes());
        v.extend_from_slice(&0u16.to_be_bytes());
        v
    }

    #[test]
    fn round_trips_a_query() {
        let packet = encode_query(42, "host.example.", QType::A);
        let msg = decode_message(&packet).unwrap();
        assert_eq!(msg.header.id, 42);
        assert_eq!(msg.questions.len(), 1);
        assert_eq!(msg.questions[0].name, "host.example.");
        assert_eq!(msg.questions[0].qtype, QType::A);
    }

    #[test]
    fn decodes_a_answer_with_name_compression() {
        let mut packet = header_bytes(7, 0x8180, 1, 1);
        encode_name(&mut BytesMut::new(), "host.example."); // sanity exercise
        let mut body = BytesMut::new();
        encode_name(&mut body, "host.example.");
        body.put_u16(QType::A.code());
        body.put_u16(CLASS_IN);
        packet.extend_from_slice(&body);

        let name_offset = 12u16;
        let mut answer = BytesMut::new();
        answer.put_u16(0xc000 | name_offset); // pointer back to the question name
        answer.put_u16(QType::A.code());
        answer.put_u16(CLASS_IN);
        answer.put_u32(300);
        answer.put_u16(4);
        answer.put_slice(&[192, 0, 2, 7]);
        packet.extend_from_slice(&answer);

        let msg = decode_message(&packet).unwrap();
        assert_eq!(msg.answers.len(), 1);
        assert_eq!(msg.answers[0].name, "host.example.");
        assert_eq!(msg.answers[0].ttl, 300);
        match msg.answers[0].rdata {
            RData::A(addr) => assert_eq!(addr, Ipv4Addr::new(192, 0, 2, 7)),
            _ => panic!("expected A record"),
        }
    }

    #[test]
    fn ptr_query_builds_reversed_in_addr_arpa_name() {
        let packet = encode_ptr_query(1, Ipv4Addr::new(192, 0, 2, 7));
        let msg = decode_message(&packet).unwrap();
        assert_eq!(msg.questions[0].name, "7.2.0.192.in-addr.arpa.");
        assert_eq!(msg.questions[0].qtype, QType::Ptr);
    }
}

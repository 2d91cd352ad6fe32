//! A chunked byte queue: append at the tail, consume at the head, with
//! bounded per-chunk allocation so one enormous write cannot force one
//! enormous contiguous `realloc`.

use std::collections::VecDeque;

use bytes::{Buf, Bytes};

/// Per-chunk allocation bound. Chosen to match a typical socket read size;
/// it has no bearing on correctness, only on allocation granularity.
pub const CHUNK_SIZE: usize = 4096;

#[derive(Default)]
pub struct DBuf {
    chunks: VecDeque<Bytes>,
    len: usize,
}

impl DBuf {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Appends `bytes` to the tail, splitting it into chunks no larger
    /// than [`CHUNK_SIZE`].
    pub fn append(&mut self, bytes: &[u8]) {
        for chunk in bytes.chunks(CHUNK_SIZE) {
            self.chunks.push_back(Bytes::copy_from_slice(chunk));
        }
        self.len += bytes.len();
    }

    /// Returns the contiguous head chunk, if any, for handing to a
    /// vectored or single write.
    pub fn head(&self) -> Option<&[u8]> {
        self.chunks.front().map(|b| &b[..])
    }

    /// Drops the first `n` bytes, which must be `<= len()`. Used after a
    /// (possibly partial) write succeeds.
    pub fn consume(&mut self, mut n: usize) {
        debug_assert!(n <= self.len);
        while n > 0 {
            let Some(front) = self.chunks.front_mut() else {
                break;
            };
            let front_len = front.len();
            if front_len <= n {
                self.chunks.pop_front();
                n -= front_len;
                self.len -= front_len;
            } else {
                front.advance(n);
                self.len -= n;
                n = 0;
            }
        }
    }

    /// Drops everything, immediately, as `mark_dead` requires.
    pub fn clear(&mut self) {
        self.chunks.clear();
        self.len = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_then_consume_round_trips() {
        let mut buf = DBuf::new();
        buf.append(b"hello ");
        buf.append(b"world");
        assert_eq!(buf.len(), 11);

        let mut out = Vec::new();
        while !buf.is_empty() {
            let head = buf.head().unwrap().to_vec();
            let take = head.len().min(3);
            out.extend_from_slice(&head[..take]);
            buf.consume(take);
        }
        assert_eq!(out, b"hello world");
    }

    #[test]
    fn large_append_splits_into_bounded_chunks() {
        let mut buf = DBuf::new();
        buf.append(&vec![0u8; CHUNK_SIZE * 3 + 7]);
        assert_eq!(buf.len(), CHUNK_SIZE * 3 + 7);
        assert!(buf.head().unwrap().len() <= CHUNK_SIZE);
    }

    #[test]
    fn clear_drops_everything_immediately() {
        let mut buf = DBuf::new();
        buf.append(b"pending notice");
        buf.clear();
        assert!(buf.is_empty());
        assert_eq!(buf.head(), None);
    }
}

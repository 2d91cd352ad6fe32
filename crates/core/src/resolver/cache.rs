//! The LRU-evicted, dual-hash-chained hostname/address cache.

use std::collections::VecDeque;
use std::net::IpAddr;
use std::time::{Duration, Instant};

use ahash::AHashMap;

/// TTL floor: even a short-lived upstream record is cached for at least
/// this long.
pub const TTL_FLOOR: Duration = Duration::from_secs(600);
/// Upper bound on alias names retained per answer.
pub const MAX_ALIASES: usize = 15;
/// Eviction ceiling; the LRU tail is the next victim once exceeded.
pub const MAXCACHED: usize = 1024;

pub struct CacheEntry {
    pub name: String,
    pub aliases: Vec<String>,
    pub addresses: Vec<IpAddr>,
    pub ttl: Duration,
    pub expires_at: Instant,
    /// Bumped on every insert reusing this name; a `Link` holding
    /// `(name, generation)` can detect that its cached entry was evicted
    /// and replaced without needing a back-pointer clear.
    pub generation: u64,
}

#[derive(Default, Clone, Copy)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct CacheStats {
    pub adds: u64,
    pub deletes: u64,
    pub expires: u64,
    pub lookups: u64,
    pub name_hits: u64,
    pub address_hits: u64,
    pub updates: u64,
}

#[derive(Default)]
pub struct Cache {
    by_name: AHashMap<String, CacheEntry>,
    by_address: AHashMap<IpAddr, String>,
    /// Front = most recently used.
    lru: VecDeque<String>,
    next_generation: u64,
    pub stats: CacheStats,
}

impl Cache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }

    fn touch(&mut self, name: &str) {
        if let Some(pos) = self.lru.iter().position(|n| n == name) {
            self.lru.remove(pos);
        }
        self.lru.push_front(name.to_string());
    }

    pub fn lookup_by_name(&mut self, name: &str) -> Option<&CacheEntry> {
        self.stats.lookups += 1;
        if !self.by_name.contains_key(name) {
            return None;
        }
        self.stats.name_hits += 1;
        self.touch(name);
        self.by_name.get(name)
    }

    pub fn lookup_by_address(&mut self, addr: IpAddr) -> Option<&CacheEntry> {
        self.stats.lookups += 1;
        let Some(name) = self.by_address.get(&addr).cloned() else {
            return None;
        };
        self.stats.address_hits += 1;
        self.touch(&name);
        self.by_name.get(&name)
    }

    /// Inserts at the LRU head, floors the TTL, and evicts the tail if the
    /// cache now exceeds [`MAXCACHED`]. Returns the entry's generation.
    pub fn insert(
        &mut self,
        name: String,
        mut aliases: Vec<String>,
        addresses: Vec<IpAddr>,
        ttl: Duration,
    ) -> u64 {
        aliases.truncate(MAX_ALIASES);
        // Short-TTL counting is resolver-side (the caller compares `ttl`
        // against `TTL_FLOOR` itself); this struct only tracks cache hits.
        let floored = ttl.max(TTL_FLOOR);

        self.next_generation += 1;
        let generation = self.next_generation;

        for addr in &addresses {
            self.by_address.insert(*addr, name.clone());
        }

        let is_update = self.by_name.contains_key(&name);
        self.by_name.insert(
            name.clone(),
            CacheEntry {
                name: name.clone(),
                aliases,
                addresses,
                ttl: floored,
                expires_at: Instant::now() + floored,
                generation,
            },
        );
        self.touch(&name);

        if is_update {
            self.stats.updates += 1;
        } else {
            self.stats.adds += 1;
        }

        self.evict_overflow();
        generation
    }

    fn evict_overflow(&mut self) {
        while self.by_name.len() > MAXCACHED {
            let Some(victim) = self.lru.pop_back() else { break };
            self.remove(&victim);
        }
    }

    pub fn remove(&mut self, name: &str) {
        if let Some(entry) = self.by_name.remove(name) {
            for addr in &entry.addresses {
                self.by_address.remove(addr);
            }
            self.stats.deletes += 1;
        }
        if let Some(pos) = self.lru.iter().position(|n| n == name) {
            self.lru.remove(pos);
        }
    }

    /// Sweeps expired entries. Returns the number removed.
    pub fn expire(&mut self, now: Instant) -> usize {
        let expired: Vec<String> = self
            .by_name
            .values()
            .filter(|e| e.expires_at <= now)
            .map(|e| e.name.clone())
            .collect();
        let count = expired.len();
        for name in expired {
            self.remove(&name);
            self.stats.expires += 1;
        }
        count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ttl_is_floored() {
        let mut cache = Cache::new();
        let gen = cache.insert("host.example.".into(), vec![], vec![], Duration::from_secs(60));
        assert!(gen > 0);
        assert_eq!(cache.lookup_by_name("host.example.").unwrap().ttl, TTL_FLOOR);
    }

    #[test]
    fn reachable_from_both_hash_chains() {
        let mut cache = Cache::new();
        let addr: IpAddr = "192.0.2.7".parse().unwrap();
        cache.insert("host.example.".into(), vec![], vec![addr], Duration::from_secs(600));
        assert!(cache.lookup_by_name("host.example.").is_some());
        assert!(cache.lookup_by_address(addr).is_some());
    }

    #[test]
    fn overflow_evicts_lru_tail() {
        let mut cache = Cache::new();
        for i in 0..MAXCACHED + 1 {
            cache.insert(format!("host{i}.example."), vec![], vec![], Duration::from_secs(600));
        }
        assert_eq!(cache.len(), MAXCACHED);
        assert!(cache.lookup_by_name("host0.example.").is_none());
        assert!(cache.lookup_by_name(&format!("host{MAXCACHED}.example.")).is_some());
    }

    #[test]
    fn generation_bumps_on_reinsert() {
        let mut cache = Cache::new();
        let g1 = cache.insert("host.example.".into(), vec![], vec![], Duration::from_secs(600));
        let g2 = cache.insert("host.example.".into(), vec![], vec![], Duration::from_secs(600));
        assert!(g2 > g1);
    }
}

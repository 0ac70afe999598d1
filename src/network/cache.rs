use super::PeerNode;
use lru::LruCache;
use std::{
    net::Ipv4Addr,
    num::NonZeroUsize,
    time::{Duration, Instant},
};

#[derive(Debug)]
struct CacheEntry {
    node: PeerNode,
    refreshed: Instant,
}

/// Capacity bounded, age bounded map of peer states. The least recently
/// used entry is evicted when full; entries older than `max_age` since
/// their last refresh are dropped on access.
#[derive(Debug)]
pub struct PeerCache {
    entries: LruCache<Ipv4Addr, CacheEntry>,
    max_age: Duration,
}

impl PeerCache {
    pub fn new(capacity: usize, max_age: Duration) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: LruCache::new(capacity),
            max_age,
        }
    }

    fn is_expired(&self, entry: &CacheEntry) -> bool {
        entry.refreshed.elapsed() > self.max_age
    }

    /// Inserts or replaces `node`, restarting its age
    pub fn insert(&mut self, node: PeerNode) {
        let entry = CacheEntry {
            node,
            refreshed: Instant::now(),
        };
        self.entries.put(entry.node.ip, entry);
    }

    /// Replaces a live entry without restarting its age
    pub fn update(&mut self, node: PeerNode) -> bool {
        if !self.contains(&node.ip) {
            return false;
        }
        match self.entries.get_mut(&node.ip) {
            Some(entry) => {
                entry.node = node;
                true
            }
            None => false,
        }
    }

    pub fn get(&mut self, ip: &Ipv4Addr) -> Option<PeerNode> {
        if !self.contains(ip) {
            return None;
        }
        self.entries.get(ip).map(|entry| entry.node.clone())
    }

    /// Presence check, does not touch recency
    pub fn contains(&mut self, ip: &Ipv4Addr) -> bool {
        let expired = match self.entries.peek(ip) {
            Some(entry) => self.is_expired(entry),
            None => return false,
        };
        if expired {
            self.entries.pop(ip);
        }
        !expired
    }

    pub fn remove(&mut self, ip: &Ipv4Addr) -> Option<PeerNode> {
        self.entries.pop(ip).map(|entry| entry.node)
    }

    /// Drops every expired entry, returning how many were dropped
    pub fn prune(&mut self) -> usize {
        let expired: Vec<Ipv4Addr> = self
            .entries
            .iter()
            .filter(|(_, entry)| self.is_expired(entry))
            .map(|(ip, _)| *ip)
            .collect();

        for ip in &expired {
            self.entries.pop(ip);
        }
        expired.len()
    }

    pub fn keys(&mut self) -> Vec<Ipv4Addr> {
        self.prune();
        self.entries.iter().map(|(ip, _)| *ip).collect()
    }

    /// Live nodes, most recently used first
    pub fn nodes(&mut self) -> Vec<PeerNode> {
        self.prune();
        self.entries
            .iter()
            .map(|(_, entry)| entry.node.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

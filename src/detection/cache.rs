//! Result cache keyed by raster content hash

use super::types::Detection;
use lru::LruCache;
use std::num::NonZeroUsize;
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
struct CacheEntry {
    results: Vec<Detection>,
    timestamp: Instant,
}

/// Capacity-bounded LRU of detection results with a time-to-live.
pub struct ResultCache {
    entries: LruCache<u64, CacheEntry>,
    ttl: Duration,
    evictions: u64,
    expirations: u64,
}

impl ResultCache {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: LruCache::new(capacity),
            ttl,
            evictions: 0,
            expirations: 0,
        }
    }

    pub fn get(&mut self, key: u64, now: Instant) -> Option<Vec<Detection>> {
        let expired = match self.entries.get(&key) {
            Some(entry) if now.saturating_duration_since(entry.timestamp) < self.ttl => {
                return Some(entry.results.clone());
            }
            Some(_) => true,
            None => false,
        };
        if expired {
            self.entries.pop(&key);
            self.expirations += 1;
        }
        None
    }

    pub fn insert(&mut self, key: u64, results: Vec<Detection>, now: Instant) {
        let entry = CacheEntry {
            results,
            timestamp: now,
        };
        if let Some((evicted, _)) = self.entries.push(key, entry)
            && evicted != key
        {
            self.evictions += 1;
            log::debug!("🔍 Result cache full, evicted entry {:016x}", evicted);
        }
    }

    /// Drop every expired entry; returns how many were removed.
    pub fn sweep(&mut self, now: Instant) -> usize {
        let expired: Vec<u64> = self
            .entries
            .iter()
            .filter(|(_, entry)| now.saturating_duration_since(entry.timestamp) >= self.ttl)
            .map(|(key, _)| *key)
            .collect();
        for key in &expired {
            self.entries.pop(key);
        }
        self.expirations += expired.len() as u64;
        expired.len()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries pushed out by capacity
    pub fn evictions(&self) -> u64 {
        self.evictions
    }

    /// Entries removed after their TTL ran out
    pub fn expirations(&self) -> u64 {
        self.expirations
    }
}

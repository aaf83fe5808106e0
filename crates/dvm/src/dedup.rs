//! Bounded set of job ids that have already been taken.
//!
//! Relays redeliver the same request freely, so intake records every job id
//! it commits to. The set is capped by count (LRU eviction) and by age: an
//! entry older than the TTL no longer blocks a redelivery.

use lru::LruCache;
use parking_lot::Mutex;
use std::num::NonZeroUsize;
use std::time::{Duration, Instant};

pub const DEFAULT_CAPACITY: usize = 10_000;
pub const DEFAULT_TTL: Duration = Duration::from_secs(24 * 60 * 60);

pub struct ProcessedJobSet {
    entries: Mutex<LruCache<String, Instant>>,
    ttl: Duration,
}

impl ProcessedJobSet {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
            ttl,
        }
    }

    pub fn contains(&self, id: &str) -> bool {
        self.contains_at(id, Instant::now())
    }

    pub fn contains_at(&self, id: &str, now: Instant) -> bool {
        let mut entries = self.entries.lock();
        match entries.peek(id) {
            Some(&seen) if now.duration_since(seen) < self.ttl => true,
            Some(_) => {
                entries.pop(id);
                false
            }
            None => false,
        }
    }

    /// Record `id` unless a live entry exists. Returns true for the caller
    /// that inserted it; every concurrent duplicate gets false.
    pub fn insert(&self, id: &str) -> bool {
        self.insert_at(id, Instant::now())
    }

    pub fn insert_at(&self, id: &str, now: Instant) -> bool {
        let mut entries = self.entries.lock();
        if let Some(&seen) = entries.peek(id)
            && now.duration_since(seen) < self.ttl
        {
            return false;
        }
        entries.put(id.to_string(), now);
        true
    }

    /// Drop expired entries; returns how many went.
    pub fn purge_expired(&self, now: Instant) -> usize {
        let mut entries = self.entries.lock();
        let expired: Vec<String> = entries
            .iter()
            .filter(|(_, seen)| now.duration_since(**seen) >= self.ttl)
            .map(|(id, _)| id.clone())
            .collect();
        for id in &expired {
            entries.pop(id);
        }
        expired.len()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.entries.lock().cap().get()
    }
}

impl Default for ProcessedJobSet {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY, DEFAULT_TTL)
    }
}

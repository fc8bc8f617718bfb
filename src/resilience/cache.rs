//! In-memory TTL cache over a concurrent map.
//!
//! Entries expire lazily on read; `purge_expired` sweeps the rest. Keys are
//! caller-built deterministic strings, so concurrent runs share entries safely.

use std::time::{Duration, Instant};

use dashmap::DashMap;

pub struct TtlCache<V> {
    ttl: Duration,
    entries: DashMap<String, (Instant, V)>,
}

impl<V: Clone> TtlCache<V> {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: DashMap::new(),
        }
    }

    pub fn get(&self, key: &str) -> Option<V> {
        let expired = match self.entries.get(key) {
            Some(entry) => {
                let (expires_at, value) = entry.value();
                if Instant::now() < *expires_at {
                    return Some(value.clone());
                }
                true
            }
            None => false,
        };
        if expired {
            self.entries.remove(key);
        }
        None
    }

    pub fn insert(&self, key: impl Into<String>, value: V) {
        self.entries
            .insert(key.into(), (Instant::now() + self.ttl, value));
    }

    pub fn invalidate(&self, key: &str) {
        self.entries.remove(key);
    }

    /// Drop every expired entry. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, (expires_at, _)| now < *expires_at);
        before.saturating_sub(self.entries.len())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hit_before_expiry() {
        let cache = TtlCache::new(Duration::from_secs(60));
        cache.insert("mcp:mail:after=1", vec![1, 2, 3]);
        assert_eq!(cache.get("mcp:mail:after=1"), Some(vec![1, 2, 3]));
        assert_eq!(cache.get("mcp:mail:after=2"), None);
    }

    #[test]
    fn test_expired_entry_is_dropped_on_read() {
        let cache = TtlCache::new(Duration::from_millis(5));
        cache.insert("k", 42u32);
        std::thread::sleep(Duration::from_millis(15));
        assert_eq!(cache.get("k"), None);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_purge_expired() {
        let cache = TtlCache::new(Duration::from_millis(5));
        cache.insert("a", 1u8);
        cache.insert("b", 2u8);
        std::thread::sleep(Duration::from_millis(15));
        assert_eq!(cache.purge_expired(), 2);
        assert_eq!(cache.len(), 0);
    }
}

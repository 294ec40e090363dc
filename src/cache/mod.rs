//! Best-effort read-through cache for catalog data.
//!
//! Entries expire after a fixed TTL and are dropped wholesale whenever the
//! catalog is mutated. The cache is never consulted on order or courier
//! mutation paths.
//!
//! Readers that fill the cache from the store capture [`TtlCache::generation`]
//! before the read and insert through [`TtlCache::insert_if_current`], so a
//! value loaded before an invalidation is never kept after it.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use dashmap::DashMap;

#[derive(Debug, Clone)]
struct Entry<V> {
    value: V,
    expires_at: Instant,
}

#[derive(Debug)]
pub struct TtlCache<V> {
    entries: DashMap<String, Entry<V>>,
    ttl: Duration,
    generation: AtomicU64,
}

impl<V: Clone> TtlCache<V> {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
            generation: AtomicU64::new(0),
        }
    }

    /// Returns a live entry, evicting it if it has expired.
    pub fn get(&self, key: &str) -> Option<V> {
        let now = Instant::now();
        let hit = self
            .entries
            .get(key)
            .filter(|entry| entry.expires_at > now)
            .map(|entry| entry.value.clone());

        if hit.is_none() {
            self.entries.remove_if(key, |_, entry| entry.expires_at <= now);
        }
        hit
    }

    pub fn insert(&self, key: impl Into<String>, value: V) {
        if self.ttl.is_zero() {
            return;
        }
        self.entries.insert(
            key.into(),
            Entry {
                value,
                expires_at: Instant::now() + self.ttl,
            },
        );
    }

    /// Inserts a value that was loaded after `generation` was read. The entry
    /// is dropped again if an invalidation happened since.
    pub fn insert_if_current(&self, key: impl Into<String>, value: V, generation: u64) {
        let key = key.into();
        self.insert(key.clone(), value);
        if self.generation() != generation {
            self.entries.remove(&key);
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    pub fn invalidate_all(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.entries.clear();
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
    use std::time::Duration;

    use super::TtlCache;

    #[test]
    fn returns_fresh_entries() {
        let cache = TtlCache::new(Duration::from_secs(60));
        cache.insert("dishes:all", vec![1, 2, 3]);

        assert_eq!(cache.get("dishes:all"), Some(vec![1, 2, 3]));
        assert_eq!(cache.get("dishes:other"), None);
    }

    #[test]
    fn expired_entries_are_evicted() {
        let cache = TtlCache::new(Duration::from_millis(10));
        cache.insert("dishes:all", 7);

        std::thread::sleep(Duration::from_millis(30));

        assert_eq!(cache.get("dishes:all"), None);
        assert!(cache.is_empty());
    }

    #[test]
    fn zero_ttl_disables_caching() {
        let cache = TtlCache::new(Duration::ZERO);
        cache.insert("dishes:all", 7);

        assert!(cache.is_empty());
    }

    #[test]
    fn value_loaded_before_invalidation_is_not_kept() {
        let cache = TtlCache::new(Duration::from_secs(60));
        let before = cache.generation();

        cache.invalidate_all();
        cache.insert_if_current("dish:1", "old price", before);
        assert!(cache.is_empty());

        cache.insert_if_current("dish:1", "new price", cache.generation());
        assert_eq!(cache.get("dish:1"), Some("new price"));
    }

    #[test]
    fn invalidate_all_clears_every_key() {
        let cache = TtlCache::new(Duration::from_secs(60));
        cache.insert("a", 1);
        cache.insert("b", 2);
        cache.invalidate_all();

        assert_eq!(cache.len(), 0);
    }
}

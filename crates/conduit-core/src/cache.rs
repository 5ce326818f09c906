//! Bounded LRU+TTL cache shape shared by every cache in the system: the
//! orchestrator's dedup cache and the bridge's dedup/quote/
//! outbound-self caches. Per the "Caches
//! as bounded LRU+TTL" design note, all four are timestamped entries with
//! lazy eviction on every write once size exceeds the cap — this is the one
//! implementation they all share.

use std::collections::HashMap;
use std::hash::Hash;
use std::time::{Duration, Instant};

/// A bounded cache with per-entry TTL and an overall size cap.
///
/// Eviction is lazy: expired entries are dropped as they're encountered by
/// `get`/`insert`, and once `len() > max_entries` the single oldest entry
/// (by insertion time) is evicted on every subsequent insert. There is no
/// background sweep task — the caller's own request volume drives cleanup,
/// which is sufficient at the cache sizes these caches run at (hundreds to
/// a few thousand entries).
pub struct TtlLruCache<K: Eq + Hash + Clone, V> {
    ttl: Duration,
    max_entries: usize,
    entries: HashMap<K, (Instant, V)>,
}

impl<K: Eq + Hash + Clone, V> TtlLruCache<K, V> {
    pub fn new(ttl: Duration, max_entries: usize) -> Self {
        Self {
            ttl,
            max_entries,
            entries: HashMap::new(),
        }
    }

    fn evict_expired(&mut self) {
        let ttl = self.ttl;
        let now = Instant::now();
        self.entries.retain(|_, (ts, _)| now.duration_since(*ts) < ttl);
    }

    fn evict_oldest_if_over_capacity(&mut self) {
        while self.entries.len() > self.max_entries {
            if let Some(oldest_key) = self
                .entries
                .iter()
                .min_by_key(|(_, (ts, _))| *ts)
                .map(|(k, _)| k.clone())
            {
                self.entries.remove(&oldest_key);
            } else {
                break;
            }
        }
    }

    /// True if `key` is present and not expired. Does not refresh the TTL.
    pub fn contains(&mut self, key: &K) -> bool {
        self.evict_expired();
        self.entries.contains_key(key)
    }

    pub fn get(&mut self, key: &K) -> Option<&V> {
        self.evict_expired();
        self.entries.get(key).map(|(_, v)| v)
    }

    /// Insert or overwrite an entry, refreshing its timestamp. Returns
    /// `true` if `key` was already present (the pre-insert state — useful
    /// for dedup checks that need "was this a duplicate?" in one call).
    pub fn insert(&mut self, key: K, value: V) -> bool {
        self.evict_expired();
        let existed = self.entries.contains_key(&key);
        self.entries.insert(key, (Instant::now(), value));
        self.evict_oldest_if_over_capacity();
        existed
    }

    pub fn len(&mut self) -> usize {
        self.evict_expired();
        self.entries.len()
    }

    pub fn is_empty(&mut self) -> bool {
        self.len() == 0
    }
}

/// Convenience alias for caches that only need presence, not an associated
/// value (dedup, outbound-self).
pub type TtlLruSet<K> = TtlLruCache<K, ()>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::sleep;

    #[test]
    fn insert_reports_prior_existence() {
        let mut cache: TtlLruSet<String> = TtlLruCache::new(Duration::from_secs(60), 10);
        assert!(!cache.insert("a".to_string(), ()));
        assert!(cache.insert("a".to_string(), ()));
    }

    #[test]
    fn entries_expire_after_ttl() {
        let mut cache: TtlLruSet<String> = TtlLruCache::new(Duration::from_millis(10), 10);
        cache.insert("a".to_string(), ());
        assert!(cache.contains(&"a".to_string()));
        sleep(Duration::from_millis(30));
        assert!(!cache.contains(&"a".to_string()));
    }

    #[test]
    fn capacity_evicts_oldest_entry() {
        let mut cache: TtlLruSet<i32> = TtlLruCache::new(Duration::from_secs(60), 2);
        cache.insert(1, ());
        sleep(Duration::from_millis(5));
        cache.insert(2, ());
        sleep(Duration::from_millis(5));
        cache.insert(3, ());
        assert!(!cache.contains(&1));
        assert!(cache.contains(&2));
        assert!(cache.contains(&3));
    }
}

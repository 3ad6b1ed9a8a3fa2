//! Bounded LRU store with per-key TTL
//!
//! All bookkeeping (recency list, TTL index) lives behind one mutex per store.
//! The lock is never held across an await point.

use crate::metrics::Metrics;
use crate::storage::lru::LruMap;
use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::AbortHandle;
use tracing::{debug, trace};

/// TTL registration for one key
#[derive(Debug)]
struct TtlRecord {
    seconds: u64,
    /// Distinguishes this registration from any later one on the same key
    generation: u64,
    task: AbortHandle,
}

#[derive(Debug)]
struct State {
    entries: LruMap<Bytes>,
    ttls: HashMap<String, TtlRecord>,
    next_generation: u64,
}

impl State {
    /// Drop the TTL registration of a key that is leaving the store
    fn forget_ttl(&mut self, key: &str) {
        if let Some(record) = self.ttls.remove(key) {
            record.task.abort();
        }
    }
}

struct Shared {
    state: Mutex<State>,
    capacity: usize,
    metrics: Arc<Metrics>,
}

impl Shared {
    /// Deferred deletion; a no-op unless `generation` is still the key's registration
    fn expire_registration(&self, key: &str, generation: u64) {
        let mut state = self.state.lock();
        if state.ttls.get(key).map(|r| r.generation) != Some(generation) {
            trace!(key, generation, "Stale expiry task, key kept");
            return;
        }
        state.ttls.remove(key);
        state.entries.remove(key);
        self.metrics.expirations.inc();
        debug!(key, "Expired key");
    }
}

/// Cache store of one node. Clones share the same contents.
#[derive(Clone)]
pub struct Store {
    shared: Arc<Shared>,
}

impl Store {
    /// Create an empty store holding at most `capacity` entries (minimum 1)
    pub fn new(capacity: usize, metrics: Arc<Metrics>) -> Self {
        let capacity = capacity.max(1);
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(State {
                    entries: LruMap::with_capacity(capacity + 1),
                    ttls: HashMap::new(),
                    next_generation: 0,
                }),
                capacity,
                metrics,
            }),
        }
    }

    pub fn capacity(&self) -> usize {
        self.shared.capacity
    }

    pub fn len(&self) -> usize {
        self.shared.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Get a value, marking the key most recently used
    pub fn get(&self, key: &str) -> Option<Bytes> {
        self.shared.state.lock().entries.get(key).cloned()
    }

    /// Insert or overwrite a value.
    ///
    /// Returns the key evicted to stay within capacity, if any. An existing
    /// TTL registration on `key` is kept.
    pub fn set(&self, key: &str, value: Bytes) -> Option<String> {
        let mut state = self.shared.state.lock();
        state.entries.insert(key.to_string(), value);

        if state.entries.len() <= self.shared.capacity {
            return None;
        }

        let (evicted, _) = state.entries.pop_lru()?;
        state.forget_ttl(&evicted);
        self.shared.metrics.evictions.inc();
        trace!(key = %evicted, "Evicted least recently used key");
        Some(evicted)
    }

    /// Schedule deletion of `key` after `ttl_seconds`.
    ///
    /// Returns false, scheduling nothing, if the key is absent. A previous
    /// registration on the same key is replaced.
    pub fn expire(&self, key: &str, ttl_seconds: u64) -> bool {
        let mut state = self.shared.state.lock();
        if !state.entries.contains_key(key) {
            return false;
        }

        let generation = state.next_generation;
        state.next_generation += 1;

        let shared = Arc::clone(&self.shared);
        let owned_key = key.to_string();
        let task = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(ttl_seconds)).await;
            shared.expire_registration(&owned_key, generation);
        })
        .abort_handle();

        let record = TtlRecord {
            seconds: ttl_seconds,
            generation,
            task,
        };
        if let Some(previous) = state.ttls.insert(key.to_string(), record) {
            previous.task.abort();
        }
        true
    }

    /// Registered TTL in seconds (not the time remaining), or -1
    pub fn ttl(&self, key: &str) -> i64 {
        match self.shared.state.lock().ttls.get(key) {
            Some(record) => i64::try_from(record.seconds).unwrap_or(i64::MAX),
            None => -1,
        }
    }

    /// Remove a key and its TTL registration. Returns true if the key existed.
    pub fn delete(&self, key: &str) -> bool {
        let mut state = self.shared.state.lock();
        state.forget_ttl(key);
        state.entries.remove(key).is_some()
    }

    /// Full contents from least to most recently used
    pub fn snapshot(&self) -> Vec<(String, Bytes)> {
        let state = self.shared.state.lock();
        state
            .entries
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    /// Load entries in order, the last one ending up most recently used.
    /// Returns the number of entries held afterwards.
    ///
    /// Entries beyond capacity are dropped oldest first without counting as
    /// evictions.
    pub fn restore(&self, entries: Vec<(String, Bytes)>) -> usize {
        let mut state = self.shared.state.lock();
        for (key, value) in entries {
            state.entries.insert(key, value);
        }

        let mut trimmed = 0;
        while state.entries.len() > self.shared.capacity {
            let Some((key, _)) = state.entries.pop_lru() else {
                break;
            };
            state.forget_ttl(&key);
            trimmed += 1;
        }
        if trimmed > 0 {
            debug!(trimmed, capacity = self.shared.capacity, "Snapshot larger than capacity");
        }
        state.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store(capacity: usize) -> Store {
        Store::new(capacity, Arc::new(Metrics::new()))
    }

    fn value(s: &'static str) -> Bytes {
        Bytes::from_static(s.as_bytes())
    }

    #[test]
    fn test_set_get() {
        let store = store(10);
        assert_eq!(store.set("A", value("123")), None);
        assert_eq!(store.get("A"), Some(value("123")));
        assert_eq!(store.get("missing"), None);
    }

    #[test]
    fn test_capacity_one_evicts_previous() {
        let store = store(1);
        store.set("A", value("123"));
        assert_eq!(store.set("B", value("ANACONDA")), Some("A".to_string()));
        assert_eq!(store.get("B"), Some(value("ANACONDA")));
        assert_eq!(store.get("A"), None);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_get_affects_eviction() {
        let store = store(2);
        store.set("a", value("1"));
        store.set("b", value("2"));
        store.get("a");
        assert_eq!(store.set("c", value("3")), Some("b".to_string()));
        assert!(store.get("a").is_some());
    }

    #[test]
    fn test_overwrite_does_not_evict() {
        let store = store(2);
        store.set("a", value("1"));
        store.set("b", value("2"));
        assert_eq!(store.set("a", value("10")), None);
        assert_eq!(store.len(), 2);
        assert_eq!(store.get("a"), Some(value("10")));
    }

    #[tokio::test]
    async fn test_expire_absent_key() {
        let store = store(4);
        assert!(!store.expire("nope", 1));
        assert_eq!(store.ttl("nope"), -1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expire_removes_key() {
        let store = store(4);
        store.set("A", value("123"));
        assert_eq!(store.ttl("A"), -1);

        assert!(store.expire("A", 10));
        assert_eq!(store.ttl("A"), 10);

        tokio::time::sleep(Duration::from_secs(9)).await;
        assert_eq!(store.get("A"), Some(value("123")));
        assert_eq!(store.ttl("A"), 10);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(store.get("A"), None);
        assert_eq!(store.ttl("A"), -1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reexpire_replaces_schedule() {
        let store = store(4);
        store.set("A", value("1"));
        assert!(store.expire("A", 5));
        assert!(store.expire("A", 20));
        assert_eq!(store.ttl("A"), 20);

        tokio::time::sleep(Duration::from_secs(6)).await;
        assert_eq!(store.get("A"), Some(value("1")));

        tokio::time::sleep(Duration::from_secs(15)).await;
        assert_eq!(store.get("A"), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_task_spares_reset_key() {
        let store = store(4);
        store.set("A", value("old"));
        assert!(store.expire("A", 5));

        // Deleting and setting again drops the first registration.
        assert!(store.delete("A"));
        store.set("A", value("new"));

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(store.get("A"), Some(value("new")));
        assert_eq!(store.ttl("A"), -1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_set_keeps_ttl_registration() {
        let store = store(4);
        store.set("A", value("1"));
        assert!(store.expire("A", 5));
        store.set("A", value("2"));
        assert_eq!(store.ttl("A"), 5);

        tokio::time::sleep(Duration::from_secs(6)).await;
        assert_eq!(store.get("A"), None);
    }

    #[tokio::test]
    async fn test_eviction_clears_ttl() {
        let store = store(1);
        store.set("A", value("1"));
        assert!(store.expire("A", 100));
        store.set("B", value("2"));
        assert_eq!(store.ttl("A"), -1);
    }

    #[test]
    fn test_delete() {
        let store = store(4);
        assert!(!store.delete("A"));
        store.set("A", value("1"));
        assert!(store.delete("A"));
        assert!(store.is_empty());
    }

    #[test]
    fn test_snapshot_restore() {
        let store = store(3);
        store.set("a", value("1"));
        store.set("b", value("2"));
        store.set("c", value("3"));
        store.get("a");

        let snapshot = store.snapshot();
        let keys: Vec<&str> = snapshot.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(keys, vec!["b", "c", "a"]);

        let fresh = self::store(3);
        assert_eq!(fresh.restore(snapshot.clone()), 3);
        assert_eq!(fresh.snapshot(), snapshot);
    }

    #[test]
    fn test_restore_trims_to_capacity() {
        let store = store(2);
        let entries = vec![
            ("a".to_string(), value("1")),
            ("b".to_string(), value("2")),
            ("c".to_string(), value("3")),
        ];
        assert_eq!(store.restore(entries), 2);
        assert_eq!(store.get("a"), None);
        assert_eq!(store.get("c"), Some(value("3")));
        assert_eq!(store.shared.metrics.evictions.get(), 0);

        // Later writes still count
        store.set("d", value("4"));
        assert_eq!(store.shared.metrics.evictions.get(), 1);
    }
}

//! Byte-bounded LRU store with optional per-entry TTL.
//!
//! Recency is tracked with key-linked adjacency: every entry carries the
//! keys of its neighbours in the recency order, with `head` the most
//! recently used key and `tail` the least. All list surgery is O(1) map
//! operations and the whole structure lives behind one mutex, since `get`
//! mutates recency.

use meshcache_common::ByteView;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Eviction callback, invoked for capacity evictions and explicit deletes.
pub type EvictFn = Box<dyn Fn(&str, &ByteView) + Send + Sync>;

/// Hit/miss counters for one store.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub gets: u64,
    pub hits: u64,
}

struct Entry {
    value: ByteView,
    expires_at: Option<Instant>,
    prev: Option<String>,
    next: Option<String>,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|exp| exp <= now)
    }
}

#[derive(Default)]
struct Inner {
    map: HashMap<String, Entry>,
    /// Most recently used key
    head: Option<String>,
    /// Least recently used key
    tail: Option<String>,
    used_bytes: i64,
}

impl Inner {
    fn charge(key: &str, value: &ByteView) -> i64 {
        key.len() as i64 + value.len() as i64
    }

    /// Detach `key` from the recency order. The entry stays in the map.
    fn unlink(&mut self, key: &str) {
        let (prev, next) = match self.map.get_mut(key) {
            Some(entry) => (entry.prev.take(), entry.next.take()),
            None => return,
        };
        match &prev {
            Some(p) => {
                if let Some(e) = self.map.get_mut(p) {
                    e.next = next.clone();
                }
            }
            None => self.head = next.clone(),
        }
        match &next {
            Some(n) => {
                if let Some(e) = self.map.get_mut(n) {
                    e.prev = prev.clone();
                }
            }
            None => self.tail = prev,
        }
    }

    /// Make `key` the most recently used entry. Must already be unlinked.
    fn push_front(&mut self, key: &str) {
        let old_head = self.head.replace(key.to_string());
        if let Some(h) = &old_head {
            if let Some(e) = self.map.get_mut(h) {
                e.prev = Some(key.to_string());
            }
        } else {
            self.tail = Some(key.to_string());
        }
        if let Some(entry) = self.map.get_mut(key) {
            entry.prev = None;
            entry.next = old_head;
        }
    }

    /// Remove `key` entirely, returning its value for the eviction hook.
    fn remove(&mut self, key: &str) -> Option<ByteView> {
        if !self.map.contains_key(key) {
            return None;
        }
        self.unlink(key);
        let entry = self.map.remove(key)?;
        self.used_bytes -= Self::charge(key, &entry.value);
        Some(entry.value)
    }
}

/// A concurrency-safe LRU cache bounded by total bytes.
///
/// `max_bytes` of 0 means unbounded. The byte accounting charges
/// `key.len() + value.len()` per entry; after every `add` the least
/// recently used entries are evicted until the budget holds again.
pub struct LruStore {
    max_bytes: i64,
    inner: Mutex<Inner>,
    on_evict: Option<EvictFn>,
    gets: AtomicU64,
    hits: AtomicU64,
}

impl LruStore {
    pub fn new(max_bytes: i64, on_evict: Option<EvictFn>) -> Self {
        Self {
            max_bytes,
            inner: Mutex::new(Inner::default()),
            on_evict,
            gets: AtomicU64::new(0),
            hits: AtomicU64::new(0),
        }
    }

    /// Look up a key, promoting it to most recently used on a hit.
    ///
    /// An expired entry is removed and reported as a miss; expiry removal
    /// does not fire the eviction hook.
    pub fn get(&self, key: &str) -> Option<ByteView> {
        self.gets.fetch_add(1, Ordering::Relaxed);
        let mut inner = self.inner.lock();

        enum Lookup {
            Miss,
            Expired,
            Hit(ByteView),
        }

        let now = Instant::now();
        let lookup = match inner.map.get(key) {
            None => Lookup::Miss,
            Some(entry) if entry.is_expired(now) => Lookup::Expired,
            Some(entry) => Lookup::Hit(entry.value.clone()),
        };

        match lookup {
            Lookup::Miss => None,
            Lookup::Expired => {
                tracing::debug!(key, "cache entry expired");
                inner.remove(key);
                None
            }
            Lookup::Hit(value) => {
                inner.unlink(key);
                inner.push_front(key);
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(value)
            }
        }
    }

    /// Insert or replace a key. A `ttl` of `None` means the entry never
    /// expires.
    pub fn add(&self, key: &str, value: ByteView, ttl: Option<Duration>) {
        let expires_at = ttl.map(|d| Instant::now() + d);
        let mut inner = self.inner.lock();

        if let Some(entry) = inner.map.get_mut(key) {
            let delta = value.len() as i64 - entry.value.len() as i64;
            entry.value = value;
            entry.expires_at = expires_at;
            inner.used_bytes += delta;
            inner.unlink(key);
            inner.push_front(key);
        } else {
            inner.used_bytes += Inner::charge(key, &value);
            inner.map.insert(
                key.to_string(),
                Entry {
                    value,
                    expires_at,
                    prev: None,
                    next: None,
                },
            );
            inner.push_front(key);
        }

        while self.max_bytes != 0 && inner.used_bytes > self.max_bytes {
            let Some(victim) = inner.tail.clone() else {
                break;
            };
            let value = inner.remove(&victim);
            if let (Some(hook), Some(value)) = (&self.on_evict, value) {
                hook(&victim, &value);
            }
        }
    }

    /// Remove a key if present. Fires the eviction hook.
    pub fn delete(&self, key: &str) -> bool {
        let value = self.inner.lock().remove(key);
        match value {
            Some(value) => {
                if let Some(hook) = &self.on_evict {
                    hook(key, &value);
                }
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Current byte accounting, including keys.
    pub fn used_bytes(&self) -> i64 {
        self.inner.lock().used_bytes
    }

    /// Drop every entry without firing the eviction hook.
    pub fn clear(&self) {
        *self.inner.lock() = Inner::default();
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            gets: self.gets.load(Ordering::Relaxed),
            hits: self.hits.load(Ordering::Relaxed),
        }
    }

    /// Keys in recency order, most recent first. Test support.
    #[cfg(test)]
    fn recency_keys(&self) -> Vec<String> {
        let inner = self.inner.lock();
        let mut keys = Vec::with_capacity(inner.map.len());
        let mut cursor = inner.head.clone();
        while let Some(key) = cursor {
            cursor = inner.map[&key].next.clone();
            keys.push(key);
        }
        keys
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    fn view(s: &str) -> ByteView {
        ByteView::from(s)
    }

    #[test]
    fn test_get_miss_then_hit() {
        let store = LruStore::new(0, None);
        assert!(store.get("Tom").is_none());
        store.add("Tom", view("630"), None);
        assert_eq!(store.get("Tom").unwrap().to_string(), "630");
        assert_eq!(store.stats(), CacheStats { gets: 2, hits: 1 });
    }

    #[test]
    fn test_eviction_respects_budget_and_recency() {
        // Two entries of key(2) + value(4) fit, a third forces one out.
        let store = LruStore::new(12, None);
        store.add("k1", view("aaaa"), None);
        store.add("k2", view("bbbb"), None);
        // Touch k1 so k2 becomes the LRU victim.
        assert!(store.get("k1").is_some());
        store.add("k3", view("cccc"), None);

        assert_eq!(store.len(), 2);
        assert!(store.get("k2").is_none());
        assert!(store.get("k1").is_some());
        assert!(store.get("k3").is_some());
        assert!(store.used_bytes() <= 12);
    }

    #[test]
    fn test_budget_holds_after_every_add() {
        let store = LruStore::new(64, None);
        for i in 0..200 {
            let key = format!("key-{i}");
            store.add(&key, view("0123456789"), None);
            assert!(store.used_bytes() <= 64, "budget violated after add {i}");
        }
    }

    #[test]
    fn test_replace_adjusts_accounting() {
        let store = LruStore::new(0, None);
        store.add("k", view("aa"), None);
        let before = store.used_bytes();
        store.add("k", view("aaaa"), None);
        assert_eq!(store.used_bytes(), before + 2);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_oversized_entry_clears_the_store() {
        let store = LruStore::new(8, None);
        store.add("k1", view("aa"), None);
        store.add("huge", view("0123456789abcdef"), None);
        assert_eq!(store.len(), 0);
        assert_eq!(store.used_bytes(), 0);
    }

    #[test]
    fn test_evict_hook_fires_in_lru_order() {
        let evicted: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
        let seen = evicted.clone();
        let store = LruStore::new(
            12,
            Some(Box::new(move |key, _value| {
                seen.lock().push(key.to_string());
            })),
        );
        store.add("k1", view("aaaa"), None);
        store.add("k2", view("bbbb"), None);
        store.add("k3", view("cccc"), None);
        assert_eq!(*evicted.lock(), vec!["k1".to_string()]);
    }

    #[test]
    fn test_delete_fires_hook_and_is_idempotent() {
        let count = Arc::new(AtomicUsize::new(0));
        let hook_count = count.clone();
        let store = LruStore::new(
            0,
            Some(Box::new(move |_key, _value| {
                hook_count.fetch_add(1, Ordering::SeqCst);
            })),
        );
        store.add("k", view("v"), None);
        assert!(store.delete("k"));
        assert!(!store.delete("k"));
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(store.used_bytes(), 0);
    }

    #[test]
    fn test_ttl_expiry_reports_miss() {
        let store = LruStore::new(0, None);
        store.add("k", view("v"), Some(Duration::from_millis(40)));
        assert!(store.get("k").is_some());
        std::thread::sleep(Duration::from_millis(80));
        assert!(store.get("k").is_none());
        assert_eq!(store.len(), 0);
        assert_eq!(store.used_bytes(), 0);
    }

    #[test]
    fn test_recency_list_and_index_stay_consistent() {
        let store = LruStore::new(64, None);
        for i in 0..50 {
            store.add(&format!("k{}", i % 7), view("0123"), None);
            if i % 3 == 0 {
                store.get(&format!("k{}", i % 5));
            }
            if i % 11 == 0 {
                store.delete(&format!("k{}", i % 7));
            }

            let ordered = store.recency_keys();
            assert_eq!(ordered.len(), store.len());
            let inner = store.inner.lock();
            for key in &ordered {
                assert!(inner.map.contains_key(key));
            }
        }
    }

    #[test]
    fn test_clear_resets_everything() {
        let store = LruStore::new(0, None);
        store.add("a", view("1"), None);
        store.add("b", view("2"), None);
        store.clear();
        assert!(store.is_empty());
        assert_eq!(store.used_bytes(), 0);
        assert!(store.get("a").is_none());
    }
}

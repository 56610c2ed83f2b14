//! Cache groups: named namespaces binding an LRU store to an origin loader.

use crate::lru::{CacheStats, LruStore};
use crate::singleflight::SingleFlight;
use async_trait::async_trait;
use meshcache_common::{ByteView, CacheError, Result};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

/// Errors an origin loader may raise.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Origin data source for a group.
///
/// `Ok(None)` means the entity does not exist; `Ok(Some(bytes))` is a valid
/// value even when empty. This keeps "absent" distinguishable from a
/// legitimate zero-byte value.
#[async_trait]
pub trait Loader: Send + Sync + 'static {
    async fn load(&self, key: &str) -> std::result::Result<Option<Vec<u8>>, BoxError>;
}

/// A remote owner that can serve a `(group, key)` read.
#[async_trait]
pub trait PeerGetter: Send + Sync {
    async fn get(&self, group: &str, key: &str) -> Result<ByteView>;
}

/// Routes a key to the peer that owns it, if that peer is not this node.
pub trait PeerPicker: Send + Sync {
    fn pick_peer(&self, key: &str) -> Option<Arc<dyn PeerGetter>>;
}

struct GroupInner {
    name: String,
    loader: Arc<dyn Loader>,
    store: LruStore,
    flight: SingleFlight,
    ttl: Option<Duration>,
    peers: OnceLock<Arc<dyn PeerPicker>>,
}

/// A named cache namespace with its own size budget, TTL and origin loader.
///
/// `Group` is a cheap handle; clones share the same cache.
#[derive(Clone)]
pub struct Group {
    inner: Arc<GroupInner>,
}

impl Group {
    pub fn new(
        name: impl Into<String>,
        max_bytes: i64,
        ttl: Option<Duration>,
        loader: Arc<dyn Loader>,
    ) -> Self {
        let name = name.into();
        tracing::info!(group = %name, max_bytes, "created cache group");
        Self {
            inner: Arc::new(GroupInner {
                name,
                loader,
                store: LruStore::new(max_bytes, None),
                flight: SingleFlight::new(),
                ttl,
                peers: OnceLock::new(),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn stats(&self) -> CacheStats {
        self.inner.store.stats()
    }

    /// Register the peer router. Only the first registration takes effect.
    pub fn register_peers(&self, peers: Arc<dyn PeerPicker>) {
        if self.inner.peers.set(peers).is_err() {
            tracing::warn!(group = %self.inner.name, "register_peers called more than once");
        }
    }

    /// Fetch a value, consulting the local cache, then the owning peer,
    /// then the origin loader.
    pub async fn get(&self, key: &str) -> Result<ByteView> {
        if key.is_empty() {
            return Err(CacheError::EmptyKey);
        }

        if let Some(value) = self.inner.store.get(key) {
            tracing::debug!(group = %self.inner.name, key, "cache hit");
            return Ok(value);
        }

        let inner = self.inner.clone();
        let owned = key.to_string();
        self.inner
            .flight
            .do_call(key, async move { inner.load(&owned).await })
            .await
    }

    /// Remove a key from the local cache. Deleting an absent key succeeds.
    pub fn delete(&self, key: &str) -> Result<bool> {
        if key.is_empty() {
            return Err(CacheError::EmptyKey);
        }
        Ok(self.inner.store.delete(key))
    }

    /// Drop every cached entry in this group.
    pub fn clear(&self) {
        self.inner.store.clear();
        tracing::info!(group = %self.inner.name, "cleared cache group");
    }
}

impl GroupInner {
    async fn load(&self, key: &str) -> Result<ByteView> {
        if let Some(picker) = self.peers.get() {
            if let Some(peer) = picker.pick_peer(key) {
                match peer.get(&self.name, key).await {
                    Ok(value) => {
                        // The value is owned by the remote; caching it here
                        // would double every entry under normal operation.
                        tracing::debug!(group = %self.name, key, "served from peer");
                        return Ok(value);
                    }
                    Err(err) => {
                        tracing::warn!(
                            group = %self.name,
                            key,
                            %err,
                            "peer fetch failed, falling back to origin"
                        );
                    }
                }
            }
        }

        self.load_locally(key).await
    }

    async fn load_locally(&self, key: &str) -> Result<ByteView> {
        let bytes = self
            .loader
            .load(key)
            .await
            .map_err(|e| CacheError::internal(format!("origin load failed: {e}")))?;

        let Some(bytes) = bytes else {
            tracing::debug!(group = %self.name, key, "origin reports absent");
            return Err(CacheError::NotFound);
        };

        let value = ByteView::from(bytes);
        self.store.add(key, value.clone(), self.ttl);
        Ok(value)
    }
}

/// Registry of groups, injected into whatever serves them.
#[derive(Default)]
pub struct GroupRegistry {
    groups: RwLock<HashMap<String, Group>>,
}

impl GroupRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create and publish a group. Re-creating a name replaces the previous
    /// instance.
    pub fn create(
        &self,
        name: impl Into<String>,
        max_bytes: i64,
        ttl: Option<Duration>,
        loader: Arc<dyn Loader>,
    ) -> Group {
        let group = Group::new(name, max_bytes, ttl, loader);
        self.groups
            .write()
            .insert(group.name().to_string(), group.clone());
        group
    }

    pub fn get(&self, name: &str) -> Option<Group> {
        self.groups.read().get(name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        self.groups.read().keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct MapLoader {
        entries: HashMap<String, String>,
        calls: AtomicUsize,
    }

    impl MapLoader {
        fn new(entries: &[(&str, &str)]) -> Arc<Self> {
            Arc::new(Self {
                entries: entries
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect(),
                calls: AtomicUsize::new(0),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Loader for MapLoader {
        async fn load(&self, key: &str) -> std::result::Result<Option<Vec<u8>>, BoxError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.entries.get(key).map(|v| v.clone().into_bytes()))
        }
    }

    fn scores_loader() -> Arc<MapLoader> {
        MapLoader::new(&[("Tom", "630"), ("Jack", "589"), ("Sam", "567")])
    }

    #[tokio::test]
    async fn test_empty_key_is_rejected() {
        let group = Group::new("scores", 0, None, scores_loader());
        assert_eq!(group.get("").await.unwrap_err(), CacheError::EmptyKey);
        assert_eq!(group.delete("").unwrap_err(), CacheError::EmptyKey);
    }

    #[tokio::test]
    async fn test_miss_loads_once_then_hits() {
        let loader = scores_loader();
        let group = Group::new("scores", 0, None, loader.clone());

        assert_eq!(group.get("Tom").await.unwrap().to_string(), "630");
        assert_eq!(group.get("Tom").await.unwrap().to_string(), "630");
        assert_eq!(loader.calls(), 1);

        let stats = group.stats();
        assert_eq!(stats.gets, 2);
        assert_eq!(stats.hits, 1);
    }

    #[tokio::test]
    async fn test_absent_origin_key_is_not_found_and_not_cached() {
        let loader = scores_loader();
        let group = Group::new("scores", 0, None, loader.clone());

        assert_eq!(group.get("Alice").await.unwrap_err(), CacheError::NotFound);
        assert_eq!(group.get("Alice").await.unwrap_err(), CacheError::NotFound);
        // Absence is not cached, so the origin was asked both times.
        assert_eq!(loader.calls(), 2);
    }

    #[tokio::test]
    async fn test_zero_byte_value_is_a_valid_hit() {
        let loader = MapLoader::new(&[("empty", "")]);
        let group = Group::new("g", 0, None, loader.clone());

        assert!(group.get("empty").await.unwrap().is_empty());
        assert!(group.get("empty").await.unwrap().is_empty());
        assert_eq!(loader.calls(), 1);
    }

    #[tokio::test]
    async fn test_origin_failure_is_internal() {
        struct FailingLoader;

        #[async_trait]
        impl Loader for FailingLoader {
            async fn load(&self, _key: &str) -> std::result::Result<Option<Vec<u8>>, BoxError> {
                Err("database is down".into())
            }
        }

        let group = Group::new("g", 0, None, Arc::new(FailingLoader));
        match group.get("Tom").await.unwrap_err() {
            CacheError::Internal(msg) => assert!(msg.contains("database is down")),
            other => panic!("expected internal error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_concurrent_cold_gets_load_once() {
        let loader = scores_loader();
        let group = Group::new("scores", 0, None, loader.clone());

        let mut handles = Vec::new();
        for _ in 0..100 {
            let group = group.clone();
            handles.push(tokio::spawn(async move { group.get("Tom").await }));
        }
        for handle in handles {
            assert_eq!(handle.await.unwrap().unwrap().to_string(), "630");
        }
        assert_eq!(loader.calls(), 1);
    }

    #[tokio::test]
    async fn test_ttl_expiry_reinvokes_origin() {
        let loader = scores_loader();
        let group = Group::new(
            "scores",
            0,
            Some(Duration::from_millis(50)),
            loader.clone(),
        );

        assert_eq!(group.get("Tom").await.unwrap().to_string(), "630");
        assert_eq!(group.get("Tom").await.unwrap().to_string(), "630");
        assert_eq!(loader.calls(), 1);

        tokio::time::sleep(Duration::from_millis(90)).await;
        assert_eq!(group.get("Tom").await.unwrap().to_string(), "630");
        assert_eq!(loader.calls(), 2);
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let group = Group::new("scores", 0, None, scores_loader());
        group.get("Tom").await.unwrap();
        assert!(group.delete("Tom").unwrap());
        assert!(!group.delete("Tom").unwrap());
    }

    struct StaticPeer {
        value: &'static str,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl PeerGetter for StaticPeer {
        async fn get(&self, _group: &str, _key: &str) -> Result<ByteView> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(ByteView::from(self.value))
        }
    }

    struct FixedPicker(Option<Arc<dyn PeerGetter>>);

    impl PeerPicker for FixedPicker {
        fn pick_peer(&self, _key: &str) -> Option<Arc<dyn PeerGetter>> {
            self.0.clone()
        }
    }

    #[tokio::test]
    async fn test_remote_hit_is_not_cached_locally() {
        let loader = scores_loader();
        let group = Group::new("scores", 0, None, loader.clone());
        let peer = Arc::new(StaticPeer {
            value: "999",
            calls: AtomicUsize::new(0),
        });
        group.register_peers(Arc::new(FixedPicker(Some(peer.clone()))));

        assert_eq!(group.get("Tom").await.unwrap().to_string(), "999");
        assert_eq!(group.get("Tom").await.unwrap().to_string(), "999");
        // Both reads went to the peer; nothing was stored locally and the
        // origin was never consulted.
        assert_eq!(peer.calls.load(Ordering::SeqCst), 2);
        assert_eq!(loader.calls(), 0);
    }

    struct FailingPeer;

    #[async_trait]
    impl PeerGetter for FailingPeer {
        async fn get(&self, _group: &str, _key: &str) -> Result<ByteView> {
            Err(CacheError::network("connection refused"))
        }
    }

    #[tokio::test]
    async fn test_peer_failure_falls_back_to_origin() {
        let loader = scores_loader();
        let group = Group::new("scores", 0, None, loader.clone());
        group.register_peers(Arc::new(FixedPicker(Some(Arc::new(FailingPeer)))));

        assert_eq!(group.get("Tom").await.unwrap().to_string(), "630");
        assert_eq!(loader.calls(), 1);
        // The fallback cached the value locally, so the next read is local.
        assert_eq!(group.get("Tom").await.unwrap().to_string(), "630");
        assert_eq!(loader.calls(), 1);
    }

    #[tokio::test]
    async fn test_registry_returns_same_instance() {
        let registry = GroupRegistry::new();
        let created = registry.create("scores", 0, None, scores_loader());
        let fetched = registry.get("scores").unwrap();
        assert!(Arc::ptr_eq(&created.inner, &fetched.inner));
        assert!(registry.get("missing").is_none());
        assert_eq!(registry.names(), vec!["scores".to_string()]);
    }
}

//! In-process coordination store.
//!
//! Implements the full [`CoordStore`] contract against process memory:
//! leases, lease-bound keys, keepalive streams that end on revocation, and
//! broadcast-backed prefix watches. Used by the membership tests; it has no
//! networked durability and never outlives the process.

use crate::store::{CoordStore, LeaseId, StoreEvent};
use crate::DiscoveryError;
use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

#[derive(Default)]
struct MemInner {
    /// key -> (value, owning lease)
    kv: HashMap<String, (String, LeaseId)>,
    /// lease -> alive
    leases: HashMap<LeaseId, bool>,
    next_lease: LeaseId,
}

/// An in-process [`CoordStore`].
pub struct MemStore {
    inner: Arc<Mutex<MemInner>>,
    events: broadcast::Sender<StoreEvent>,
}

impl Default for MemStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemStore {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            inner: Arc::new(Mutex::new(MemInner::default())),
            events,
        }
    }

    /// The lease a key is bound to, if the key exists. Test support.
    pub fn lease_of(&self, key: &str) -> Option<LeaseId> {
        self.inner
            .lock()
            .kv
            .get(key)
            .map(|(_, lease)| *lease)
    }

    fn remove_lease(&self, lease: LeaseId) -> Vec<String> {
        let mut inner = self.inner.lock();
        inner.leases.insert(lease, false);
        let doomed: Vec<String> = inner
            .kv
            .iter()
            .filter(|(_, (_, l))| *l == lease)
            .map(|(k, _)| k.clone())
            .collect();
        for key in &doomed {
            inner.kv.remove(key);
        }
        doomed
    }
}

#[async_trait]
impl CoordStore for MemStore {
    async fn grant(&self, _ttl_secs: i64) -> Result<LeaseId, DiscoveryError> {
        let mut inner = self.inner.lock();
        inner.next_lease += 1;
        let lease = inner.next_lease;
        inner.leases.insert(lease, true);
        Ok(lease)
    }

    async fn put_with_lease(
        &self,
        key: &str,
        value: &str,
        lease: LeaseId,
    ) -> Result<(), DiscoveryError> {
        {
            let mut inner = self.inner.lock();
            if !inner.leases.get(&lease).copied().unwrap_or(false) {
                return Err(DiscoveryError::store(format!("lease {lease} not alive")));
            }
            inner.kv.insert(key.to_string(), (value.to_string(), lease));
        }
        let _ = self.events.send(StoreEvent::Put(key.to_string()));
        Ok(())
    }

    async fn keep_alive(
        &self,
        lease: LeaseId,
        _ttl_secs: i64,
    ) -> Result<BoxStream<'static, Result<(), DiscoveryError>>, DiscoveryError> {
        let inner = self.inner.clone();
        let stream = futures::stream::unfold(inner, move |inner| async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            let alive = inner.lock().leases.get(&lease).copied().unwrap_or(false);
            if alive {
                Some((Ok(()), inner))
            } else {
                None
            }
        });
        Ok(stream.boxed())
    }

    async fn revoke(&self, lease: LeaseId) -> Result<(), DiscoveryError> {
        for key in self.remove_lease(lease) {
            let _ = self.events.send(StoreEvent::Delete(key));
        }
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), DiscoveryError> {
        let existed = self
            .inner
            .lock()
            .kv
            .remove(key)
            .is_some();
        if existed {
            let _ = self.events.send(StoreEvent::Delete(key.to_string()));
        }
        Ok(())
    }

    async fn get_prefix(&self, prefix: &str) -> Result<Vec<String>, DiscoveryError> {
        let inner = self.inner.lock();
        let mut entries: Vec<(&String, &String)> = inner
            .kv
            .iter()
            .filter(|(k, _)| k.starts_with(prefix))
            .map(|(k, (v, _))| (k, v))
            .collect();
        entries.sort_by(|a, b| a.0.cmp(b.0));
        Ok(entries.into_iter().map(|(_, v)| v.clone()).collect())
    }

    async fn watch_prefix(
        &self,
        prefix: &str,
    ) -> Result<BoxStream<'static, Result<StoreEvent, DiscoveryError>>, DiscoveryError> {
        let prefix = prefix.to_string();
        let rx = self.events.subscribe();
        let stream = futures::stream::unfold((rx, prefix), |(mut rx, prefix)| async move {
            loop {
                match rx.recv().await {
                    Ok(event) => {
                        let key = match &event {
                            StoreEvent::Put(k) | StoreEvent::Delete(k) => k,
                        };
                        if key.starts_with(&prefix) {
                            return Some((Ok(event), (rx, prefix)));
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        let err =
                            DiscoveryError::Watch(format!("watch lagged by {skipped} events"));
                        return Some((Err(err), (rx, prefix)));
                    }
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            }
        });
        Ok(stream.boxed())
    }
}

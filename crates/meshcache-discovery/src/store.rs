//! The coordination-store contract and its etcd implementation.

use crate::DiscoveryError;
use async_trait::async_trait;
use etcd_client::{Client, ConnectOptions, EventType, GetOptions, PutOptions, WatchOptions};
use futures::stream::BoxStream;
use futures::StreamExt;
use std::collections::VecDeque;
use std::time::Duration;

/// Lease identifier issued by the store
pub type LeaseId = i64;

/// A change observed under a watched prefix. The watcher only uses events
/// as a trigger to resnapshot, but the key is kept for logging.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StoreEvent {
    Put(String),
    Delete(String),
}

/// The contract MeshCache needs from its coordination store.
///
/// This is the full surface the membership layer is allowed to use:
/// leases, lease-bound puts, keepalives, revocation, prefix reads and
/// prefix watches.
#[async_trait]
pub trait CoordStore: Send + Sync + 'static {
    /// Grant a lease with the given TTL in seconds.
    async fn grant(&self, ttl_secs: i64) -> Result<LeaseId, DiscoveryError>;

    /// Write `key = value` bound to `lease`; the key disappears with it.
    async fn put_with_lease(
        &self,
        key: &str,
        value: &str,
        lease: LeaseId,
    ) -> Result<(), DiscoveryError>;

    /// Start heartbeating `lease`. The stream yields one item per confirmed
    /// keepalive and ends when the lease is gone or the store unreachable.
    async fn keep_alive(
        &self,
        lease: LeaseId,
        ttl_secs: i64,
    ) -> Result<BoxStream<'static, Result<(), DiscoveryError>>, DiscoveryError>;

    /// Revoke `lease`, atomically removing every key bound to it.
    async fn revoke(&self, lease: LeaseId) -> Result<(), DiscoveryError>;

    /// Unconditionally delete a key. Used for cleanup after partial failures.
    async fn delete(&self, key: &str) -> Result<(), DiscoveryError>;

    /// Values of all keys under `prefix`.
    async fn get_prefix(&self, prefix: &str) -> Result<Vec<String>, DiscoveryError>;

    /// Watch `prefix` for puts and deletes.
    async fn watch_prefix(
        &self,
        prefix: &str,
    ) -> Result<BoxStream<'static, Result<StoreEvent, DiscoveryError>>, DiscoveryError>;
}

/// etcd-backed coordination store.
#[derive(Clone)]
pub struct EtcdStore {
    client: Client,
}

impl EtcdStore {
    /// Connect to an etcd cluster with a 5 second dial timeout.
    pub async fn connect(endpoints: &[String]) -> Result<Self, DiscoveryError> {
        let options = ConnectOptions::new().with_connect_timeout(Duration::from_secs(5));
        let client = Client::connect(endpoints, Some(options))
            .await
            .map_err(|e| DiscoveryError::store(format!("etcd connect failed: {e}")))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl CoordStore for EtcdStore {
    async fn grant(&self, ttl_secs: i64) -> Result<LeaseId, DiscoveryError> {
        let mut client = self.client.clone();
        let resp = client
            .lease_grant(ttl_secs, None)
            .await
            .map_err(|e| DiscoveryError::store(format!("lease grant failed: {e}")))?;
        Ok(resp.id())
    }

    async fn put_with_lease(
        &self,
        key: &str,
        value: &str,
        lease: LeaseId,
    ) -> Result<(), DiscoveryError> {
        let mut client = self.client.clone();
        client
            .put(key, value, Some(PutOptions::new().with_lease(lease)))
            .await
            .map_err(|e| DiscoveryError::store(format!("put failed: {e}")))?;
        Ok(())
    }

    async fn keep_alive(
        &self,
        lease: LeaseId,
        ttl_secs: i64,
    ) -> Result<BoxStream<'static, Result<(), DiscoveryError>>, DiscoveryError> {
        let mut client = self.client.clone();
        let (keeper, responses) = client
            .lease_keep_alive(lease)
            .await
            .map_err(|e| DiscoveryError::store(format!("keepalive start failed: {e}")))?;

        // Renew at a third of the TTL, the cadence etcd's own client uses.
        let tick = Duration::from_secs((ttl_secs as u64 / 3).max(1));
        let stream = futures::stream::unfold(
            (keeper, responses),
            move |(mut keeper, mut responses)| async move {
                tokio::time::sleep(tick).await;
                if let Err(e) = keeper.keep_alive().await {
                    let err = DiscoveryError::store(format!("keepalive send failed: {e}"));
                    return Some((Err(err), (keeper, responses)));
                }
                match responses.message().await {
                    Ok(Some(resp)) if resp.ttl() > 0 => Some((Ok(()), (keeper, responses))),
                    // TTL of zero means the lease no longer exists.
                    Ok(Some(_)) | Ok(None) => None,
                    Err(e) => {
                        let err = DiscoveryError::store(format!("keepalive recv failed: {e}"));
                        Some((Err(err), (keeper, responses)))
                    }
                }
            },
        );
        Ok(stream.boxed())
    }

    async fn revoke(&self, lease: LeaseId) -> Result<(), DiscoveryError> {
        let mut client = self.client.clone();
        client
            .lease_revoke(lease)
            .await
            .map_err(|e| DiscoveryError::store(format!("lease revoke failed: {e}")))?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), DiscoveryError> {
        let mut client = self.client.clone();
        client
            .delete(key, None)
            .await
            .map_err(|e| DiscoveryError::store(format!("delete failed: {e}")))?;
        Ok(())
    }

    async fn get_prefix(&self, prefix: &str) -> Result<Vec<String>, DiscoveryError> {
        let mut client = self.client.clone();
        let resp = client
            .get(prefix, Some(GetOptions::new().with_prefix()))
            .await
            .map_err(|e| DiscoveryError::store(format!("get prefix failed: {e}")))?;
        let mut values = Vec::with_capacity(resp.kvs().len());
        for kv in resp.kvs() {
            let value = kv
                .value_str()
                .map_err(|e| DiscoveryError::store(format!("non-utf8 value: {e}")))?;
            values.push(value.to_string());
        }
        Ok(values)
    }

    async fn watch_prefix(
        &self,
        prefix: &str,
    ) -> Result<BoxStream<'static, Result<StoreEvent, DiscoveryError>>, DiscoveryError> {
        let mut client = self.client.clone();
        let (watcher, responses) = client
            .watch(prefix, Some(WatchOptions::new().with_prefix()))
            .await
            .map_err(|e| DiscoveryError::store(format!("watch start failed: {e}")))?;

        // The Watcher handle cancels the watch when dropped, so it rides
        // along in the stream state.
        let state = (watcher, responses, VecDeque::new());
        let stream = futures::stream::unfold(
            state,
            |(watcher, mut responses, mut pending): (
                etcd_client::Watcher,
                etcd_client::WatchStream,
                VecDeque<StoreEvent>,
            )| async move {
                loop {
                    if let Some(event) = pending.pop_front() {
                        return Some((Ok(event), (watcher, responses, pending)));
                    }
                    match responses.message().await {
                        Ok(Some(resp)) => {
                            for event in resp.events() {
                                let key = event
                                    .kv()
                                    .and_then(|kv| kv.key_str().ok())
                                    .unwrap_or_default()
                                    .to_string();
                                pending.push_back(match event.event_type() {
                                    EventType::Put => StoreEvent::Put(key),
                                    EventType::Delete => StoreEvent::Delete(key),
                                });
                            }
                        }
                        Ok(None) => return None,
                        Err(e) => {
                            let err = DiscoveryError::Watch(e.to_string());
                            return Some((Err(err), (watcher, responses, pending)));
                        }
                    }
                }
            },
        );
        Ok(stream.boxed())
    }
}

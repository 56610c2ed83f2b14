//! Lease-based registration of an owner node in the coordination store.

use crate::store::{CoordStore, LeaseId};
use crate::{registration_key, DiscoveryError};
use futures::StreamExt;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

#[derive(Default)]
struct RegState {
    registered: bool,
    lease: Option<LeaseId>,
    keepalive: Option<JoinHandle<()>>,
}

/// Registers this node under `/{service}/{addr}` with a leased key and
/// heartbeats the lease in a background task.
///
/// The registrar never re-registers on its own: when the keepalive stream
/// ends, the instance is marked unregistered and the caller decides whether
/// to call [`Registrar::register`] again.
pub struct Registrar<S: CoordStore> {
    store: Arc<S>,
    key: String,
    addr: String,
    lease_ttl: i64,
    state: Arc<Mutex<RegState>>,
}

impl<S: CoordStore> Registrar<S> {
    pub fn new(store: Arc<S>, service_name: &str, addr: &str, lease_ttl: i64) -> Self {
        Self {
            store,
            key: registration_key(service_name, addr),
            addr: addr.to_string(),
            lease_ttl,
            state: Arc::new(Mutex::new(RegState::default())),
        }
    }

    /// The key this node registers under.
    pub fn key(&self) -> &str {
        &self.key
    }

    pub async fn is_registered(&self) -> bool {
        self.state.lock().await.registered
    }

    /// Grant a lease, publish the registration record, start the keepalive.
    ///
    /// Fails if already registered. If the record was written but the
    /// keepalive could not be started, the lease is revoked and the key
    /// deleted so no half-registered record survives.
    pub async fn register(&self) -> Result<(), DiscoveryError> {
        let mut state = self.state.lock().await;
        if state.registered {
            return Err(DiscoveryError::AlreadyRegistered(self.key.clone()));
        }

        let lease = self.store.grant(self.lease_ttl).await?;
        debug!(lease, ttl = self.lease_ttl, "granted registration lease");

        if let Err(err) = self.store.put_with_lease(&self.key, &self.addr, lease).await {
            self.cleanup(lease).await;
            return Err(err);
        }

        let mut keepalive = match self.store.keep_alive(lease, self.lease_ttl).await {
            Ok(stream) => stream,
            Err(err) => {
                self.cleanup(lease).await;
                return Err(err);
            }
        };

        let reg_state = self.state.clone();
        let key = self.key.clone();
        let handle = tokio::spawn(async move {
            while let Some(item) = keepalive.next().await {
                match item {
                    Ok(()) => debug!(%key, "keepalive confirmed"),
                    Err(err) => {
                        warn!(%key, %err, "keepalive failed");
                        break;
                    }
                }
            }
            // Lease lost or store unreachable. Surface it and let the
            // caller decide about re-registration.
            let mut state = reg_state.lock().await;
            state.registered = false;
            state.lease = None;
            info!(%key, "keepalive ended, instance is unregistered");
        });

        state.registered = true;
        state.lease = Some(lease);
        state.keepalive = Some(handle);
        info!(key = %self.key, addr = %self.addr, lease, "registered in coordination store");
        Ok(())
    }

    /// Stop the keepalive and revoke the lease, which removes the record.
    /// Unregistering an instance that is not registered is a no-op.
    pub async fn unregister(&self) -> Result<(), DiscoveryError> {
        let mut state = self.state.lock().await;
        if !state.registered {
            debug!(key = %self.key, "unregister on inactive registration");
            return Ok(());
        }

        if let Some(handle) = state.keepalive.take() {
            handle.abort();
        }

        let lease = state.lease.take();
        state.registered = false;
        drop(state);

        if let Some(lease) = lease {
            self.store.revoke(lease).await?;
        }
        info!(key = %self.key, "unregistered from coordination store");
        Ok(())
    }

    /// Best-effort removal of a partially written registration.
    async fn cleanup(&self, lease: LeaseId) {
        if let Err(err) = self.store.revoke(lease).await {
            warn!(lease, %err, "failed to revoke lease during cleanup");
        }
        if let Err(err) = self.store.delete(&self.key).await {
            warn!(key = %self.key, %err, "failed to delete key during cleanup");
        }
    }
}

//! gRPC client for one owner node.

use async_trait::async_trait;
use meshcache_common::{ByteView, CacheError, Result};
use meshcache_core::PeerGetter;
use meshcache_proto::peer::group_cache_client::GroupCacheClient;
use meshcache_proto::peer::{DeleteRequest, Request};
use std::time::Duration;
use tokio::sync::Mutex;
use tonic::transport::{Channel, Endpoint};
use tracing::{debug, warn};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(2);

/// Default per-call timeout for peer RPCs.
pub const DEFAULT_RPC_TIMEOUT: Duration = Duration::from_secs(3);

/// Client for a single owner node's `GroupCache` service.
///
/// Connects lazily on first use. A call that fails with a network error
/// drops the channel, reconnects and retries once before reporting the
/// failure.
pub struct PeerClient {
    addr: String,
    endpoint: String,
    timeout: Duration,
    client: Mutex<Option<GroupCacheClient<Channel>>>,
}

impl PeerClient {
    pub fn new(addr: &str) -> Self {
        Self::with_timeout(addr, DEFAULT_RPC_TIMEOUT)
    }

    pub fn with_timeout(addr: &str, timeout: Duration) -> Self {
        let endpoint = if addr.starts_with("http://") || addr.starts_with("https://") {
            addr.to_string()
        } else {
            format!("http://{addr}")
        };
        Self {
            addr: addr.to_string(),
            endpoint,
            timeout,
            client: Mutex::new(None),
        }
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// Fetch a value from this owner.
    pub async fn get(&self, group: &str, key: &str) -> Result<ByteView> {
        let request = Request {
            group: group.to_string(),
            key: key.to_string(),
        };

        match self.get_once(request.clone()).await {
            Err(err) if err.is_network() => {
                warn!(addr = %self.addr, %err, "peer get failed, reconnecting once");
                self.reset().await;
                self.get_once(request).await
            }
            other => other,
        }
    }

    /// Delete a key on this owner. Returns the owner's success flag.
    pub async fn delete(&self, group: &str, key: &str) -> Result<bool> {
        let request = DeleteRequest {
            group: group.to_string(),
            key: key.to_string(),
        };

        match self.delete_once(request.clone()).await {
            Err(err) if err.is_network() => {
                warn!(addr = %self.addr, %err, "peer delete failed, reconnecting once");
                self.reset().await;
                self.delete_once(request).await
            }
            other => other,
        }
    }

    async fn get_once(&self, request: Request) -> Result<ByteView> {
        let mut client = self.connected().await?;
        let call = client.get(tonic::Request::new(request));
        match tokio::time::timeout(self.timeout, call).await {
            Ok(Ok(response)) => Ok(ByteView::from(response.into_inner().value)),
            Ok(Err(status)) => Err(CacheError::from_status(&status)),
            Err(_) => Err(CacheError::network(format!(
                "get to {} timed out after {:?}",
                self.addr, self.timeout
            ))),
        }
    }

    async fn delete_once(&self, request: DeleteRequest) -> Result<bool> {
        let mut client = self.connected().await?;
        let call = client.delete(tonic::Request::new(request));
        match tokio::time::timeout(self.timeout, call).await {
            Ok(Ok(response)) => Ok(response.into_inner().success),
            Ok(Err(status)) => Err(CacheError::from_status(&status)),
            Err(_) => Err(CacheError::network(format!(
                "delete to {} timed out after {:?}",
                self.addr, self.timeout
            ))),
        }
    }

    async fn connected(&self) -> Result<GroupCacheClient<Channel>> {
        let mut guard = self.client.lock().await;
        if let Some(client) = guard.as_ref() {
            return Ok(client.clone());
        }

        let channel = Endpoint::from_shared(self.endpoint.clone())
            .map_err(|e| CacheError::network(format!("bad peer endpoint {}: {e}", self.endpoint)))?
            .connect_timeout(CONNECT_TIMEOUT)
            .connect()
            .await
            .map_err(|e| CacheError::network(format!("connect to {} failed: {e}", self.addr)))?;

        debug!(addr = %self.addr, "connected to peer");
        let client = GroupCacheClient::new(channel);
        *guard = Some(client.clone());
        Ok(client)
    }

    async fn reset(&self) {
        *self.client.lock().await = None;
    }
}

#[async_trait]
impl PeerGetter for PeerClient {
    async fn get(&self, group: &str, key: &str) -> Result<ByteView> {
        PeerClient::get(self, group, key).await
    }
}

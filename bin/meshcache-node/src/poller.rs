//! Periodic peer-list refresh from the gateway.
//!
//! Nodes mostly learn the cluster through targeted RPCs, so they poll the
//! gateway's `/peers` endpoint on a fixed tick to keep their own ring
//! aligned with the membership the gateway sees.

use meshcache_client::PeerPool;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

#[derive(Deserialize)]
struct PeersResponse {
    peers: Vec<String>,
}

/// Poll `http://{api_addr}/peers` every `interval` and apply the list to
/// the pool. Fetch failures are logged and the loop keeps going.
pub async fn poll_peers(pool: Arc<PeerPool>, api_addr: String, interval: Duration) {
    let client = reqwest::Client::new();
    let url = format!("http://{api_addr}/peers");
    let mut ticker = tokio::time::interval(interval);

    loop {
        ticker.tick().await;
        match fetch_peers(&client, &url).await {
            Ok(peers) => {
                debug!(count = peers.len(), "refreshed peer list from gateway");
                pool.set(&peers);
            }
            Err(err) => {
                warn!(%url, %err, "failed to fetch peer list");
            }
        }
    }
}

async fn fetch_peers(client: &reqwest::Client, url: &str) -> anyhow::Result<Vec<String>> {
    let response = client
        .get(url)
        .timeout(Duration::from_secs(3))
        .send()
        .await?
        .error_for_status()?;
    Ok(response.json::<PeersResponse>().await?.peers)
}

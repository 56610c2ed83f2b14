//! Prefix watcher emitting complete membership snapshots.
//!
//! On every observed change the watcher re-reads the whole prefix and emits
//! the full node list. Emitting snapshots instead of deltas means a lost or
//! duplicated watch event can never leave a consumer's view out of sync;
//! applying a snapshot is idempotent.

use crate::store::CoordStore;
use crate::{service_prefix, DiscoveryError};
use futures::StreamExt;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Running watch: snapshot and error channels plus the background task.
pub struct WatchHandle {
    /// Complete node lists, one per observed membership change.
    pub snapshots: mpsc::Receiver<Vec<String>>,
    /// Watch-stream errors. The watch keeps running after reporting one.
    pub errors: mpsc::Receiver<DiscoveryError>,
    task: JoinHandle<()>,
}

impl WatchHandle {
    /// Stop watching.
    pub fn abort(&self) {
        self.task.abort();
    }
}

impl Drop for WatchHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Watches a service prefix in the coordination store.
pub struct Watcher<S: CoordStore> {
    store: Arc<S>,
    prefix: String,
}

impl<S: CoordStore> Watcher<S> {
    pub fn new(store: Arc<S>, service_name: &str) -> Self {
        Self {
            store,
            prefix: service_prefix(service_name),
        }
    }

    /// Take the initial snapshot and start watching.
    ///
    /// The first snapshot is delivered before any events are processed; a
    /// failure to take it fails the whole call rather than starting a watch
    /// with no baseline.
    pub async fn watch(&self) -> Result<WatchHandle, DiscoveryError> {
        let (snapshot_tx, snapshot_rx) = mpsc::channel(16);
        let (error_tx, error_rx) = mpsc::channel(4);

        let initial = self.store.get_prefix(&self.prefix).await?;
        info!(prefix = %self.prefix, nodes = initial.len(), "initial membership snapshot");
        snapshot_tx
            .send(initial)
            .await
            .map_err(|_| DiscoveryError::Watch("snapshot receiver closed".into()))?;

        let mut events = self.store.watch_prefix(&self.prefix).await?;
        let store = self.store.clone();
        let prefix = self.prefix.clone();

        let task = tokio::spawn(async move {
            while let Some(item) = events.next().await {
                match item {
                    Ok(event) => {
                        debug!(?event, "membership change observed");
                        // Resnapshot instead of applying the delta; see the
                        // module docs.
                        match store.get_prefix(&prefix).await {
                            Ok(nodes) => {
                                if snapshot_tx.send(nodes).await.is_err() {
                                    return;
                                }
                            }
                            Err(err) => {
                                warn!(%err, "failed to resnapshot after change");
                                if error_tx.send(err).await.is_err() {
                                    return;
                                }
                            }
                        }
                    }
                    Err(err) => {
                        warn!(%err, "watch stream error");
                        if error_tx.send(err).await.is_err() {
                            return;
                        }
                    }
                }
            }
            info!(prefix = %prefix, "watch stream closed");
        });

        Ok(WatchHandle {
            snapshots: snapshot_rx,
            errors: error_rx,
            task,
        })
    }
}

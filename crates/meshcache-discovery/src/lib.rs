//! MeshCache Discovery - cluster membership over a coordination store
//!
//! Owner nodes register themselves under `/{service}/{addr}` with a leased
//! key and heartbeat the lease; the gateway snapshots the prefix and watches
//! it for changes. The store itself is abstracted behind [`CoordStore`]:
//! production uses etcd, tests use the in-process [`MemStore`].

pub mod mem;
pub mod registrar;
pub mod store;
pub mod watcher;

use thiserror::Error;

pub use mem::MemStore;
pub use registrar::Registrar;
pub use store::{CoordStore, EtcdStore, LeaseId, StoreEvent};
pub use watcher::{WatchHandle, Watcher};

/// Errors raised by the membership layer
#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("coordination store error: {0}")]
    Store(String),

    #[error("service already registered under {0}")]
    AlreadyRegistered(String),

    #[error("watch stream error: {0}")]
    Watch(String),
}

impl DiscoveryError {
    pub fn store(msg: impl Into<String>) -> Self {
        Self::Store(msg.into())
    }
}

/// Registration key for a node: `/{service}/{addr}`
#[must_use]
pub fn registration_key(service: &str, addr: &str) -> String {
    format!("/{service}/{addr}")
}

/// Prefix under which all of a service's nodes register: `/{service}/`
#[must_use]
pub fn service_prefix(service: &str) -> String {
    format!("/{service}/")
}

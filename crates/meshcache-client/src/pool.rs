//! Ring-based routing over a set of peer clients.

use crate::peer_client::PeerClient;
use meshcache_core::{PeerGetter, PeerPicker};
use meshcache_ring::HashRing;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

struct PoolState {
    ring: HashRing,
    clients: HashMap<String, Arc<PeerClient>>,
}

/// The routing state shared by the gateway and the node-side picker: a
/// consistent-hash ring plus one lazily connected client per node.
///
/// [`PeerPool::set`] swaps the whole state under one write lock, so request
/// handlers always observe a ring and a client map that belong together.
pub struct PeerPool {
    replicas: usize,
    timeout: Duration,
    state: RwLock<PoolState>,
}

impl PeerPool {
    pub fn new(replicas: usize, timeout: Duration) -> Self {
        Self {
            replicas,
            timeout,
            state: RwLock::new(PoolState {
                ring: HashRing::new(replicas, None),
                clients: HashMap::new(),
            }),
        }
    }

    /// Replace the node set. Clients for surviving nodes are reused;
    /// clients for removed nodes are dropped, closing their connections.
    pub fn set(&self, nodes: &[String]) {
        let ring = HashRing::new(self.replicas, None);
        ring.add(nodes);

        let mut state = self.state.write();
        let mut clients = HashMap::with_capacity(nodes.len());
        for node in nodes {
            match state.clients.remove(node) {
                Some(existing) => {
                    clients.insert(node.clone(), existing);
                }
                None => {
                    info!(node = %node, "creating peer client");
                    clients.insert(
                        node.clone(),
                        Arc::new(PeerClient::with_timeout(node, self.timeout)),
                    );
                }
            }
        }
        for removed in state.clients.keys() {
            info!(node = %removed, "dropping peer client");
        }
        state.ring = ring;
        state.clients = clients;
        debug!(nodes = nodes.len(), "peer pool updated");
    }

    /// The owner of `key` and its client, or `None` on an empty pool.
    pub fn pick_owner(&self, key: &str) -> Option<(String, Arc<PeerClient>)> {
        let state = self.state.read();
        let owner = state.ring.get(key)?;
        let client = state.clients.get(&owner)?.clone();
        Some((owner, client))
    }

    /// Like [`PeerPool::pick_owner`], but yields `None` when this node owns
    /// the key itself.
    pub fn pick_other(&self, key: &str, self_addr: &str) -> Option<(String, Arc<PeerClient>)> {
        let (owner, client) = self.pick_owner(key)?;
        if owner == self_addr {
            return None;
        }
        Some((owner, client))
    }

    /// Current node set, as last applied by [`PeerPool::set`].
    pub fn nodes(&self) -> Vec<String> {
        self.state.read().ring.nodes()
    }

    pub fn len(&self) -> usize {
        self.state.read().ring.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Adapter that lets a `Group` route loads through a [`PeerPool`] without
/// ever forwarding to the node it runs on.
pub struct PoolPicker {
    pool: Arc<PeerPool>,
    self_addr: String,
}

impl PoolPicker {
    pub fn new(pool: Arc<PeerPool>, self_addr: &str) -> Self {
        Self {
            pool,
            self_addr: self_addr.to_string(),
        }
    }
}

impl PeerPicker for PoolPicker {
    fn pick_peer(&self, key: &str) -> Option<Arc<dyn PeerGetter>> {
        self.pool
            .pick_other(key, &self.self_addr)
            .map(|(owner, client)| {
                debug!(key, %owner, "routing load to owner");
                client as Arc<dyn PeerGetter>
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool_with(nodes: &[&str]) -> PeerPool {
        let pool = PeerPool::new(50, Duration::from_secs(3));
        pool.set(&nodes.iter().map(|s| s.to_string()).collect::<Vec<_>>());
        pool
    }

    #[test]
    fn test_empty_pool_has_no_owner() {
        let pool = PeerPool::new(50, Duration::from_secs(3));
        assert!(pool.pick_owner("Tom").is_none());
        assert!(pool.is_empty());
    }

    #[test]
    fn test_routing_is_stable() {
        let pool = pool_with(&["a:9090", "b:9090"]);
        let (first, _) = pool.pick_owner("Tom").unwrap();
        for _ in 0..10 {
            assert_eq!(pool.pick_owner("Tom").unwrap().0, first);
        }
    }

    #[test]
    fn test_set_reuses_surviving_clients() {
        let pool = pool_with(&["a:9090", "b:9090"]);
        let before = pool.pick_owner("Tom").unwrap().1;
        let owner = before.addr().to_string();

        pool.set(&[owner.clone(), "c:9090".to_string()]);
        let after = pool
            .pick_owner("Tom")
            .and_then(|(o, c)| if o == owner { Some(c) } else { None });
        if let Some(after) = after {
            assert!(Arc::ptr_eq(&before, &after));
        }

        // The client map tracks the ring exactly.
        assert_eq!(pool.len(), 2);
        let mut nodes = pool.nodes();
        nodes.sort();
        assert_eq!(nodes, vec!["c:9090".to_string(), owner]);
    }

    #[test]
    fn test_pick_other_skips_self() {
        let pool = pool_with(&["a:9090", "b:9090"]);
        for i in 0..100 {
            let key = format!("key-{i}");
            let (owner, _) = pool.pick_owner(&key).unwrap();
            assert!(pool.pick_other(&key, &owner).is_none());
            let other = if owner == "a:9090" { "b:9090" } else { "a:9090" };
            assert_eq!(pool.pick_other(&key, other).unwrap().0, owner);
        }
    }

    #[test]
    fn test_single_node_pool_routes_everything_to_it() {
        let pool = pool_with(&["a:9090"]);
        for i in 0..20 {
            assert_eq!(pool.pick_owner(&format!("k{i}")).unwrap().0, "a:9090");
        }
    }
}

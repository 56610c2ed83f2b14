//! Consistent hashing for MeshCache routing.
//!
//! Every node is projected onto the ring as `replicas` virtual points,
//! hashed from the replica index concatenated with the node id. A key is
//! owned by the node whose first virtual point is clockwise of the key's
//! hash. More virtual replicas smooth the key distribution; they also keep
//! most keys on their old owners when the node set changes.

use parking_lot::RwLock;
use std::collections::HashMap;

/// Hash function mapping bytes to a ring position.
pub type HashFn = fn(&[u8]) -> u32;

fn crc32c_hash(data: &[u8]) -> u32 {
    crc32c::crc32c(data)
}

struct RingState {
    /// Sorted virtual point hashes
    keys: Vec<u32>,
    /// Virtual point hash -> node id
    owners: HashMap<u32, String>,
    /// Distinct node ids, insertion order
    nodes: Vec<String>,
}

/// A concurrency-safe consistent-hash ring.
pub struct HashRing {
    replicas: usize,
    hash: HashFn,
    state: RwLock<RingState>,
}

impl HashRing {
    /// Create a ring with `replicas` virtual points per node. `hash`
    /// defaults to CRC32C; tests supply simpler functions to pin placement.
    pub fn new(replicas: usize, hash: Option<HashFn>) -> Self {
        Self {
            replicas: replicas.max(1),
            hash: hash.unwrap_or(crc32c_hash),
            state: RwLock::new(RingState {
                keys: Vec::new(),
                owners: HashMap::new(),
                nodes: Vec::new(),
            }),
        }
    }

    /// Add nodes to the ring.
    pub fn add<S: AsRef<str>>(&self, nodes: &[S]) {
        let mut state = self.state.write();
        for node in nodes {
            let node = node.as_ref();
            if state.nodes.iter().any(|n| n == node) {
                continue;
            }
            state.nodes.push(node.to_string());
            for i in 0..self.replicas {
                let point = (self.hash)(format!("{i}{node}").as_bytes());
                state.keys.push(point);
                state.owners.insert(point, node.to_string());
            }
        }
        state.keys.sort_unstable();
    }

    /// Return the node owning `key`, or `None` when the ring is empty.
    pub fn get(&self, key: &str) -> Option<String> {
        let state = self.state.read();
        if state.keys.is_empty() {
            return None;
        }

        let h = (self.hash)(key.as_bytes());
        // First virtual point at or after the key's hash, wrapping to 0.
        let idx = match state.keys.binary_search(&h) {
            Ok(i) => i,
            Err(i) if i == state.keys.len() => 0,
            Err(i) => i,
        };
        state.owners.get(&state.keys[idx]).cloned()
    }

    /// Remove a node and all of its virtual points.
    pub fn remove(&self, node: &str) {
        let mut state = self.state.write();
        state.nodes.retain(|n| n != node);
        let mut owners = HashMap::with_capacity(state.owners.len());
        let mut keys = Vec::with_capacity(state.keys.len());
        for (point, owner) in state.owners.drain() {
            if owner != node {
                keys.push(point);
                owners.insert(point, owner);
            }
        }
        keys.sort_unstable();
        state.keys = keys;
        state.owners = owners;
    }

    /// Distinct nodes currently on the ring.
    pub fn nodes(&self) -> Vec<String> {
        self.state.read().nodes.clone()
    }

    pub fn len(&self) -> usize {
        self.state.read().nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

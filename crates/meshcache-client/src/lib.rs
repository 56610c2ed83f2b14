//! MeshCache Client - peer RPC access and key routing
//!
//! [`PeerClient`] talks gRPC to one owner node; [`PeerPool`] owns the
//! consistent-hash ring plus one client per node and routes keys to owners.
//! The pool is rebuilt wholesale from membership snapshots, reusing live
//! clients, so routing state is always internally consistent.

pub mod peer_client;
pub mod pool;

pub use peer_client::{PeerClient, DEFAULT_RPC_TIMEOUT};
pub use pool::{PeerPool, PoolPicker};

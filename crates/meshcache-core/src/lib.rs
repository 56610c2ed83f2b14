//! MeshCache Core - the cache engine
//!
//! This crate contains the in-process pieces of MeshCache: the byte-bounded
//! LRU store, the single-flight loader that collapses concurrent loads of
//! one key into one origin call, and the `Group` namespace tying both to an
//! origin loader and an optional peer router.

pub mod group;
pub mod lru;
pub mod singleflight;

pub use group::{BoxError, Group, GroupRegistry, Loader, PeerGetter, PeerPicker};
pub use lru::{CacheStats, EvictFn, LruStore};
pub use singleflight::SingleFlight;

//! MeshCache Common - Shared types and utilities
//!
//! This crate provides the error taxonomy, the immutable byte view handed
//! out by the cache, and configuration structures shared by the MeshCache
//! binaries.

pub mod byteview;
pub mod config;
pub mod error;

pub use byteview::ByteView;
pub use config::{GatewayConfig, NodeConfig};
pub use error::{CacheError, Result};

//! MeshCache Protocol - gRPC service definitions
//!
//! This crate contains the protobuf-generated code for the peer cache
//! service owners expose to the gateway and to each other.

/// Peer cache service (Get/Delete by group and key)
pub mod peer {
    tonic::include_proto!("meshcache.peer");
}

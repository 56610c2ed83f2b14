//! Configuration types for MeshCache
//!
//! Both binaries load an optional TOML file into these structures and merge
//! CLI flags over it, CLI taking precedence.

use serde::{Deserialize, Serialize};

/// Peer transport protocol. Only gRPC is supported; the enum exists so the
/// flag surface stays explicit about what it accepts.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PeerProtocol {
    Grpc,
}

/// Configuration for an owner node
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NodeConfig {
    /// etcd endpoints used for registration
    #[serde(default = "default_etcd_endpoints")]
    pub etcd_endpoints: Vec<String>,
    /// Service name; registration keys live under `/{service_name}/`
    #[serde(default = "default_service_name")]
    pub service_name: String,
    /// Host to advertise; empty means auto-detect a non-loopback address
    #[serde(default)]
    pub node_host: String,
    /// gRPC listen port
    #[serde(default = "default_node_port")]
    pub node_port: u16,
    /// Gateway address polled for the peer list
    #[serde(default = "default_api_addr")]
    pub api_addr: String,
    /// Cache size budget in bytes (0 = unbounded)
    #[serde(default = "default_cache_size")]
    pub cache_size: i64,
    /// Name of the cache group served by this node
    #[serde(default = "default_group_name")]
    pub group_name: String,
    /// etcd lease TTL in seconds
    #[serde(default = "default_lease_ttl")]
    pub lease_ttl: i64,
    /// Entry TTL in seconds (0 = never expires)
    #[serde(default)]
    pub ttl: u64,
    /// Virtual replicas per node on the hash ring
    #[serde(default = "default_replicas")]
    pub replicas: usize,
    /// Log level when RUST_LOG is not set
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            etcd_endpoints: default_etcd_endpoints(),
            service_name: default_service_name(),
            node_host: String::new(),
            node_port: default_node_port(),
            api_addr: default_api_addr(),
            cache_size: default_cache_size(),
            group_name: default_group_name(),
            lease_ttl: default_lease_ttl(),
            ttl: 0,
            replicas: default_replicas(),
            log_level: default_log_level(),
        }
    }
}

/// Configuration for the front-door gateway
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// etcd endpoints watched for membership
    #[serde(default = "default_etcd_endpoints")]
    pub etcd_endpoints: Vec<String>,
    /// Service name; the watched prefix is `/{service_name}/`
    #[serde(default = "default_service_name")]
    pub service_name: String,
    /// HTTP API listen port
    #[serde(default = "default_api_port")]
    pub api_port: u16,
    /// Virtual replicas per node on the hash ring
    #[serde(default = "default_replicas")]
    pub replicas: usize,
    /// Peer transport protocol
    #[serde(default = "default_protocol")]
    pub protocol: PeerProtocol,
    /// Log level when RUST_LOG is not set
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            etcd_endpoints: default_etcd_endpoints(),
            service_name: default_service_name(),
            api_port: default_api_port(),
            replicas: default_replicas(),
            protocol: default_protocol(),
            log_level: default_log_level(),
        }
    }
}

fn default_etcd_endpoints() -> Vec<String> {
    vec!["localhost:2379".to_string()]
}

fn default_service_name() -> String {
    "meshcache-nodes".to_string()
}

fn default_node_port() -> u16 {
    9090
}

fn default_api_addr() -> String {
    "localhost:8080".to_string()
}

fn default_cache_size() -> i64 {
    64 * 1024 * 1024
}

fn default_group_name() -> String {
    "scores".to_string()
}

fn default_lease_ttl() -> i64 {
    10
}

fn default_replicas() -> usize {
    50
}

fn default_api_port() -> u16 {
    8080
}

fn default_protocol() -> PeerProtocol {
    PeerProtocol::Grpc
}

fn default_log_level() -> String {
    "info".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_defaults() {
        let config = NodeConfig::default();
        assert_eq!(config.node_port, 9090);
        assert_eq!(config.group_name, "scores");
        assert_eq!(config.lease_ttl, 10);
        assert_eq!(config.ttl, 0);
    }

    #[test]
    fn test_gateway_from_toml() {
        let config: GatewayConfig = toml::from_str(
            r#"
            etcd_endpoints = ["etcd-a:2379", "etcd-b:2379"]
            api_port = 9999
            protocol = "grpc"
            "#,
        )
        .unwrap();
        assert_eq!(config.etcd_endpoints.len(), 2);
        assert_eq!(config.api_port, 9999);
        assert_eq!(config.replicas, 50);
        assert_eq!(config.protocol, PeerProtocol::Grpc);
    }
}

//! MeshCache Node - cache owner daemon
//!
//! Serves the peer cache gRPC API for its groups, registers itself in the
//! coordination store under a leased key, and polls the gateway to keep its
//! own view of the cluster current.

mod poller;
mod service;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use clap::Parser;
use meshcache_client::{PeerPool, PoolPicker, DEFAULT_RPC_TIMEOUT};
use meshcache_common::NodeConfig;
use meshcache_core::{BoxError, GroupRegistry, Loader};
use meshcache_discovery::{EtcdStore, Registrar};
use meshcache_proto::peer::group_cache_server::GroupCacheServer;
use service::CacheService;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tonic::transport::Server;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const PEER_POLL_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Parser, Debug)]
#[command(name = "meshcache-node")]
#[command(about = "MeshCache cache owner daemon")]
#[command(version)]
struct Args {
    /// Configuration file path
    #[arg(short, long, default_value = "/etc/meshcache/node.toml")]
    config: String,

    /// etcd endpoints, comma separated
    #[arg(long)]
    etcd_endpoints: Option<String>,

    /// Service name to register under
    #[arg(long)]
    service_name: Option<String>,

    /// Host to advertise; auto-detected when omitted
    #[arg(long)]
    node_host: Option<String>,

    /// gRPC listen port
    #[arg(long)]
    node_port: Option<u16>,

    /// Gateway address polled for the peer list
    #[arg(long)]
    api_addr: Option<String>,

    /// Cache size budget in bytes (0 = unbounded)
    #[arg(long)]
    cache_size: Option<i64>,

    /// Cache group name served by this node
    #[arg(long)]
    group_name: Option<String>,

    /// etcd lease TTL in seconds
    #[arg(long)]
    lease_ttl: Option<i64>,

    /// Entry TTL in seconds (0 = never expires)
    #[arg(long)]
    ttl: Option<u64>,

    /// Virtual replicas per node on the hash ring
    #[arg(long)]
    replicas: Option<usize>,

    /// Log level
    #[arg(long)]
    log_level: Option<String>,
}

impl Args {
    /// Merge CLI flags over the config file; flags win.
    fn merge(self, mut config: NodeConfig) -> NodeConfig {
        if let Some(endpoints) = self.etcd_endpoints {
            config.etcd_endpoints = endpoints
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
        }
        if let Some(v) = self.service_name {
            config.service_name = v;
        }
        if let Some(v) = self.node_host {
            config.node_host = v;
        }
        if let Some(v) = self.node_port {
            config.node_port = v;
        }
        if let Some(v) = self.api_addr {
            config.api_addr = v;
        }
        if let Some(v) = self.cache_size {
            config.cache_size = v;
        }
        if let Some(v) = self.group_name {
            config.group_name = v;
        }
        if let Some(v) = self.lease_ttl {
            config.lease_ttl = v;
        }
        if let Some(v) = self.ttl {
            config.ttl = v;
        }
        if let Some(v) = self.replicas {
            config.replicas = v;
        }
        if let Some(v) = self.log_level {
            config.log_level = v;
        }
        config
    }
}

/// Demo origin: an embedded score table. Real deployments supply their own
/// [`Loader`].
struct DemoOrigin {
    entries: HashMap<String, String>,
}

impl DemoOrigin {
    fn new() -> Self {
        Self {
            entries: [("Tom", "630"), ("Jack", "589"), ("Sam", "567")]
                .into_iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        }
    }
}

#[async_trait]
impl Loader for DemoOrigin {
    async fn load(&self, key: &str) -> std::result::Result<Option<Vec<u8>>, BoxError> {
        tracing::debug!(key, "demo origin lookup");
        Ok(self.entries.get(key).map(|v| v.clone().into_bytes()))
    }
}

/// Pick a non-loopback address to advertise when none is configured.
fn detect_local_host() -> String {
    // Routing-table probe; no packet is sent.
    let detected = std::net::UdpSocket::bind("0.0.0.0:0")
        .and_then(|socket| {
            socket.connect("8.8.8.8:80")?;
            socket.local_addr()
        })
        .map(|addr| addr.ip().to_string());
    match detected {
        Ok(host) => host,
        Err(err) => {
            warn!(%err, "could not detect a local address, advertising 127.0.0.1");
            "127.0.0.1".to_string()
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Load config file if it exists
    let file_config: NodeConfig = if std::path::Path::new(&args.config).exists() {
        let raw = std::fs::read_to_string(&args.config)
            .with_context(|| format!("failed to read config file {}", args.config))?;
        toml::from_str(&raw)
            .with_context(|| format!("failed to parse config file {}", args.config))?
    } else {
        NodeConfig::default()
    };
    let config = args.merge(file_config);

    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.log_level.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    if config.etcd_endpoints.is_empty() {
        bail!("etcd-endpoints must not be empty");
    }

    let host = if config.node_host.is_empty() {
        detect_local_host()
    } else {
        config.node_host.clone()
    };
    let grpc_addr = format!("{host}:{}", config.node_port);
    let listen_addr: SocketAddr = format!("0.0.0.0:{}", config.node_port)
        .parse()
        .context("invalid gRPC listen address")?;

    info!("Starting MeshCache node");
    info!("etcd endpoints: {:?}", config.etcd_endpoints);
    info!("service name: {}", config.service_name);
    info!("advertised gRPC address: {}", grpc_addr);
    info!("gateway address: {}", config.api_addr);
    info!(
        "group {:?}, cache size {} bytes, entry ttl {}s, lease ttl {}s",
        config.group_name, config.cache_size, config.ttl, config.lease_ttl
    );

    // Cache group over the demo origin
    let registry = Arc::new(GroupRegistry::new());
    let entry_ttl = (config.ttl > 0).then(|| Duration::from_secs(config.ttl));
    let group = registry.create(
        config.group_name.clone(),
        config.cache_size,
        entry_ttl,
        Arc::new(DemoOrigin::new()),
    );

    // Ring of peers, refreshed by the poller; loads for keys owned by other
    // nodes are forwarded through it.
    let pool = Arc::new(PeerPool::new(config.replicas, DEFAULT_RPC_TIMEOUT));
    group.register_peers(Arc::new(PoolPicker::new(pool.clone(), &grpc_addr)));

    // Register in the coordination store and start heartbeating
    let store = Arc::new(
        EtcdStore::connect(&config.etcd_endpoints)
            .await
            .context("failed to connect to etcd")?,
    );
    let registrar = Registrar::new(
        store,
        &config.service_name,
        &grpc_addr,
        config.lease_ttl,
    );
    registrar
        .register()
        .await
        .context("failed to register in coordination store")?;

    let poller_handle = tokio::spawn(poller::poll_peers(
        pool,
        config.api_addr.clone(),
        PEER_POLL_INTERVAL,
    ));

    info!("Starting gRPC server on {}", listen_addr);
    let cache_service = GroupCacheServer::new(CacheService::new(registry));
    let server = Server::builder()
        .add_service(cache_service)
        .serve_with_shutdown(listen_addr, async {
            tokio::signal::ctrl_c().await.ok();
            info!("Shutting down...");
        });

    let serve_result = server.await;

    poller_handle.abort();
    if let Err(err) = registrar.unregister().await {
        error!(%err, "failed to unregister from coordination store");
    }
    serve_result.context("gRPC server failed")?;

    info!("Node shut down gracefully");
    Ok(())
}

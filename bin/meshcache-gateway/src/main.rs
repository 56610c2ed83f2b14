//! MeshCache Gateway - stateless front-door
//!
//! Serves the client HTTP API, watches the coordination store for owner
//! membership, and routes every cache request to the owner picked by the
//! consistent-hash ring.

mod handlers;
mod metrics;

use anyhow::{bail, Context, Result};
use axum::routing::{delete, get};
use axum::Router;
use clap::Parser;
use handlers::AppState;
use meshcache_client::{PeerPool, DEFAULT_RPC_TIMEOUT};
use meshcache_common::GatewayConfig;
use meshcache_discovery::{EtcdStore, WatchHandle, Watcher};
use metrics::ApiMetrics;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

#[derive(Parser, Debug)]
#[command(name = "meshcache-gateway")]
#[command(about = "MeshCache front-door gateway")]
#[command(version)]
struct Args {
    /// Configuration file path
    #[arg(short, long, default_value = "/etc/meshcache/gateway.toml")]
    config: String,

    /// etcd endpoints, comma separated
    #[arg(long)]
    etcd_endpoints: Option<String>,

    /// Service name whose nodes are watched
    #[arg(long)]
    service_name: Option<String>,

    /// HTTP API listen port
    #[arg(long)]
    api_port: Option<u16>,

    /// Virtual replicas per node on the hash ring
    #[arg(long)]
    replicas: Option<usize>,

    /// Peer transport protocol (only "grpc" is supported)
    #[arg(long)]
    protocol: Option<String>,

    /// Log level
    #[arg(long)]
    log_level: Option<String>,
}

impl Args {
    fn merge(self, mut config: GatewayConfig) -> Result<GatewayConfig> {
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
        if let Some(v) = self.api_port {
            config.api_port = v;
        }
        if let Some(v) = self.replicas {
            config.replicas = v;
        }
        if let Some(v) = self.protocol {
            // The legacy HTTP peer transport was dropped; owners speak gRPC.
            if v != "grpc" {
                bail!("unsupported peer protocol {v:?}; only \"grpc\" is available");
            }
        }
        if let Some(v) = self.log_level {
            config.log_level = v;
        }
        Ok(config)
    }
}

/// Apply membership snapshots to the routing pool until the watch ends.
async fn apply_snapshots(mut handle: WatchHandle, pool: Arc<PeerPool>) {
    loop {
        tokio::select! {
            snapshot = handle.snapshots.recv() => match snapshot {
                Some(nodes) => {
                    info!(count = nodes.len(), ?nodes, "applying membership snapshot");
                    pool.set(&nodes);
                }
                None => {
                    warn!("membership snapshot stream closed");
                    return;
                }
            },
            err = handle.errors.recv() => match err {
                Some(err) => warn!(%err, "membership watch error"),
                None => {
                    // The watch task is gone; drain whatever snapshots it
                    // left behind and stop.
                    while let Some(nodes) = handle.snapshots.recv().await {
                        pool.set(&nodes);
                    }
                    return;
                }
            }
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Load config file if it exists
    let file_config: GatewayConfig = if std::path::Path::new(&args.config).exists() {
        let raw = std::fs::read_to_string(&args.config)
            .with_context(|| format!("failed to read config file {}", args.config))?;
        toml::from_str(&raw)
            .with_context(|| format!("failed to parse config file {}", args.config))?
    } else {
        GatewayConfig::default()
    };
    let config = args.merge(file_config)?;

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

    info!("Starting MeshCache gateway");
    info!("etcd endpoints: {:?}", config.etcd_endpoints);
    info!("watched service: {}", config.service_name);
    info!("ring replicas: {}", config.replicas);

    let pool = Arc::new(PeerPool::new(config.replicas, DEFAULT_RPC_TIMEOUT));

    // Membership: initial snapshot plus a watch task feeding the pool
    let store = Arc::new(
        EtcdStore::connect(&config.etcd_endpoints)
            .await
            .context("failed to connect to etcd")?,
    );
    let watcher = Watcher::new(store, &config.service_name);
    let watch_handle = watcher
        .watch()
        .await
        .context("failed to start membership watch")?;
    let watch_task = tokio::spawn(apply_snapshots(watch_handle, pool.clone()));

    let state = Arc::new(AppState {
        pool,
        metrics: ApiMetrics::new(),
    });

    let app = Router::new()
        .route("/api/cache/{group}/{key}", get(handlers::get_cache))
        .route("/api/cache/{group}/{key}", delete(handlers::delete_cache))
        .route("/api/cache/{group}", get(handlers::missing_key))
        .route("/api/cache/{group}", delete(handlers::missing_key))
        .route("/api/cache/{group}/", get(handlers::missing_key))
        .route("/api/cache/{group}/", delete(handlers::missing_key))
        .route("/api/nodes", get(handlers::get_nodes))
        .route("/peers", get(handlers::get_peers))
        .route("/api/metrics", get(handlers::get_metrics))
        .route("/health", get(handlers::health))
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let addr: SocketAddr = format!("0.0.0.0:{}", config.api_port)
        .parse()
        .context("invalid API listen address")?;
    info!("Starting API server on {}", addr);
    let listener = TcpListener::bind(addr).await?;

    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();
    let server = tokio::spawn(async move {
        axum::serve(listener, app.into_make_service())
            .with_graceful_shutdown(async {
                shutdown_rx.await.ok();
            })
            .await
    });

    tokio::signal::ctrl_c().await.ok();
    info!("Shutting down...");
    let _ = shutdown_tx.send(());

    match tokio::time::timeout(SHUTDOWN_GRACE, server).await {
        Ok(joined) => joined.context("server task panicked")?.context("server failed")?,
        Err(_) => warn!("graceful shutdown timed out, dropping open connections"),
    }
    watch_task.abort();

    info!("Gateway shut down gracefully");
    Ok(())
}

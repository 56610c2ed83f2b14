//! Client-facing HTTP handlers.

use crate::metrics::ApiMetrics;
use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use meshcache_client::PeerPool;
use meshcache_common::CacheError;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, warn};

/// Shared gateway state.
pub struct AppState {
    pub pool: Arc<PeerPool>,
    pub metrics: ApiMetrics,
}

#[derive(Serialize)]
pub struct NodesResponse {
    pub count: usize,
    pub nodes: Vec<String>,
}

/// Response shape of the legacy `/peers` endpoint.
#[derive(Serialize)]
pub struct LegacyPeersResponse {
    pub peers: Vec<String>,
}

/// GET /api/cache/{group}/{key}
pub async fn get_cache(
    State(state): State<Arc<AppState>>,
    Path((group, key)): Path<(String, String)>,
) -> Response {
    state.metrics.inc_request();

    let Some((owner, client)) = state.pool.pick_owner(&key) else {
        warn!(key, "no cache node available");
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            "No suitable cache node available",
        )
            .into_response();
    };
    debug!(group, key, %owner, "routing get to owner");

    match client.get(&group, &key).await {
        Ok(value) => {
            state.metrics.inc_hit();
            (
                [(header::CONTENT_TYPE, "application/octet-stream")],
                value.to_vec(),
            )
                .into_response()
        }
        Err(err) => {
            if err.is_not_found() {
                state.metrics.inc_miss();
            }
            error_response(err, &group, &key)
        }
    }
}

/// DELETE /api/cache/{group}/{key}
pub async fn delete_cache(
    State(state): State<Arc<AppState>>,
    Path((group, key)): Path<(String, String)>,
) -> Response {
    state.metrics.inc_request();

    let Some((owner, client)) = state.pool.pick_owner(&key) else {
        warn!(key, "no cache node available");
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            "No suitable cache node available",
        )
            .into_response();
    };
    debug!(group, key, %owner, "routing delete to owner");

    match client.delete(&group, &key).await {
        Ok(_) => {
            state.metrics.inc_hit();
            (StatusCode::OK, "Deleted successfully").into_response()
        }
        Err(err) => {
            if err.is_not_found() {
                state.metrics.inc_miss();
            }
            error_response(err, &group, &key)
        }
    }
}

fn error_response(err: CacheError, group: &str, key: &str) -> Response {
    let status = StatusCode::from_u16(err.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let body = match &err {
        CacheError::EmptyKey => "Key is empty".to_string(),
        CacheError::NotFound => format!("Key not found: {key}"),
        CacheError::NoSuchGroup => format!("Group not found: {group}"),
        other => format!("Failed to get data: {other}"),
    };
    warn!(group, key, %err, "cache request failed");
    (status, body).into_response()
}

/// Catch-all for cache paths with no key segment.
pub async fn missing_key() -> Response {
    (
        StatusCode::BAD_REQUEST,
        "Bad Request: expected /api/cache/{group}/{key}",
    )
        .into_response()
}

/// GET /api/nodes
pub async fn get_nodes(State(state): State<Arc<AppState>>) -> Json<NodesResponse> {
    let nodes = state.pool.nodes();
    Json(NodesResponse {
        count: nodes.len(),
        nodes,
    })
}

/// GET /peers - legacy response shape kept for node-side pollers
pub async fn get_peers(State(state): State<Arc<AppState>>) -> Json<LegacyPeersResponse> {
    Json(LegacyPeersResponse {
        peers: state.pool.nodes(),
    })
}

/// GET /health
pub async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({"status": "ok"}))
}

/// GET /api/metrics
pub async fn get_metrics(State(state): State<Arc<AppState>>) -> Response {
    let num_tasks = tokio::runtime::Handle::current()
        .metrics()
        .num_alive_tasks();
    Json(state.metrics.snapshot(num_tasks)).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use meshcache_client::DEFAULT_RPC_TIMEOUT;

    fn empty_state() -> Arc<AppState> {
        Arc::new(AppState {
            pool: Arc::new(PeerPool::new(50, DEFAULT_RPC_TIMEOUT)),
            metrics: ApiMetrics::new(),
        })
    }

    async fn body_string(response: Response) -> String {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn test_empty_ring_is_service_unavailable() {
        let state = empty_state();
        let response = get_cache(
            State(state.clone()),
            Path(("scores".to_string(), "Tom".to_string())),
        )
        .await;
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(state.metrics.snapshot(0).request_count, 1);

        let response = delete_cache(
            State(state),
            Path(("scores".to_string(), "Tom".to_string())),
        )
        .await;
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_unreachable_owner_counts_request_but_not_miss() {
        let state = empty_state();
        // Nothing listens here, so the peer call fails with a network error.
        state.pool.set(&["127.0.0.1:1".to_string()]);

        let response = get_cache(
            State(state.clone()),
            Path(("scores".to_string(), "Tom".to_string())),
        )
        .await;
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let snapshot = state.metrics.snapshot(0);
        assert_eq!(snapshot.request_count, 1);
        assert_eq!(snapshot.hit_count, 0);
        assert_eq!(snapshot.miss_count, 0);
    }

    #[tokio::test]
    async fn test_nodes_and_peers_shapes() {
        let state = empty_state();
        state.pool.set(&["a:9090".to_string(), "b:9090".to_string()]);

        let response = get_nodes(State(state.clone())).await.into_response();
        let body = body_string(response).await;
        let json: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(json["count"], 2);
        assert_eq!(json["nodes"].as_array().unwrap().len(), 2);

        let response = get_peers(State(state)).await.into_response();
        let body = body_string(response).await;
        let json: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(json["peers"].as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_health_shape() {
        let response = health().await.into_response();
        let body = body_string(response).await;
        assert_eq!(body, r#"{"status":"ok"}"#);
    }

    #[tokio::test]
    async fn test_metrics_shape() {
        let state = empty_state();
        state.metrics.inc_request();
        state.metrics.inc_hit();

        let response = get_metrics(State(state)).await;
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_string(response).await;
        let json: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(json["requestCount"], 1);
        assert_eq!(json["hitCount"], 1);
        assert_eq!(json["missCount"], 0);
        assert!(json["uptime"].is_string());
        assert!(json["numTasks"].is_u64());
        assert!((json["hitRate"].as_f64().unwrap() - 100.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_error_bodies_match_status() {
        let response = error_response(CacheError::NotFound, "scores", "Alice");
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(body_string(response).await, "Key not found: Alice");

        let response = error_response(CacheError::NoSuchGroup, "nope", "Tom");
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(body_string(response).await, "Group not found: nope");

        let response = error_response(CacheError::EmptyKey, "scores", "");
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = error_response(CacheError::internal("boom"), "scores", "Tom");
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}

//! Gateway request metrics.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Counters behind `/api/metrics`.
///
/// Every `/api/cache` request counts toward `requests`. A hit is a 200
/// response on that path (including deletes); a miss is any 404, whether
/// the key or the group was absent. Other failures count as requests only.
pub struct ApiMetrics {
    start: Instant,
    requests: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsResponse {
    pub uptime: String,
    pub num_tasks: usize,
    pub request_count: u64,
    pub hit_count: u64,
    pub miss_count: u64,
    pub hit_rate: f64,
}

impl Default for ApiMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl ApiMetrics {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
            requests: AtomicU64::new(0),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn inc_request(&self) {
        self.requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self, num_tasks: usize) -> MetricsResponse {
        let requests = self.requests.load(Ordering::Relaxed);
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let hit_rate = if requests > 0 {
            hits as f64 / requests as f64 * 100.0
        } else {
            0.0
        };

        MetricsResponse {
            uptime: format!("{:?}", self.start.elapsed()),
            num_tasks,
            request_count: requests,
            hit_count: hits,
            miss_count: misses,
            hit_rate,
        }
    }
}

//! Serving-layer metrics handle.
//!
//! Component-level counters (processor, auto-download, cache) live with their
//! components; this handle covers the HTTP surface. It is passed by argument
//! rather than living in a process-wide registry so tests get isolated
//! counters.

use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct ApiMetrics {
    requests: AtomicU64,
    response_cache_hits: AtomicU64,
    autoload_triggers: AtomicU64,
}

impl ApiMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request(&self) {
        self.requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn response_cache_hit(&self) {
        self.response_cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn autoload_triggered(&self) {
        self.autoload_triggers.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> ApiMetricsSnapshot {
        ApiMetricsSnapshot {
            requests: self.requests.load(Ordering::Relaxed),
            response_cache_hits: self.response_cache_hits.load(Ordering::Relaxed),
            autoload_triggers: self.autoload_triggers.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct ApiMetricsSnapshot {
    pub requests: u64,
    pub response_cache_hits: u64,
    pub autoload_triggers: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate() {
        let metrics = ApiMetrics::new();
        metrics.request();
        metrics.request();
        metrics.response_cache_hit();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.requests, 2);
        assert_eq!(snapshot.response_cache_hits, 1);
        assert_eq!(snapshot.autoload_triggers, 0);
    }
}

//! Prometheus metrics for observability.
//!
//! HTTP request metrics are recorded by middleware; task counts are
//! collected from the service each time `/metrics` is scraped. Core metrics
//! (submissions, provider calls, webhooks, sweeps) are registered here too.

use once_cell::sync::Lazy;
use prometheus::{
    self, Encoder, HistogramOpts, HistogramVec, IntCounterVec, IntGauge, IntGaugeVec, Opts,
    Registry, TextEncoder,
};

use genqueue_core::TaskStatus;

/// Global metrics registry.
pub static REGISTRY: Lazy<Registry> = Lazy::new(|| {
    let registry = Registry::new();
    register_metrics(&registry);
    registry
});

// =============================================================================
// HTTP Request Metrics
// =============================================================================

/// HTTP request duration in seconds.
pub static HTTP_REQUEST_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    HistogramVec::new(
        HistogramOpts::new(
            "genqueue_http_request_duration_seconds",
            "HTTP request duration in seconds",
        )
        .buckets(vec![
            0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
        ]),
        &["method", "path", "status"],
    )
    .unwrap()
});

/// HTTP requests total count.
pub static HTTP_REQUESTS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("genqueue_http_requests_total", "Total HTTP requests"),
        &["method", "path", "status"],
    )
    .unwrap()
});

/// HTTP requests currently in flight.
pub static HTTP_REQUESTS_IN_FLIGHT: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new(
        "genqueue_http_requests_in_flight",
        "Number of HTTP requests currently being processed",
    )
    .unwrap()
});

/// Authentication failures.
pub static AUTH_FAILURES_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "genqueue_auth_failures_total",
            "Total authentication failures",
        ),
        &["reason"],
    )
    .unwrap()
});

// =============================================================================
// Task Metrics (collected dynamically)
// =============================================================================

/// Tasks in the registry by status.
pub static TASKS_BY_STATUS: Lazy<IntGaugeVec> = Lazy::new(|| {
    IntGaugeVec::new(
        Opts::new("genqueue_tasks_by_status", "Current task count by status"),
        &["status"],
    )
    .unwrap()
});

/// Live dedup cache entries.
pub static DEDUP_ENTRIES: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new("genqueue_dedup_entries", "Entries in the dedup cache").unwrap()
});

/// Stored orphan results.
pub static ORPHANS_STORED: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new("genqueue_orphans_stored", "Unmatched webhook results on hand").unwrap()
});

// =============================================================================
// Registration
// =============================================================================

fn register_metrics(registry: &Registry) {
    // HTTP
    registry
        .register(Box::new(HTTP_REQUEST_DURATION.clone()))
        .unwrap();
    registry
        .register(Box::new(HTTP_REQUESTS_TOTAL.clone()))
        .unwrap();
    registry
        .register(Box::new(HTTP_REQUESTS_IN_FLIGHT.clone()))
        .unwrap();
    registry
        .register(Box::new(AUTH_FAILURES_TOTAL.clone()))
        .unwrap();

    // Tasks
    registry
        .register(Box::new(TASKS_BY_STATUS.clone()))
        .unwrap();
    registry.register(Box::new(DEDUP_ENTRIES.clone())).unwrap();
    registry.register(Box::new(ORPHANS_STORED.clone())).unwrap();

    // Core metrics (submissions, provider, webhooks, backup, sweeps)
    for metric in genqueue_core::metrics::all_metrics() {
        registry.register(metric).unwrap();
    }
}

/// Encode all metrics as Prometheus text format.
pub fn encode_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!("Failed to encode metrics: {}", e);
    }
    String::from_utf8_lossy(&buffer).into_owned()
}

/// Refresh gauges from the current service state before a scrape.
pub async fn collect_dynamic_metrics(state: &crate::state::AppState) {
    let stats = state.service().stats().await;

    for status in TaskStatus::ALL {
        TASKS_BY_STATUS
            .with_label_values(&[status.as_str()])
            .set(stats.tasks.get(status) as i64);
    }
    DEDUP_ENTRIES.set(stats.dedup_entries as i64);
    ORPHANS_STORED.set(stats.orphans as i64);
}

static TASK_ID: Lazy<regex_lite::Regex> =
    Lazy::new(|| regex_lite::Regex::new(r"task_[0-9a-fA-F]{32}").unwrap());
static UUID: Lazy<regex_lite::Regex> = Lazy::new(|| {
    regex_lite::Regex::new(
        r"[0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12}",
    )
    .unwrap()
});
static NUMERIC: Lazy<regex_lite::Regex> =
    Lazy::new(|| regex_lite::Regex::new(r"/\d+(/|$)").unwrap());

/// Normalize a path for metric labels (replace IDs with placeholders).
pub fn normalize_path(path: &str) -> String {
    let result = TASK_ID.replace_all(path, "{task_id}");
    let result = UUID.replace_all(&result, "{id}");
    let result = NUMERIC.replace_all(&result, "/{id}$1");
    result.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_path_task_id() {
        let path = "/api/v1/generations/task_0123456789abcdef0123456789abcdef";
        assert_eq!(normalize_path(path), "/api/v1/generations/{task_id}");
    }

    #[test]
    fn test_normalize_path_uuid() {
        let path = "/api/v1/things/550e8400-e29b-41d4-a716-446655440000";
        assert_eq!(normalize_path(path), "/api/v1/things/{id}");
    }

    #[test]
    fn test_normalize_path_numeric() {
        assert_eq!(normalize_path("/api/v1/items/42"), "/api/v1/items/{id}");
    }

    #[test]
    fn test_normalize_path_static() {
        assert_eq!(normalize_path("/api/v1/health"), "/api/v1/health");
    }

    #[test]
    fn test_encode_includes_core_metrics() {
        genqueue_core::metrics::SUBMISSIONS
            .with_label_values(&["accepted"])
            .inc();
        let text = encode_metrics();
        assert!(text.contains("genqueue_submissions_total"));
    }
}

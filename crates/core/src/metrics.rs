//! Prometheus metrics for core components.
//!
//! This module provides metrics for:
//! - Submissions (accepted, duplicate, rejected)
//! - Provider calls and webhook reconciliation
//! - Persistence and maintenance sweeps

use once_cell::sync::Lazy;
use prometheus::{Histogram, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, Opts};

// =============================================================================
// Submissions
// =============================================================================

/// Submissions by result.
pub static SUBMISSIONS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("genqueue_submissions_total", "Total generation submissions"),
        &["result"], // "accepted", "duplicate", "invalid", "insufficient_credits", "error"
    )
    .unwrap()
});

// =============================================================================
// Provider
// =============================================================================

/// Provider submit calls by provider and result.
pub static PROVIDER_CALLS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("genqueue_provider_calls_total", "Total provider submit calls"),
        &["provider", "result"], // result: "ok", "error"
    )
    .unwrap()
});

/// Provider submit latency in seconds.
pub static PROVIDER_CALL_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    HistogramVec::new(
        HistogramOpts::new(
            "genqueue_provider_call_duration_seconds",
            "Duration of provider submit calls",
        )
        .buckets(vec![0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]),
        &["provider"],
    )
    .unwrap()
});

// =============================================================================
// Webhooks
// =============================================================================

/// Webhook deliveries by reconciliation outcome.
pub static WEBHOOK_OUTCOMES: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "genqueue_webhook_outcomes_total",
            "Webhook deliveries by reconciliation outcome",
        ),
        &["outcome"], // "completed", "failed", "orphaned", "ignored", "malformed"
    )
    .unwrap()
});

/// Lookups needed before a webhook matched its task.
pub static RECONCILE_ATTEMPTS: Lazy<Histogram> = Lazy::new(|| {
    Histogram::with_opts(
        HistogramOpts::new(
            "genqueue_reconcile_attempts",
            "Lookup attempts per reconciled webhook",
        )
        .buckets(vec![1.0, 2.0, 3.0, 5.0, 8.0, 10.0]),
    )
    .unwrap()
});

/// Webhook results saved as orphans.
pub static ORPHANS_SAVED: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "genqueue_orphans_saved_total",
        "Unmatched webhook results saved for diagnostics",
    )
    .unwrap()
});

// =============================================================================
// Persistence & maintenance
// =============================================================================

/// Snapshot writes by result.
pub static BACKUP_WRITES: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("genqueue_backup_writes_total", "Task snapshot writes"),
        &["result"], // "ok", "error"
    )
    .unwrap()
});

/// Entries removed by periodic sweeps.
pub static SWEEP_EVICTIONS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "genqueue_sweep_evictions_total",
            "Entries removed by maintenance sweeps",
        ),
        &["target"], // "dedup", "orphan", "task"
    )
    .unwrap()
});

/// Get all core metrics for registration.
pub fn all_metrics() -> Vec<Box<dyn prometheus::core::Collector>> {
    vec![
        Box::new(SUBMISSIONS.clone()),
        Box::new(PROVIDER_CALLS.clone()),
        Box::new(PROVIDER_CALL_DURATION.clone()),
        Box::new(WEBHOOK_OUTCOMES.clone()),
        Box::new(RECONCILE_ATTEMPTS.clone()),
        Box::new(ORPHANS_SAVED.clone()),
        Box::new(BACKUP_WRITES.clone()),
        Box::new(SWEEP_EVICTIONS.clone()),
    ]
}

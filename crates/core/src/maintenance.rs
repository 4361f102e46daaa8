//! Periodic sweeps: dedup TTL, orphan TTL and task retention.
//!
//! Each sweep runs on its own interval as a background task owned by the
//! [`MaintenanceScheduler`]. `stop` signals the loops and waits for them.

use chrono::{Duration as ChronoDuration, Utc};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::backup::BackupHandle;
use crate::config::{OrchestratorConfig, PersistenceConfig};
use crate::dedup::DedupCache;
use crate::metrics;
use crate::orphan::OrphanStore;
use crate::task::TaskRegistry;

#[derive(Debug, Clone, Copy)]
pub struct MaintenanceSettings {
    pub dedup_interval: Duration,
    pub retention_interval: Duration,
    pub task_retention: Duration,
    pub orphan_ttl: Duration,
}

impl MaintenanceSettings {
    pub fn from_config(orchestrator: &OrchestratorConfig, persistence: &PersistenceConfig) -> Self {
        Self {
            dedup_interval: Duration::from_secs(orchestrator.dedup_sweep_interval_secs),
            retention_interval: Duration::from_secs(persistence.sweep_interval_secs),
            task_retention: Duration::from_secs(persistence.retention_secs),
            orphan_ttl: Duration::from_secs(persistence.orphan_ttl_secs),
        }
    }
}

/// What one retention sweep removed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RetentionReport {
    pub tasks: usize,
    pub orphans: usize,
}

pub struct MaintenanceScheduler {
    registry: Arc<TaskRegistry>,
    dedup: Arc<DedupCache>,
    orphans: Arc<OrphanStore>,
    backup: BackupHandle,
    settings: MaintenanceSettings,
    running: Arc<AtomicBool>,
    shutdown_tx: broadcast::Sender<()>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl MaintenanceScheduler {
    pub fn new(
        registry: Arc<TaskRegistry>,
        dedup: Arc<DedupCache>,
        orphans: Arc<OrphanStore>,
        backup: BackupHandle,
        settings: MaintenanceSettings,
    ) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            registry,
            dedup,
            orphans,
            backup,
            settings,
            running: Arc::new(AtomicBool::new(false)),
            shutdown_tx,
            handles: Mutex::new(Vec::new()),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    /// Start the sweep loops.
    pub async fn start(&self) {
        if self.running.swap(true, Ordering::SeqCst) {
            warn!("Maintenance already running");
            return;
        }

        let mut handles = self.handles.lock().await;
        handles.push(self.spawn_dedup_loop());
        handles.push(self.spawn_retention_loop());

        info!(
            dedup_interval_secs = self.settings.dedup_interval.as_secs(),
            retention_interval_secs = self.settings.retention_interval.as_secs(),
            "Maintenance started"
        );
    }

    /// Signal the loops to exit and wait for them.
    pub async fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            warn!("Maintenance not running");
            return;
        }

        let _ = self.shutdown_tx.send(());

        let handles: Vec<_> = self.handles.lock().await.drain(..).collect();
        for handle in handles {
            if let Err(e) = handle.await {
                warn!("Maintenance loop ended abnormally: {}", e);
            }
        }

        info!("Maintenance stopped");
    }

    /// Drop dedup entries past their TTL or whose task is gone.
    pub async fn sweep_dedup(&self) -> usize {
        sweep_dedup(&self.dedup, &self.registry).await
    }

    /// Purge expired orphans and tasks, then rewrite the snapshot.
    pub async fn sweep_retention(&self) -> RetentionReport {
        sweep_retention(&self.registry, &self.orphans, &self.backup, &self.settings).await
    }

    fn spawn_dedup_loop(&self) -> JoinHandle<()> {
        let running = Arc::clone(&self.running);
        let dedup = Arc::clone(&self.dedup);
        let registry = Arc::clone(&self.registry);
        let interval = self.settings.dedup_interval;
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            debug!("Dedup sweep loop started");
            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => break,
                    _ = tokio::time::sleep(interval) => {
                        if !running.load(Ordering::Relaxed) {
                            break;
                        }
                        sweep_dedup(&dedup, &registry).await;
                    }
                }
            }
            debug!("Dedup sweep loop stopped");
        })
    }

    fn spawn_retention_loop(&self) -> JoinHandle<()> {
        let running = Arc::clone(&self.running);
        let registry = Arc::clone(&self.registry);
        let orphans = Arc::clone(&self.orphans);
        let backup = self.backup.clone();
        let settings = self.settings;
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            debug!("Retention sweep loop started");
            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => break,
                    _ = tokio::time::sleep(settings.retention_interval) => {
                        if !running.load(Ordering::Relaxed) {
                            break;
                        }
                        sweep_retention(&registry, &orphans, &backup, &settings).await;
                    }
                }
            }
            debug!("Retention sweep loop stopped");
        })
    }
}

async fn sweep_dedup(dedup: &DedupCache, registry: &TaskRegistry) -> usize {
    let removed = dedup.sweep(registry).await;
    if removed > 0 {
        metrics::SWEEP_EVICTIONS
            .with_label_values(&["dedup"])
            .inc_by(removed as u64);
        debug!(removed, "Swept dedup entries");
    }
    removed
}

async fn sweep_retention(
    registry: &TaskRegistry,
    orphans: &OrphanStore,
    backup: &BackupHandle,
    settings: &MaintenanceSettings,
) -> RetentionReport {
    let now = Utc::now();
    let mut report = RetentionReport::default();

    let orphan_ttl = ChronoDuration::from_std(settings.orphan_ttl).unwrap_or(ChronoDuration::hours(24));
    match orphans.sweep_at(now, orphan_ttl).await {
        Ok(removed) => report.orphans = removed,
        Err(e) => warn!("Orphan sweep failed: {}", e),
    }

    let retention =
        ChronoDuration::from_std(settings.task_retention).unwrap_or(ChronoDuration::hours(24));
    let evicted = registry.evict_created_before(now - retention).await;
    report.tasks = evicted.len();
    if !evicted.is_empty() {
        backup.trim().await;
    }

    metrics::SWEEP_EVICTIONS
        .with_label_values(&["task"])
        .inc_by(report.tasks as u64);
    metrics::SWEEP_EVICTIONS
        .with_label_values(&["orphan"])
        .inc_by(report.orphans as u64);

    if report != RetentionReport::default() {
        info!(
            tasks = report.tasks,
            orphans = report.orphans,
            "Retention sweep removed expired entries"
        );
    }
    report
}

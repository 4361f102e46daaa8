//! Wiring of the generation components behind one handle.
//!
//! Startup order: load the snapshot, restore fresh tasks into the registry,
//! open the orphan store, start the backup writer, build the reconciler and
//! provider, then start the maintenance sweeps.

use chrono::{Duration as ChronoDuration, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::backup::{create_backup_system, BackupHandle, BackupStore, JsonFileBackupStore};
use crate::config::Config;
use crate::credits::CreditLedger;
use crate::dedup::DedupCache;
use crate::maintenance::{MaintenanceScheduler, MaintenanceSettings};
use crate::orphan::{OrphanResult, OrphanStore};
use crate::projector::{Projection, ResponseShape, StatusProjector};
use crate::provider::{HttpImageProvider, ImageProvider, ProviderError, SimulatedProvider};
use crate::reconciler::{
    ReconcileOutcome, ReconcileSettings, WebhookDelivery, WebhookParseError, WebhookReconciler,
};
use crate::submission::{
    SubmissionOrchestrator, SubmissionSettings, SubmitError, SubmitOutcome, SubmitRequest,
};
use crate::task::{StatusCounts, Task, TaskRegistry};

/// Buffer of the backup writer channel.
const BACKUP_BUFFER: usize = 1024;

/// How long shutdown waits for the backup writer.
const WRITER_JOIN_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("Provider setup failed: {0}")]
    Provider(#[from] ProviderError),
}

/// Which provider the service submits to.
pub enum ProviderChoice {
    /// HTTP provider when an API key is configured, the simulator when test
    /// mode is allowed, otherwise none.
    FromConfig,
    /// A caller-supplied provider.
    Custom(Arc<dyn ImageProvider>),
}

/// Service overview for the status endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct ServiceStats {
    pub tasks: StatusCounts,
    pub dedup_entries: usize,
    pub orphans: usize,
    pub provider: Option<String>,
}

pub struct GenerationService {
    registry: Arc<TaskRegistry>,
    dedup: Arc<DedupCache>,
    orphans: Arc<OrphanStore>,
    backup: BackupHandle,
    reconciler: WebhookReconciler,
    submitter: SubmissionOrchestrator,
    projector: StatusProjector,
    maintenance: MaintenanceScheduler,
    writer: Mutex<Option<JoinHandle<()>>>,
}

impl GenerationService {
    /// Start with the snapshot file named in the config.
    pub async fn start(
        config: &Config,
        provider: ProviderChoice,
        credits: Arc<dyn CreditLedger>,
    ) -> Result<Self, ServiceError> {
        let store = Arc::new(JsonFileBackupStore::new(&config.persistence.backup_path));
        Self::start_with_store(config, store, provider, credits).await
    }

    pub async fn start_with_store(
        config: &Config,
        store: Arc<dyn BackupStore>,
        provider: ProviderChoice,
        credits: Arc<dyn CreditLedger>,
    ) -> Result<Self, ServiceError> {
        let retention = Duration::from_secs(config.persistence.retention_secs);

        let registry = Arc::new(TaskRegistry::new());
        let (restored, expired) = load_fresh_tasks(store.as_ref(), retention);
        let restored_count = registry.restore(restored.clone()).await;
        if restored_count > 0 {
            info!(tasks = restored_count, "Restored tasks from snapshot");
        }

        let orphan_path = &config.persistence.orphan_path;
        let orphans = Arc::new(match OrphanStore::open(orphan_path) {
            Ok(store) => store,
            Err(e) => {
                error!(path = %orphan_path.display(), "Unreadable orphan store, starting empty: {}", e);
                OrphanStore::empty_at(orphan_path)
            }
        });

        let (backup, writer) = create_backup_system(store, retention, BACKUP_BUFFER, restored);
        let writer = tokio::spawn(writer.run());
        if expired > 0 {
            backup.trim().await;
        }

        let dedup = Arc::new(DedupCache::new(Duration::from_secs(
            config.orchestrator.dedup_ttl_secs,
        )));

        let reconciler = WebhookReconciler::new(
            registry.clone(),
            orphans.clone(),
            backup.clone(),
            ReconcileSettings::from(&config.orchestrator),
        );

        let provider = resolve_provider(config, provider, &reconciler)?;
        match &provider {
            Some(p) => info!(provider = p.name(), "Image provider ready"),
            None => warn!("No image provider configured; submissions will be rejected"),
        }

        let submitter = SubmissionOrchestrator::new(
            registry.clone(),
            dedup.clone(),
            backup.clone(),
            provider,
            credits,
            SubmissionSettings {
                cost_per_image: config.credits.cost_per_image,
                max_source_references: config.orchestrator.max_source_references,
                webhook_path: config.provider.webhook_path.clone(),
                public_url: config.server.public_url.clone(),
            },
        );

        let projector = StatusProjector::new(Duration::from_secs(
            config.orchestrator.estimated_duration_secs,
        ));

        let maintenance = MaintenanceScheduler::new(
            registry.clone(),
            dedup.clone(),
            orphans.clone(),
            backup.clone(),
            MaintenanceSettings::from_config(&config.orchestrator, &config.persistence),
        );
        maintenance.start().await;

        Ok(Self {
            registry,
            dedup,
            orphans,
            backup,
            reconciler,
            submitter,
            projector,
            maintenance,
            writer: Mutex::new(Some(writer)),
        })
    }

    pub fn registry(&self) -> &Arc<TaskRegistry> {
        &self.registry
    }

    pub fn reconciler(&self) -> &WebhookReconciler {
        &self.reconciler
    }

    pub fn backup(&self) -> &BackupHandle {
        &self.backup
    }

    pub fn maintenance(&self) -> &MaintenanceScheduler {
        &self.maintenance
    }

    pub async fn submit(
        &self,
        requester: &str,
        request: &SubmitRequest,
        origin: Option<&str>,
    ) -> Result<SubmitOutcome, SubmitError> {
        self.submitter.submit(requester, request, origin).await
    }

    pub async fn task(&self, task_id: &str) -> Option<Task> {
        self.registry.get(task_id).await
    }

    /// Poll view of a task, or `None` if it is unknown.
    pub async fn project(&self, task_id: &str, shape: ResponseShape) -> Option<Projection> {
        let task = self.registry.get(task_id).await?;
        Some(self.projector.project(&task, shape))
    }

    /// Parse a webhook body and reconcile it in the background.
    pub fn accept_webhook(
        &self,
        body: &[u8],
    ) -> Result<JoinHandle<ReconcileOutcome>, WebhookParseError> {
        let delivery = WebhookDelivery::from_slice(body)?;
        info!(
            external_id = %delivery.external_id,
            code = delivery.result_code,
            "Webhook received"
        );
        Ok(self.reconciler.handle(delivery))
    }

    pub async fn orphans(&self) -> Vec<OrphanResult> {
        self.orphans.list().await
    }

    pub async fn stats(&self) -> ServiceStats {
        ServiceStats {
            tasks: self.registry.count_by_status().await,
            dedup_entries: self.dedup.len().await,
            orphans: self.orphans.len().await,
            provider: self.submitter.provider_name().map(str::to_string),
        }
    }

    /// Stop the sweeps, write the final snapshot and wait for the writer.
    pub async fn shutdown(&self) {
        info!("Shutting down generation service");
        if self.maintenance.is_running() {
            self.maintenance.stop().await;
        }

        self.backup.close().await;
        if let Some(writer) = self.writer.lock().await.take() {
            match tokio::time::timeout(WRITER_JOIN_TIMEOUT, writer).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => error!("Backup writer panicked: {}", e),
                Err(_) => warn!("Timed out waiting for backup writer"),
            }
        }
    }
}

/// Tasks from the snapshot that are still inside the retention window, and
/// how many expired ones were skipped.
fn load_fresh_tasks(store: &dyn BackupStore, retention: Duration) -> (Vec<Task>, usize) {
    let mut document = match store.load() {
        Ok(document) => document,
        Err(e) => {
            error!("Could not read task snapshot, starting empty: {}", e);
            return (Vec::new(), 0);
        }
    };

    let cutoff = Utc::now() - ChronoDuration::from_std(retention).unwrap_or(ChronoDuration::hours(24));
    let dropped = document.retain_since(cutoff);
    if dropped > 0 {
        info!(dropped, "Skipped expired tasks in snapshot");
    }
    (document.into_tasks(), dropped)
}

fn resolve_provider(
    config: &Config,
    choice: ProviderChoice,
    reconciler: &WebhookReconciler,
) -> Result<Option<Arc<dyn ImageProvider>>, ServiceError> {
    match choice {
        ProviderChoice::Custom(provider) => Ok(Some(provider)),
        ProviderChoice::FromConfig if config.provider.has_api_key() => Ok(Some(Arc::new(
            HttpImageProvider::from_config(&config.provider)?,
        ))),
        ProviderChoice::FromConfig if config.provider.allow_simulator => {
            info!("No provider API key; using simulated provider");
            Ok(Some(Arc::new(SimulatedProvider::new(
                reconciler.clone(),
                Duration::from_millis(config.provider.simulator_delay_ms),
            ))))
        }
        ProviderChoice::FromConfig => Ok(None),
    }
}

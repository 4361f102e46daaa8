use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

use super::webhook::{failure_message, WebhookDelivery, EMPTY_RESULT_MESSAGE};
use crate::backup::BackupHandle;
use crate::config::OrchestratorConfig;
use crate::metrics;
use crate::orphan::{OrphanResult, OrphanStore};
use crate::task::{Task, TaskRegistry, TaskStatus};

/// How long a webhook waits for its task to become findable.
#[derive(Debug, Clone, Copy)]
pub struct ReconcileSettings {
    pub attempts: u32,
    pub interval: Duration,
}

impl Default for ReconcileSettings {
    fn default() -> Self {
        Self {
            attempts: 10,
            interval: Duration::from_millis(500),
        }
    }
}

impl From<&OrchestratorConfig> for ReconcileSettings {
    fn from(config: &OrchestratorConfig) -> Self {
        Self {
            attempts: config.reconcile_attempts.max(1),
            interval: Duration::from_millis(config.reconcile_interval_ms),
        }
    }
}

/// What happened to a webhook.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileOutcome {
    Completed { task_id: String },
    Failed { task_id: String, reason: String },
    /// No task matched; the result went to the orphan store.
    Orphaned { external_id: String },
    /// The task was already terminal or could not be updated.
    Ignored { task_id: String },
}

impl ReconcileOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            ReconcileOutcome::Completed { .. } => "completed",
            ReconcileOutcome::Failed { .. } => "failed",
            ReconcileOutcome::Orphaned { .. } => "orphaned",
            ReconcileOutcome::Ignored { .. } => "ignored",
        }
    }
}

struct Inner {
    registry: Arc<TaskRegistry>,
    orphans: Arc<OrphanStore>,
    backup: BackupHandle,
    settings: ReconcileSettings,
}

/// Applies provider callbacks to the registry.
///
/// The provider may call back before the submitting side has written the
/// external id onto the task, so lookups are retried a bounded number of
/// times before the result is parked in the orphan store.
#[derive(Clone)]
pub struct WebhookReconciler {
    inner: Arc<Inner>,
}

impl WebhookReconciler {
    pub fn new(
        registry: Arc<TaskRegistry>,
        orphans: Arc<OrphanStore>,
        backup: BackupHandle,
        settings: ReconcileSettings,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                registry,
                orphans,
                backup,
                settings,
            }),
        }
    }

    /// Reconcile in the background and return immediately.
    pub fn handle(&self, delivery: WebhookDelivery) -> JoinHandle<ReconcileOutcome> {
        let this = self.clone();
        tokio::spawn(async move { this.reconcile(delivery).await })
    }

    /// Match the delivery to its task and apply it.
    pub async fn reconcile(&self, delivery: WebhookDelivery) -> ReconcileOutcome {
        let settings = self.inner.settings;

        for attempt in 1..=settings.attempts {
            if let Some(task) = self
                .inner
                .registry
                .find_by_external_id(&delivery.external_id)
                .await
            {
                metrics::RECONCILE_ATTEMPTS.observe(attempt as f64);
                if attempt > 1 {
                    tracing::debug!(
                        external_id = %delivery.external_id,
                        task_id = %task.id,
                        attempt,
                        "Webhook matched after retry"
                    );
                }
                let outcome = self.apply(task, &delivery).await;
                record(&outcome);
                return outcome;
            }

            if attempt < settings.attempts {
                tokio::time::sleep(settings.interval).await;
            }
        }

        let outcome = self.orphan(delivery).await;
        record(&outcome);
        outcome
    }

    async fn apply(&self, task: Task, delivery: &WebhookDelivery) -> ReconcileOutcome {
        if task.status.is_terminal() {
            tracing::info!(
                task_id = %task.id,
                status = %task.status,
                "Ignoring webhook for finished task"
            );
            return ReconcileOutcome::Ignored { task_id: task.id };
        }

        let registry = &self.inner.registry;

        if task.status == TaskStatus::Pending {
            if let Err(e) = registry
                .update(&task.id, |t| t.status = TaskStatus::Processing)
                .await
            {
                tracing::warn!(task_id = %task.id, "Could not mark task processing: {}", e);
            }
        }

        let variant_limit = task.input.variant_count.max(1) as usize;
        let results: Vec<String> = delivery
            .result_references
            .iter()
            .filter(|url| !url.trim().is_empty())
            .take(variant_limit)
            .cloned()
            .collect();

        let failure = if !delivery.is_success() {
            Some(failure_message(delivery.result_code, delivery.message.as_deref()))
        } else if results.is_empty() {
            Some(EMPTY_RESULT_MESSAGE.to_string())
        } else {
            None
        };

        let updated = registry
            .update(&task.id, |t| match &failure {
                Some(reason) => t.fail(reason.clone()),
                None => t.complete(results),
            })
            .await;

        match updated {
            Ok(Some(updated)) => {
                self.inner.backup.persist(&updated).await;
                match failure {
                    Some(reason) => {
                        tracing::info!(
                            task_id = %updated.id,
                            code = delivery.result_code,
                            reason = %reason,
                            "Task failed by provider callback"
                        );
                        ReconcileOutcome::Failed {
                            task_id: updated.id,
                            reason,
                        }
                    }
                    None => {
                        tracing::info!(
                            task_id = %updated.id,
                            results = updated.result_references.len(),
                            "Task completed"
                        );
                        ReconcileOutcome::Completed { task_id: updated.id }
                    }
                }
            }
            Ok(None) => {
                tracing::warn!(task_id = %task.id, "Task vanished during reconciliation");
                ReconcileOutcome::Ignored { task_id: task.id }
            }
            Err(e) => {
                tracing::warn!(task_id = %task.id, "Webhook not applied: {}", e);
                ReconcileOutcome::Ignored { task_id: task.id }
            }
        }
    }

    async fn orphan(&self, delivery: WebhookDelivery) -> ReconcileOutcome {
        tracing::warn!(
            external_id = %delivery.external_id,
            attempts = self.inner.settings.attempts,
            "No task matched webhook, saving as orphan"
        );

        let external_id = delivery.external_id.clone();
        let orphan = OrphanResult {
            external_id: delivery.external_id,
            result_code: delivery.result_code,
            message: delivery.message,
            payload: delivery.payload,
            saved_at: Utc::now(),
        };

        if let Err(e) = self.inner.orphans.save(orphan).await {
            tracing::error!(external_id = %external_id, "Failed to persist orphan: {}", e);
        }
        metrics::ORPHANS_SAVED.inc();

        ReconcileOutcome::Orphaned { external_id }
    }
}

fn record(outcome: &ReconcileOutcome) {
    metrics::WEBHOOK_OUTCOMES
        .with_label_values(&[outcome.label()])
        .inc();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backup::create_backup_system;
    use crate::testing::{fixtures, MemoryBackupStore};
    use serde_json::json;

    struct Harness {
        registry: Arc<TaskRegistry>,
        orphans: Arc<OrphanStore>,
        store: Arc<MemoryBackupStore>,
        backup: BackupHandle,
        reconciler: WebhookReconciler,
    }

    fn harness(attempts: u32, interval_ms: u64) -> Harness {
        let registry = Arc::new(TaskRegistry::new());
        let orphans = Arc::new(OrphanStore::in_memory());
        let store = Arc::new(MemoryBackupStore::new());
        let (backup, writer) = create_backup_system(
            store.clone(),
            Duration::from_secs(86400),
            64,
            vec![],
        );
        tokio::spawn(writer.run());
        let reconciler = WebhookReconciler::new(
            registry.clone(),
            orphans.clone(),
            backup.clone(),
            ReconcileSettings {
                attempts,
                interval: Duration::from_millis(interval_ms),
            },
        );
        Harness {
            registry,
            orphans,
            store,
            backup,
            reconciler,
        }
    }

    fn delivery(external_id: &str, code: i64, results: &[&str]) -> WebhookDelivery {
        WebhookDelivery {
            external_id: external_id.to_string(),
            result_code: code,
            message: Some("provider says no".to_string()),
            result_references: results.iter().map(|s| s.to_string()).collect(),
            payload: json!({"code": code, "data": {"taskId": external_id}}),
        }
    }

    async fn processing_task(h: &Harness, external_id: &str) -> String {
        let id = h.registry.create(fixtures::task("a cat")).await.unwrap();
        h.registry
            .update(&id, |t| {
                t.status = TaskStatus::Processing;
                t.external_id = Some(external_id.to_string());
            })
            .await
            .unwrap();
        id
    }

    #[tokio::test]
    async fn test_success_completes_and_truncates_to_variant_count() {
        let h = harness(3, 10);
        let id = processing_task(&h, "ext-1").await;

        let outcome = h
            .reconciler
            .reconcile(delivery("ext-1", 200, &["https://cdn/1.png", "https://cdn/2.png"]))
            .await;

        assert_eq!(outcome, ReconcileOutcome::Completed { task_id: id.clone() });
        let task = h.registry.get(&id).await.unwrap();
        assert_eq!(task.status, TaskStatus::Completed);
        assert_eq!(task.result_references, vec!["https://cdn/1.png"]);
        assert!(task.error_detail.is_none());
        assert!(task.completed_at.is_some());

        assert!(h.backup.flush().await);
        assert_eq!(
            h.store.current().get(&id).unwrap().status,
            TaskStatus::Completed
        );
    }

    #[tokio::test]
    async fn test_failure_code_uses_table() {
        let h = harness(3, 10);
        let id = processing_task(&h, "ext-451").await;

        let outcome = h.reconciler.reconcile(delivery("ext-451", 451, &[])).await;

        assert!(matches!(outcome, ReconcileOutcome::Failed { .. }));
        let task = h.registry.get(&id).await.unwrap();
        assert_eq!(task.status, TaskStatus::Failed);
        assert_eq!(
            task.error_detail.as_deref(),
            Some("failed to download source image")
        );
    }

    #[tokio::test]
    async fn test_success_without_results_fails() {
        let h = harness(3, 10);
        let id = processing_task(&h, "ext-empty").await;

        h.reconciler.reconcile(delivery("ext-empty", 200, &[])).await;

        let task = h.registry.get(&id).await.unwrap();
        assert_eq!(task.status, TaskStatus::Failed);
        assert!(task.error_detail.unwrap().contains("no images received"));
    }

    #[tokio::test]
    async fn test_unmatched_webhook_is_orphaned() {
        let h = harness(3, 5);

        let outcome = h
            .reconciler
            .reconcile(delivery("E99", 200, &["https://cdn/x.png"]))
            .await;

        assert_eq!(
            outcome,
            ReconcileOutcome::Orphaned {
                external_id: "E99".to_string()
            }
        );
        let orphans = h.orphans.find("E99").await;
        assert_eq!(orphans.len(), 1);
        assert_eq!(orphans[0].payload["data"]["taskId"], "E99");
        assert!(h.registry.is_empty().await);
    }

    #[tokio::test]
    async fn test_webhook_before_external_id_write_still_matches() {
        let h = harness(10, 20);
        let id = h.registry.create(fixtures::task("a cat")).await.unwrap();
        h.registry
            .update(&id, |t| t.status = TaskStatus::Processing)
            .await
            .unwrap();

        let join = h
            .reconciler
            .handle(delivery("ext-late", 200, &["https://cdn/1.png"]));

        tokio::time::sleep(Duration::from_millis(60)).await;
        h.registry
            .update(&id, |t| t.external_id = Some("ext-late".to_string()))
            .await
            .unwrap();

        let outcome = join.await.unwrap();
        assert_eq!(outcome, ReconcileOutcome::Completed { task_id: id });
        assert!(h.orphans.is_empty().await);
    }

    #[tokio::test]
    async fn test_duplicate_webhook_is_ignored() {
        let h = harness(3, 10);
        let id = processing_task(&h, "ext-dup").await;

        h.reconciler
            .reconcile(delivery("ext-dup", 200, &["https://cdn/1.png"]))
            .await;
        let second = h.reconciler.reconcile(delivery("ext-dup", 500, &[])).await;

        assert_eq!(second, ReconcileOutcome::Ignored { task_id: id.clone() });
        assert_eq!(
            h.registry.get(&id).await.unwrap().status,
            TaskStatus::Completed
        );
    }
}

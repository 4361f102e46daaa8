use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;

use super::request::{SubmitRequest, ValidationError};
use crate::backup::BackupHandle;
use crate::credits::{CreditError, CreditLedger};
use crate::dedup::{fingerprint, DedupCache};
use crate::metrics;
use crate::provider::{ImageProvider, ProviderRequest};
use crate::task::{Task, TaskError, TaskRegistry, TaskStatus};

#[derive(Debug, Error)]
pub enum SubmitError {
    #[error("{0}")]
    Validation(#[from] ValidationError),

    #[error("Insufficient credits: need {required}, have {available}")]
    InsufficientCredits { required: u64, available: u64 },

    #[error("Image provider is not configured")]
    ProviderNotConfigured,

    #[error("Credit check failed: {0}")]
    Credits(CreditError),

    #[error("Failed to create task: {0}")]
    Registry(#[from] TaskError),

    #[error("An identical submission is still being processed")]
    StillInFlight { task_id: String },
}

impl SubmitError {
    /// HTTP status the API answers with.
    pub fn status_code(&self) -> u16 {
        match self {
            SubmitError::Validation(_) => 422,
            SubmitError::InsufficientCredits { .. } => 402,
            SubmitError::ProviderNotConfigured
            | SubmitError::Credits(_)
            | SubmitError::Registry(_)
            | SubmitError::StillInFlight { .. } => 500,
        }
    }

    fn metric_label(&self) -> &'static str {
        match self {
            SubmitError::Validation(_) => "invalid",
            SubmitError::InsufficientCredits { .. } => "insufficient_credits",
            _ => "error",
        }
    }
}

impl From<CreditError> for SubmitError {
    fn from(e: CreditError) -> Self {
        match e {
            CreditError::Insufficient {
                required,
                available,
            } => SubmitError::InsufficientCredits {
                required,
                available,
            },
            other => SubmitError::Credits(other),
        }
    }
}

/// Result of an accepted submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitOutcome {
    pub task_id: String,
    pub status: TaskStatus,
    /// True when an identical recent submission already owns the task.
    pub duplicate: bool,
}

/// How often a submission re-checks an identical one that is still being
/// created, and how long it waits before giving up.
const IN_FLIGHT_POLL: Duration = Duration::from_millis(10);
const IN_FLIGHT_WAIT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
pub struct SubmissionSettings {
    pub cost_per_image: u64,
    pub max_source_references: usize,
    /// Path of the webhook route, appended to the origin.
    pub webhook_path: String,
    /// Fixed public origin. Takes precedence over the request origin.
    pub public_url: Option<String>,
}

impl Default for SubmissionSettings {
    fn default() -> Self {
        Self {
            cost_per_image: 1,
            max_source_references: 1,
            webhook_path: "/api/v1/webhooks/provider".to_string(),
            public_url: None,
        }
    }
}

/// Validates submissions, creates tasks and hands them to the provider.
///
/// `submit` returns as soon as the task exists. The provider call runs on a
/// spawned task and reports back only through the registry.
pub struct SubmissionOrchestrator {
    registry: Arc<TaskRegistry>,
    dedup: Arc<DedupCache>,
    backup: BackupHandle,
    provider: Option<Arc<dyn ImageProvider>>,
    credits: Arc<dyn CreditLedger>,
    settings: SubmissionSettings,
}

impl SubmissionOrchestrator {
    pub fn new(
        registry: Arc<TaskRegistry>,
        dedup: Arc<DedupCache>,
        backup: BackupHandle,
        provider: Option<Arc<dyn ImageProvider>>,
        credits: Arc<dyn CreditLedger>,
        settings: SubmissionSettings,
    ) -> Self {
        Self {
            registry,
            dedup,
            backup,
            provider,
            credits,
            settings,
        }
    }

    pub fn provider_name(&self) -> Option<&str> {
        self.provider.as_deref().map(|p| p.name())
    }

    /// Submit a generation on behalf of `requester`.
    ///
    /// `origin` is the scheme and host the request arrived on; it is used to
    /// build the callback address when no public URL is configured.
    pub async fn submit(
        &self,
        requester: &str,
        request: &SubmitRequest,
        origin: Option<&str>,
    ) -> Result<SubmitOutcome, SubmitError> {
        let result = self.try_submit(requester, request, origin).await;
        match &result {
            Ok(outcome) if outcome.duplicate => {
                metrics::SUBMISSIONS.with_label_values(&["duplicate"]).inc()
            }
            Ok(_) => metrics::SUBMISSIONS.with_label_values(&["accepted"]).inc(),
            Err(e) => metrics::SUBMISSIONS
                .with_label_values(&[e.metric_label()])
                .inc(),
        }
        result
    }

    async fn try_submit(
        &self,
        requester: &str,
        request: &SubmitRequest,
        origin: Option<&str>,
    ) -> Result<SubmitOutcome, SubmitError> {
        let input = request.validate(self.settings.max_source_references)?;

        let Some(provider) = self.provider.clone() else {
            tracing::error!("Submission rejected: no image provider configured");
            return Err(SubmitError::ProviderNotConfigured);
        };

        let fp = fingerprint(
            requester,
            &input.source_references,
            input.prompt.as_deref(),
            input.style,
        );

        let callback_address = request
            .callback_override
            .clone()
            .unwrap_or_else(|| self.callback_address(origin));
        let task = Task::new(requester, input, callback_address);

        if let Some(existing) = self.claim(&fp, &task.id).await? {
            tracing::info!(
                task_id = %existing.id,
                requester = %requester,
                "Duplicate submission, returning existing task"
            );
            return Ok(SubmitOutcome {
                task_id: existing.id,
                status: existing.status,
                duplicate: true,
            });
        }

        let cost = self.cost(&task);
        if let Err(e) = self.credits.ensure(requester, cost).await {
            self.dedup.forget(&fp, &task.id).await;
            tracing::info!(requester = %requester, "Submission rejected: {}", e);
            return Err(e.into());
        }

        if let Err(e) = self.registry.create(task.clone()).await {
            self.dedup.forget(&fp, &task.id).await;
            return Err(e.into());
        }
        self.dedup.confirm(&fp, &task.id).await;
        self.backup.persist(&task).await;

        match self.credits.deduct(requester, cost).await {
            Ok(remaining) => {
                tracing::debug!(requester = %requester, cost, ?remaining, "Credits deducted")
            }
            Err(e) => tracing::warn!(
                task_id = %task.id,
                requester = %requester,
                "Credit deduction failed after task creation: {}",
                e
            ),
        }

        tracing::info!(
            task_id = %task.id,
            requester = %requester,
            style = ?task.input.style,
            provider = provider.name(),
            "Task created"
        );

        let outcome = SubmitOutcome {
            task_id: task.id.clone(),
            status: task.status,
            duplicate: false,
        };

        tokio::spawn(dispatch(
            self.registry.clone(),
            self.backup.clone(),
            provider,
            task,
        ));

        Ok(outcome)
    }

    /// Claim `fp` for `candidate`, or return the task that already owns it.
    ///
    /// An identical submission that has claimed the fingerprint but not yet
    /// created its task is waited for: it either confirms (its task is
    /// returned) or releases the claim on its error path (the claim is
    /// retried). Only a confirmed entry whose task is gone is released here.
    async fn claim(&self, fp: &str, candidate: &str) -> Result<Option<Task>, SubmitError> {
        let deadline = Instant::now() + IN_FLIGHT_WAIT;
        loop {
            let Some(existing) = self.dedup.claim(fp, candidate).await else {
                return Ok(None);
            };
            if let Some(task) = self.registry.get(&existing.task_id).await {
                return Ok(Some(task));
            }

            if existing.confirmed {
                self.dedup.forget(fp, &existing.task_id).await;
                continue;
            }

            if Instant::now() >= deadline {
                tracing::warn!(
                    task_id = %existing.task_id,
                    "Gave up waiting for identical in-flight submission"
                );
                return Err(SubmitError::StillInFlight {
                    task_id: existing.task_id,
                });
            }
            tokio::time::sleep(IN_FLIGHT_POLL).await;
        }
    }

    fn cost(&self, task: &Task) -> u64 {
        self.settings.cost_per_image * u64::from(task.input.variant_count.max(1))
    }

    fn callback_address(&self, origin: Option<&str>) -> String {
        let base = self
            .settings
            .public_url
            .as_deref()
            .or(origin)
            .unwrap_or("http://localhost:8080");
        format!(
            "{}{}",
            base.trim_end_matches('/'),
            self.settings.webhook_path
        )
    }
}

/// Move the task to `processing`, call the provider once and record the
/// outcome. Runs off the request path.
async fn dispatch(
    registry: Arc<TaskRegistry>,
    backup: BackupHandle,
    provider: Arc<dyn ImageProvider>,
    task: Task,
) {
    let task_id = task.id.clone();

    match registry
        .update(&task_id, |t| t.status = TaskStatus::Processing)
        .await
    {
        Ok(Some(updated)) => backup.persist(&updated).await,
        Ok(None) => {
            tracing::warn!(task_id = %task_id, "Task disappeared before dispatch");
            return;
        }
        Err(e) => {
            tracing::warn!(task_id = %task_id, "Task not dispatched: {}", e);
            return;
        }
    }

    let request = ProviderRequest::from(&task);
    match provider.submit(&request).await {
        Ok(submission) => {
            metrics::PROVIDER_CALLS
                .with_label_values(&[provider.name(), "ok"])
                .inc();
            tracing::info!(
                task_id = %task_id,
                external_id = %submission.external_id,
                "Provider accepted task"
            );
            let external_id = submission.external_id;
            match registry
                .update(&task_id, |t| t.external_id = Some(external_id.clone()))
                .await
            {
                Ok(Some(updated)) => backup.persist(&updated).await,
                Ok(None) => tracing::warn!(task_id = %task_id, "Task vanished before external id write"),
                Err(e) => tracing::error!(
                    task_id = %task_id,
                    external_id = %external_id,
                    "Failed to record external id: {}",
                    e
                ),
            }
        }
        Err(e) => {
            metrics::PROVIDER_CALLS
                .with_label_values(&[provider.name(), "error"])
                .inc();
            let reason = e.user_message();
            tracing::warn!(task_id = %task_id, error = %e, "Provider call failed");
            match registry.update(&task_id, |t| t.fail(reason)).await {
                Ok(Some(updated)) => backup.persist(&updated).await,
                Ok(None) => {}
                Err(e) => tracing::warn!(task_id = %task_id, "Could not mark task failed: {}", e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backup::create_backup_system;
    use crate::credits::{InMemoryLedger, UnmeteredLedger};
    use crate::provider::ProviderError;
    use crate::testing::{fixtures, wait_for, wait_for_terminal, MemoryBackupStore, MockProvider};
    use std::time::Duration;

    struct Harness {
        registry: Arc<TaskRegistry>,
        provider: Arc<MockProvider>,
        orchestrator: SubmissionOrchestrator,
    }

    fn harness_with(credits: Arc<dyn CreditLedger>, with_provider: bool) -> Harness {
        let registry = Arc::new(TaskRegistry::new());
        let dedup = Arc::new(DedupCache::new(Duration::from_secs(3600)));
        let (backup, writer) = create_backup_system(
            Arc::new(MemoryBackupStore::new()),
            Duration::from_secs(86400),
            64,
            vec![],
        );
        tokio::spawn(writer.run());
        let provider = Arc::new(MockProvider::new());
        let orchestrator = SubmissionOrchestrator::new(
            registry.clone(),
            dedup,
            backup,
            with_provider.then(|| provider.clone() as Arc<dyn ImageProvider>),
            credits,
            SubmissionSettings::default(),
        );
        Harness {
            registry,
            provider,
            orchestrator,
        }
    }

    fn harness() -> Harness {
        harness_with(Arc::new(UnmeteredLedger), true)
    }

    #[tokio::test]
    async fn test_submit_creates_task_and_records_external_id() {
        let h = harness();
        let outcome = h
            .orchestrator
            .submit("alice", &fixtures::submit_request("a cat"), Some("https://gen.test"))
            .await
            .unwrap();

        assert!(!outcome.duplicate);
        assert_eq!(outcome.status, TaskStatus::Pending);

        let task = wait_for(&h.registry, &outcome.task_id, |t| t.external_id.is_some()).await;
        assert_eq!(task.status, TaskStatus::Processing);
        assert_eq!(task.external_id.as_deref(), Some("mock-ext-1"));
        assert_eq!(
            task.callback_address,
            "https://gen.test/api/v1/webhooks/provider"
        );

        let calls = h.provider.recorded_calls().await;
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].task_id, outcome.task_id);
        assert_eq!(calls[0].prompt, "a cat");
    }

    #[tokio::test]
    async fn test_duplicate_submission_returns_same_task() {
        let h = harness();
        let request = fixtures::submit_request("a cat");

        let first = h.orchestrator.submit("alice", &request, None).await.unwrap();
        let second = h.orchestrator.submit("alice", &request, None).await.unwrap();

        assert!(second.duplicate);
        assert_eq!(first.task_id, second.task_id);
        assert_eq!(h.registry.len().await, 1);

        wait_for(&h.registry, &first.task_id, |t| t.external_id.is_some()).await;
        assert_eq!(h.provider.recorded_calls().await.len(), 1);

        // A different requester is a different submission.
        let other = h.orchestrator.submit("bob", &request, None).await.unwrap();
        assert!(!other.duplicate);
    }

    /// Ledger whose balance lookup takes a while, widening the gap between
    /// claiming a fingerprint and creating the task.
    struct SlowLedger {
        delay: Duration,
        balance: Option<u64>,
    }

    #[async_trait::async_trait]
    impl CreditLedger for SlowLedger {
        async fn balance(&self, _requester: &str) -> Result<Option<u64>, CreditError> {
            tokio::time::sleep(self.delay).await;
            Ok(self.balance)
        }

        async fn deduct(&self, _requester: &str, _amount: u64) -> Result<Option<u64>, CreditError> {
            Ok(self.balance)
        }
    }

    #[tokio::test]
    async fn test_concurrent_identical_submissions_share_one_task() {
        let h = harness_with(
            Arc::new(SlowLedger {
                delay: Duration::from_millis(30),
                balance: None,
            }),
            true,
        );
        let request = fixtures::submit_request("a cat");

        let (first, second) = tokio::join!(
            h.orchestrator.submit("alice", &request, None),
            async {
                tokio::time::sleep(Duration::from_millis(5)).await;
                h.orchestrator.submit("alice", &request, None).await
            }
        );
        let (first, second) = (first.unwrap(), second.unwrap());

        assert!(!first.duplicate);
        assert!(second.duplicate);
        assert_eq!(first.task_id, second.task_id);
        assert_eq!(h.registry.len().await, 1);

        wait_for(&h.registry, &first.task_id, |t| t.external_id.is_some()).await;
        assert_eq!(h.provider.recorded_calls().await.len(), 1);
    }

    #[tokio::test]
    async fn test_waiting_submission_proceeds_when_first_is_rejected() {
        let h = harness_with(
            Arc::new(SlowLedger {
                delay: Duration::from_millis(30),
                balance: Some(0),
            }),
            true,
        );
        let request = fixtures::submit_request("a cat");

        let (first, second) = tokio::join!(
            h.orchestrator.submit("alice", &request, None),
            async {
                tokio::time::sleep(Duration::from_millis(5)).await;
                h.orchestrator.submit("alice", &request, None).await
            }
        );

        // Both are judged on their own balance; neither is a phantom duplicate.
        assert_eq!(first.unwrap_err().status_code(), 402);
        assert_eq!(second.unwrap_err().status_code(), 402);
        assert!(h.registry.is_empty().await);
    }

    #[tokio::test]
    async fn test_validation_error_creates_nothing() {
        let h = harness();
        let request = SubmitRequest {
            output_size: Some("1:1".to_string()),
            ..Default::default()
        };

        let err = h.orchestrator.submit("alice", &request, None).await.unwrap_err();

        assert_eq!(err.status_code(), 422);
        assert!(h.registry.is_empty().await);
    }

    #[tokio::test]
    async fn test_missing_provider_is_500() {
        let h = harness_with(Arc::new(UnmeteredLedger), false);
        let err = h
            .orchestrator
            .submit("alice", &fixtures::submit_request("a cat"), None)
            .await
            .unwrap_err();
        assert!(matches!(err, SubmitError::ProviderNotConfigured));
        assert_eq!(err.status_code(), 500);
        assert!(h.registry.is_empty().await);
    }

    #[tokio::test]
    async fn test_insufficient_credits_before_creation() {
        let h = harness_with(Arc::new(InMemoryLedger::new(0)), true);
        let request = fixtures::submit_request("a cat");

        let err = h.orchestrator.submit("alice", &request, None).await.unwrap_err();

        assert_eq!(err.status_code(), 402);
        assert!(h.registry.is_empty().await);
        assert!(h.provider.recorded_calls().await.is_empty());
    }

    #[tokio::test]
    async fn test_credits_deducted_after_creation() {
        let ledger = Arc::new(InMemoryLedger::new(1));
        let h = harness_with(ledger.clone(), true);

        h.orchestrator
            .submit("alice", &fixtures::submit_request("first"), None)
            .await
            .unwrap();
        assert_eq!(ledger.balance("alice").await, Ok(Some(0)));

        let err = h
            .orchestrator
            .submit("alice", &fixtures::submit_request("second"), None)
            .await
            .unwrap_err();
        assert!(matches!(err, SubmitError::InsufficientCredits { .. }));
    }

    #[tokio::test]
    async fn test_provider_failure_marks_task_failed() {
        let h = harness();
        h.provider
            .set_next_error(ProviderError::Api {
                status: 429,
                message: "slow down".to_string(),
            })
            .await;

        let outcome = h
            .orchestrator
            .submit("alice", &fixtures::submit_request("a cat"), None)
            .await
            .unwrap();

        let task = wait_for_terminal(&h.registry, &outcome.task_id).await;
        assert_eq!(task.status, TaskStatus::Failed);
        assert!(task.error_detail.unwrap().contains("Rate limit exceeded"));
        assert!(task.external_id.is_none());
    }

    #[tokio::test]
    async fn test_callback_override_and_public_url() {
        let h = harness();
        let mut request = fixtures::submit_request("a cat");
        request.callback_override = Some("https://hooks.example.com/cb".to_string());

        let outcome = h.orchestrator.submit("alice", &request, None).await.unwrap();
        let task = h.registry.get(&outcome.task_id).await.unwrap();
        assert_eq!(task.callback_address, "https://hooks.example.com/cb");

        let orchestrator = SubmissionOrchestrator {
            settings: SubmissionSettings {
                public_url: Some("https://public.example.com/".to_string()),
                ..Default::default()
            },
            ..h.orchestrator
        };
        assert_eq!(
            orchestrator.callback_address(Some("http://internal:8080")),
            "https://public.example.com/api/v1/webhooks/provider"
        );
    }
}

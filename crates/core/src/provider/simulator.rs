//! In-process stand-in for the provider, used when no API key is configured
//! and test mode is allowed.

use async_trait::async_trait;
use serde_json::json;
use std::time::Duration;

use super::{ImageProvider, ProviderError, ProviderRequest, ProviderSubmission};
use crate::reconciler::{WebhookDelivery, WebhookReconciler, SUCCESS_CODE};

/// Accepts every job and, after a delay, feeds a canned success callback to
/// the reconciler as if the provider had called the webhook.
pub struct SimulatedProvider {
    reconciler: WebhookReconciler,
    delay: Duration,
    result_base: String,
}

impl SimulatedProvider {
    pub fn new(reconciler: WebhookReconciler, delay: Duration) -> Self {
        Self {
            reconciler,
            delay,
            result_base: "https://storage.example.com".to_string(),
        }
    }

    pub fn with_result_base(mut self, result_base: impl Into<String>) -> Self {
        self.result_base = result_base.into();
        self
    }

    fn result_urls(&self, request: &ProviderRequest) -> Vec<String> {
        let prefix = request
            .style
            .map(|s| format!("{}-style", s))
            .unwrap_or_else(|| "custom".to_string());
        (1..=request.variant_count.max(1))
            .map(|i| {
                format!(
                    "{}/test-{}-sticker-{}-{}.png",
                    self.result_base, prefix, request.task_id, i
                )
            })
            .collect()
    }
}

#[async_trait]
impl ImageProvider for SimulatedProvider {
    fn name(&self) -> &str {
        "simulator"
    }

    async fn submit(&self, request: &ProviderRequest) -> Result<ProviderSubmission, ProviderError> {
        let external_id = format!("sim_{}", uuid::Uuid::new_v4().simple());
        let urls = self.result_urls(request);

        let delivery = WebhookDelivery {
            external_id: external_id.clone(),
            result_code: SUCCESS_CODE,
            message: Some("success".to_string()),
            payload: json!({
                "code": SUCCESS_CODE,
                "msg": "success",
                "data": {"taskId": external_id, "info": {"result_urls": urls}},
            }),
            result_references: urls,
        };

        let reconciler = self.reconciler.clone();
        let delay = self.delay;
        tracing::debug!(
            task_id = %request.task_id,
            external_id = %external_id,
            delay_ms = delay.as_millis() as u64,
            "Simulating provider callback"
        );
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let outcome = reconciler.reconcile(delivery).await;
            tracing::debug!(outcome = outcome.label(), "Simulated callback reconciled");
        });

        Ok(ProviderSubmission { external_id })
    }
}

use async_trait::async_trait;
use std::time::Duration;

use crate::styles::Style;
use crate::task::{OutputSize, Task};

/// Error from a provider submit call.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("Request timeout after {0:?}")]
    Timeout(Duration),

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("API error: {status} - {message}")]
    Api { status: u16, message: String },

    #[error("JSON error: {0}")]
    Json(String),

    #[error("No task id returned by provider")]
    MissingTaskId,

    #[error("Not configured")]
    NotConfigured,
}

impl ProviderError {
    /// Message stored on the failed task, classified so callers see a
    /// consistent reason regardless of how the provider phrased it.
    pub fn user_message(&self) -> String {
        let reason = match self {
            ProviderError::Timeout(_) => Some(TIMEOUT),
            ProviderError::Api { status: 404, .. } => Some(NOT_FOUND),
            ProviderError::Api { status: 401, .. } => Some(AUTH),
            ProviderError::Api { status: 429, .. } => Some(RATE_LIMIT),
            ProviderError::Api { status: 402, .. } => Some(CREDITS),
            ProviderError::NotConfigured => Some(NOT_CONFIGURED),
            _ => None,
        };

        let reason = reason
            .or_else(|| classify_text(&self.to_string()))
            .map(str::to_string)
            .unwrap_or_else(|| match self {
                ProviderError::Api { message, .. } => message.clone(),
                other => other.to_string(),
            });

        format!("Provider call failed: {}", reason)
    }
}

const TIMEOUT: &str =
    "Request timeout. The generation is taking longer than expected, please retry later.";
const NOT_FOUND: &str = "Task not found. The task may have expired or its id is invalid.";
const AUTH: &str = "Authentication failed. Please check the provider API key.";
const RATE_LIMIT: &str = "Rate limit exceeded. Please try again later.";
const CREDITS: &str = "Insufficient credits on the provider account.";
const NOT_CONFIGURED: &str = "No image provider is configured.";

fn classify_text(text: &str) -> Option<&'static str> {
    let text = text.to_lowercase();
    if text.contains("timeout") || text.contains("timed out") {
        Some(TIMEOUT)
    } else if text.contains("404") {
        Some(NOT_FOUND)
    } else if text.contains("401") || text.contains("authentication") {
        Some(AUTH)
    } else if text.contains("429") || text.contains("rate limit") {
        Some(RATE_LIMIT)
    } else if text.contains("402") || text.contains("credits") {
        Some(CREDITS)
    } else {
        None
    }
}

/// Everything the provider needs to start one generation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderRequest {
    pub task_id: String,
    pub prompt: String,
    pub source_references: Vec<String>,
    pub mask_reference: Option<String>,
    pub output_size: OutputSize,
    pub variant_count: u32,
    pub callback_address: String,
    pub style: Option<Style>,
}

impl From<&Task> for ProviderRequest {
    fn from(task: &Task) -> Self {
        Self {
            task_id: task.id.clone(),
            prompt: task.input.provider_prompt.clone(),
            source_references: task.input.source_references.clone(),
            mask_reference: task.input.mask_reference.clone(),
            output_size: task.input.output_size,
            variant_count: task.input.variant_count,
            callback_address: task.callback_address.clone(),
            style: task.input.style,
        }
    }
}

/// Provider acknowledgement of a submitted job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderSubmission {
    pub external_id: String,
}

/// A service that generates images and reports back through a webhook.
#[async_trait]
pub trait ImageProvider: Send + Sync {
    /// Provider name for logs and metrics.
    fn name(&self) -> &str;

    /// Start a generation. Returns as soon as the provider accepted the job;
    /// results arrive later on `request.callback_address`.
    async fn submit(&self, request: &ProviderRequest) -> Result<ProviderSubmission, ProviderError>;
}

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Result code the provider uses for a successful generation.
pub const SUCCESS_CODE: i64 = 200;

/// Failure reason for a success callback that carried no results.
pub const EMPTY_RESULT_MESSAGE: &str = "Task completed but no images received";

/// Callback body as sent by the provider.
///
/// Both the documented field names and the provider's short names
/// (`code`, `msg`, `taskId`) are accepted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderWebhook {
    #[serde(rename = "statusCode", alias = "code")]
    pub status_code: i64,
    #[serde(default, alias = "msg", skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default)]
    pub data: WebhookData,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WebhookData {
    #[serde(
        rename = "externalId",
        alias = "taskId",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub external_id: Option<String>,
    #[serde(default)]
    pub info: WebhookInfo,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WebhookInfo {
    #[serde(default, alias = "resultUrls")]
    pub result_urls: Vec<String>,
}

#[derive(Debug, Error)]
pub enum WebhookParseError {
    #[error("Body is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Callback has no external id")]
    MissingExternalId,
}

/// A parsed callback, ready for reconciliation.
#[derive(Debug, Clone, PartialEq)]
pub struct WebhookDelivery {
    pub external_id: String,
    pub result_code: i64,
    pub message: Option<String>,
    pub result_references: Vec<String>,
    /// The body as received, kept for orphan diagnostics.
    pub payload: Value,
}

impl WebhookDelivery {
    /// Parse a raw callback body.
    pub fn from_slice(body: &[u8]) -> Result<Self, WebhookParseError> {
        let payload: Value = serde_json::from_slice(body)?;
        let webhook: ProviderWebhook = serde_json::from_value(payload.clone())?;
        Self::from_webhook(webhook, payload)
    }

    pub fn from_webhook(webhook: ProviderWebhook, payload: Value) -> Result<Self, WebhookParseError> {
        let external_id = webhook
            .data
            .external_id
            .filter(|id| !id.trim().is_empty())
            .ok_or(WebhookParseError::MissingExternalId)?;

        Ok(Self {
            external_id,
            result_code: webhook.status_code,
            message: webhook.message,
            result_references: webhook.data.info.result_urls,
            payload,
        })
    }

    pub fn is_success(&self) -> bool {
        self.result_code == SUCCESS_CODE
    }
}

/// Failure reason for a non-success result code.
pub fn failure_message(code: i64, provider_message: Option<&str>) -> String {
    match code {
        400 => "content violated policy or invalid parameters".to_string(),
        451 => "failed to download source image".to_string(),
        500 => "server error, retry".to_string(),
        _ => provider_message
            .filter(|m| !m.trim().is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| format!("generation failed with code {}", code)),
    }
}

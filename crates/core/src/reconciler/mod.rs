//! Matching provider webhooks to tasks.

mod runner;
mod webhook;

pub use runner::{ReconcileOutcome, ReconcileSettings, WebhookReconciler};
pub use webhook::{
    failure_message, ProviderWebhook, WebhookData, WebhookDelivery, WebhookInfo,
    WebhookParseError, EMPTY_RESULT_MESSAGE, SUCCESS_CODE,
};

//! Provider callback endpoint.
//!
//! Always acknowledges with `200 {"status":"received"}` so the provider does
//! not retry; reconciliation happens in the background.

use axum::{body::Bytes, extract::State, Json};
use serde::Serialize;
use std::sync::Arc;
use tracing::warn;

use genqueue_core::metrics::WEBHOOK_OUTCOMES;

use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct WebhookAck {
    pub status: &'static str,
}

pub async fn provider_webhook(State(state): State<Arc<AppState>>, body: Bytes) -> Json<WebhookAck> {
    if let Err(e) = state.service().accept_webhook(&body) {
        WEBHOOK_OUTCOMES.with_label_values(&["malformed"]).inc();
        warn!(bytes = body.len(), "Ignoring malformed webhook: {}", e);
    }

    Json(WebhookAck { status: "received" })
}

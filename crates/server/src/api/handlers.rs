use axum::{
    extract::State,
    http::{header, StatusCode},
    response::IntoResponse,
    Json,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;

use genqueue_core::{
    styles::{self, StyleDefinition},
    OrphanResult, SanitizedConfig, ServiceStats,
};

use crate::metrics::{collect_dynamic_metrics, encode_metrics};
use crate::state::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
}

pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
    })
}

pub async fn get_config(State(state): State<Arc<AppState>>) -> Json<SanitizedConfig> {
    Json(state.sanitized_config())
}

#[derive(Serialize)]
pub struct StatusResponse {
    pub version: &'static str,
    pub started_at: DateTime<Utc>,
    #[serde(flatten)]
    pub stats: ServiceStats,
}

pub async fn get_status(State(state): State<Arc<AppState>>) -> Json<StatusResponse> {
    Json(StatusResponse {
        version: env!("CARGO_PKG_VERSION"),
        started_at: state.started_at(),
        stats: state.service().stats().await,
    })
}

#[derive(Serialize)]
pub struct StylesResponse {
    pub styles: Vec<StyleDefinition>,
}

pub async fn list_styles() -> Json<StylesResponse> {
    Json(StylesResponse {
        styles: styles::catalog(),
    })
}

#[derive(Serialize)]
pub struct OrphansResponse {
    pub orphans: Vec<OrphanResult>,
    pub total: usize,
}

/// Unmatched webhook results, for diagnostics.
pub async fn list_orphans(State(state): State<Arc<AppState>>) -> Json<OrphansResponse> {
    let orphans = state.service().orphans().await;
    Json(OrphansResponse {
        total: orphans.len(),
        orphans,
    })
}

/// Prometheus text exposition.
pub async fn get_metrics(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    collect_dynamic_metrics(&state).await;
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        encode_metrics(),
    )
}

//! Generation API handlers: submit and poll.

use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        Path, Query, State,
    },
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, warn};

use genqueue_core::{ResponseShape, SubmitError, SubmitOutcome, SubmitRequest};

use super::envelope::{ApiError, Envelope};
use super::middleware::AuthUser;
use crate::state::AppState;

// ============================================================================
// Request Types
// ============================================================================

/// Query parameters for polling by path.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PollParams {
    #[serde(default)]
    pub response_shape: ResponseShape,
}

/// Query parameters for polling with `?taskId=`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PollQuery {
    pub task_id: Option<String>,
    #[serde(default)]
    pub response_shape: ResponseShape,
}

// ============================================================================
// Handlers
// ============================================================================

/// Accept a generation request.
pub async fn submit(
    State(state): State<Arc<AppState>>,
    AuthUser(requester): AuthUser,
    headers: HeaderMap,
    body: Result<Json<SubmitRequest>, JsonRejection>,
) -> Result<Envelope<SubmitOutcome>, ApiError> {
    let Json(request) = body.map_err(|e| {
        debug!("Rejected generation body: {}", e);
        ApiError::bad_request(format!("Malformed request body: {}", e.body_text()))
    })?;

    let origin = request_origin(&headers);
    let outcome = state
        .service()
        .submit(&requester, &request, origin.as_deref())
        .await
        .map_err(submit_error)?;

    let message = if outcome.duplicate {
        "Task already exists"
    } else {
        "Task created"
    };
    Ok(Envelope::ok(message, outcome))
}

/// `GET /generations/{task_id}`
pub async fn get_generation(
    State(state): State<Arc<AppState>>,
    Path(task_id): Path<String>,
    params: Result<Query<PollParams>, QueryRejection>,
) -> Result<Response, ApiError> {
    let Query(params) = params.map_err(|e| ApiError::bad_request(e.body_text()))?;
    poll(&state, &task_id, params.response_shape).await
}

/// `GET /generations?taskId=...`
pub async fn query_generation(
    State(state): State<Arc<AppState>>,
    params: Result<Query<PollQuery>, QueryRejection>,
) -> Result<Response, ApiError> {
    let Query(params) = params.map_err(|e| ApiError::bad_request(e.body_text()))?;
    let task_id = params
        .task_id
        .filter(|id| !id.trim().is_empty())
        .ok_or_else(|| ApiError::bad_request("Task ID required"))?;
    poll(&state, &task_id, params.response_shape).await
}

async fn poll(state: &AppState, task_id: &str, shape: ResponseShape) -> Result<Response, ApiError> {
    let projection = state
        .service()
        .project(task_id, shape)
        .await
        .ok_or_else(|| ApiError::not_found("Task not found"))?;

    let mut response = Envelope::ok("ok", projection.view).into_response();
    if let Ok(value) = HeaderValue::from_str(&projection.cache.header_value()) {
        response.headers_mut().insert(header::CACHE_CONTROL, value);
    }
    Ok(response)
}

// ============================================================================
// Helpers
// ============================================================================

fn submit_error(err: SubmitError) -> ApiError {
    let status =
        StatusCode::from_u16(err.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    if status.is_server_error() {
        warn!("Submission failed: {}", err);
    }
    ApiError::new(status, err.to_string())
}

/// `scheme://host` the caller reached us on, used to build callback
/// addresses when no public URL is configured.
fn request_origin(headers: &HeaderMap) -> Option<String> {
    let host = headers
        .get("x-forwarded-host")
        .or_else(|| headers.get(header::HOST))
        .and_then(|v| v.to_str().ok())?;
    let scheme = headers
        .get("x-forwarded-proto")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("http");
    Some(format!("{}://{}", scheme, host))
}

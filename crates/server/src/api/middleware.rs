//! Authentication and metrics middleware for API routes.

use axum::{
    body::Body,
    extract::{ConnectInfo, FromRequestParts, MatchedPath, State},
    http::{request::Parts, Request},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use genqueue_core::{AuthError, Credentials, Identity};

use super::envelope::ApiError;
use crate::metrics::{
    normalize_path, AUTH_FAILURES_TOTAL, HTTP_REQUESTS_IN_FLIGHT, HTTP_REQUESTS_TOTAL,
    HTTP_REQUEST_DURATION,
};
use crate::state::AppState;

/// Records duration, count and in-flight gauge per route.
///
/// The label is the matched route template when the router resolved one,
/// otherwise the raw path with ids collapsed.
pub async fn metrics_middleware(request: Request<Body>, next: Next) -> Response {
    let method = request.method().clone();
    let route = match request.extensions().get::<MatchedPath>() {
        Some(matched) => matched.as_str().to_string(),
        None => normalize_path(request.uri().path()),
    };

    let started = Instant::now();
    HTTP_REQUESTS_IN_FLIGHT.inc();
    let response = next.run(request).await;
    HTTP_REQUESTS_IN_FLIGHT.dec();

    let status = response.status();
    let labels = [method.as_str(), route.as_str(), status.as_str()];
    HTTP_REQUEST_DURATION
        .with_label_values(&labels)
        .observe(started.elapsed().as_secs_f64());
    HTTP_REQUESTS_TOTAL.with_label_values(&labels).inc();

    response
}

/// Authentication middleware.
///
/// Inserts the caller's [`Identity`] into the request extensions, or answers
/// with a `401` envelope.
pub async fn auth_middleware(
    State(state): State<Arc<AppState>>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    let source_ip = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip());

    let credentials = Credentials::from_headers(
        request
            .headers()
            .iter()
            .filter_map(|(name, value)| value.to_str().ok().map(|v| (name.as_str(), v))),
        source_ip,
    );

    match state.authenticator().authenticate(&credentials).await {
        Ok(identity) => {
            request.extensions_mut().insert(identity);
            next.run(request).await
        }
        Err(AuthError::MissingCredentials) => {
            AUTH_FAILURES_TOTAL.with_label_values(&["missing"]).inc();
            ApiError::unauthorized().into_response()
        }
        Err(AuthError::Rejected) => {
            AUTH_FAILURES_TOTAL.with_label_values(&["rejected"]).inc();
            ApiError::unauthorized().into_response()
        }
        Err(e) => {
            AUTH_FAILURES_TOTAL.with_label_values(&["internal_error"]).inc();
            tracing::error!("Authenticator failure: {}", e);
            ApiError::new(
                axum::http::StatusCode::INTERNAL_SERVER_ERROR,
                "Authentication unavailable",
            )
            .into_response()
        }
    }
}

/// Extractor for the authenticated requester id.
///
/// Falls back to "anonymous" when no identity was inserted.
#[derive(Debug, Clone)]
pub struct AuthUser(pub String);

impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    fn from_request_parts(
        parts: &mut Parts,
        _state: &S,
    ) -> impl Future<Output = Result<Self, Self::Rejection>> + Send {
        let requester = parts
            .extensions
            .get::<Identity>()
            .map(|id| id.requester.clone())
            .unwrap_or_else(|| "anonymous".to_string());
        std::future::ready(Ok(AuthUser(requester)))
    }
}

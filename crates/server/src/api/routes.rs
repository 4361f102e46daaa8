use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use super::{generations, handlers, middleware as mw, webhooks};
use crate::state::AppState;

pub fn create_router(state: Arc<AppState>) -> Router {
    // Authenticated API routes
    let protected = Router::new()
        .route(
            "/generations",
            post(generations::submit).get(generations::query_generation),
        )
        .route("/generations/{task_id}", get(generations::get_generation))
        .route("/orphans", get(handlers::list_orphans))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            mw::auth_middleware,
        ));

    // Open routes
    let open = Router::new()
        .route("/health", get(handlers::health))
        .route("/config", get(handlers::get_config))
        .route("/status", get(handlers::get_status))
        .route("/styles", get(handlers::list_styles));

    // Provider callbacks: unauthenticated, path taken from config
    let webhook_path = state.config().provider.webhook_path.clone();

    Router::new()
        .nest("/api/v1", protected.merge(open))
        .route(&webhook_path, post(webhooks::provider_webhook))
        .route("/metrics", get(handlers::get_metrics))
        .with_state(state)
        .layer(middleware::from_fn(mw::metrics_middleware))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

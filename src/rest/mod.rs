pub mod handlers;

use axum::routing::{get, post};
use axum::Router;

use crate::state::AppState;

/// Builds the REST router: the public health endpoints plus the
/// role-scoped quality/cleanup/analytics/task surface described for the
/// REST adapter.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(handlers::root))
        .route("/health", get(handlers::health))
        .route(
            "/api/v1/quality/guard-rails",
            post(handlers::run_guard_rails),
        )
        .route("/api/v1/cleanup", post(handlers::run_cleanup))
        .route(
            "/api/v1/analytics/rankings",
            get(handlers::analytics_rankings),
        )
        .route(
            "/api/v1/analytics/ingest",
            post(handlers::analytics_ingest),
        )
        .route("/api/v1/tasks/:id", get(handlers::task_status))
        .route("/api/v1/tasks/:id/stream", get(handlers::task_stream))
        .with_state(state)
}

//! HTTP router construction.

use std::sync::Arc;

use axum::routing::get;
use axum::Router;
use tower_http::cors::CorsLayer;

use crate::api;
use crate::state::AppState;

/// Assemble all routes and middleware into a single `Router`.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(api::health::health))
        .route("/metrics", get(api::health::metrics))
        .route(
            "/api/v1/tasks",
            get(api::tasks::list_tasks).post(api::tasks::create_task),
        )
        .route(
            "/api/v1/tasks/{task_id}",
            get(api::tasks::get_task).delete(api::tasks::remove_task),
        )
        .route(
            "/api/v1/devices/{device_id}/tasks",
            get(api::tasks::list_device_tasks),
        )
        .layer(CorsLayer::permissive())
        .with_state(state)
}

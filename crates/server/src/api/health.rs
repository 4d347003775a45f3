//! Liveness and metrics endpoints.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use serde::Serialize;

use crate::state::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub uptime_seconds: u64,
}

pub async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        uptime_seconds: state.started_at.elapsed().as_secs(),
    })
}

pub async fn metrics(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    let m = &state.metrics;
    Json(serde_json::json!({
        "create_task_responses": m.create_task_responses.load(Ordering::Relaxed),
        "create_task_bad_requests": m.create_task_bad_requests.load(Ordering::Relaxed),
        "create_task_internal_errors": m.create_task_internal_errors.load(Ordering::Relaxed),
        "get_task_responses": m.get_task_responses.load(Ordering::Relaxed),
        "get_task_not_found": m.get_task_not_found.load(Ordering::Relaxed),
        "list_tasks_responses": m.list_tasks_responses.load(Ordering::Relaxed),
        "remove_task_responses": m.remove_task_responses.load(Ordering::Relaxed),
        "unauthorized_requests": m.unauthorized_requests.load(Ordering::Relaxed),
        "uptime_seconds": state.started_at.elapsed().as_secs(),
    }))
}

//! Task CRUD handlers.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::Json;
use serde::Deserialize;
use tracing::error;
use uuid::Uuid;

use fahrplan_core::RequestSource;
use fahrplan_scheduler::wire::{decode_envelope, CreateTaskRequest, CreateTaskResponse};
use fahrplan_scheduler::SchedulerError;
use fahrplan_store::{Consignment, StoreError, Task};

use super::{bad_request, error_response, internal_error, require_app_token, ApiError};
use crate::state::AppState;

const CONTENT_TYPE_MSGPACK: &str = "application/msgpack";

/// Create scheduled task(s) from a binary envelope.
pub async fn create_task(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<(StatusCode, Json<CreateTaskResponse>), ApiError> {
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    if content_type != CONTENT_TYPE_MSGPACK {
        state
            .metrics
            .create_task_bad_requests
            .fetch_add(1, Ordering::Relaxed);
        return Err(error_response(
            StatusCode::UNSUPPORTED_MEDIA_TYPE,
            "request body must be application/msgpack",
        ));
    }

    require_app_token(&state, &headers).await?;

    let request: CreateTaskRequest = decode_envelope(&body).map_err(|err| {
        error!(error = %err, "failed to unmarshal request received at scheduler REST endpoint");
        state
            .metrics
            .create_task_bad_requests
            .fetch_add(1, Ordering::Relaxed);
        bad_request("failed to parse the request body")
    })?;

    match state
        .engine
        .handle_schedule_request(request, RequestSource::Rest)
        .await
    {
        Ok(response) => {
            state
                .metrics
                .create_task_responses
                .fetch_add(1, Ordering::Relaxed);
            Ok((StatusCode::CREATED, Json(response)))
        }
        Err(err) => {
            error!(error = %err, "failed to create a new scheduled task");
            match err {
                SchedulerError::InvalidRequest
                | SchedulerError::Schedule(_)
                | SchedulerError::Store(StoreError::InvalidRequest) => {
                    state
                        .metrics
                        .create_task_bad_requests
                        .fetch_add(1, Ordering::Relaxed);
                    Err(bad_request("invalid scheduling request"))
                }
                _ => {
                    state
                        .metrics
                        .create_task_internal_errors
                        .fetch_add(1, Ordering::Relaxed);
                    Err(internal_error())
                }
            }
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct DeviceQuery {
    pub device_id: String,
}

/// Get one task by ID.
pub async fn get_task(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(task_id): Path<String>,
    Query(query): Query<DeviceQuery>,
) -> Result<Json<Task>, ApiError> {
    require_app_token(&state, &headers).await?;
    let (task_id, device_id) = parse_task_ids(&task_id, &query.device_id)?;

    match state.store.get_task(task_id, device_id).await {
        Ok(task) => {
            state
                .metrics
                .get_task_responses
                .fetch_add(1, Ordering::Relaxed);
            Ok(Json(task))
        }
        Err(StoreError::NotFound) => {
            state
                .metrics
                .get_task_not_found
                .fetch_add(1, Ordering::Relaxed);
            Err(error_response(StatusCode::NOT_FOUND, "task not found"))
        }
        Err(err) => {
            error!(error = %err, "failed to retrieve task");
            Err(internal_error())
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ConsignmentQuery {
    pub tenant_id: String,
    pub consignment_id: String,
    /// Task ID of the last row of the previous page.
    pub cursor: Option<Uuid>,
    pub page_size: Option<i64>,
}

#[derive(Debug, serde::Serialize)]
pub struct ConsignmentListResponse {
    pub tasks: Vec<Consignment>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<Uuid>,
}

/// List the tasks fanned out from one consignment, one page at a time.
pub async fn list_tasks(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<ConsignmentQuery>,
) -> Result<Json<ConsignmentListResponse>, ApiError> {
    require_app_token(&state, &headers).await?;

    if query.tenant_id.is_empty() || query.consignment_id.is_empty() {
        return Err(bad_request("tenant_id and consignment_id are required"));
    }

    match state
        .store
        .get_tasks_for_consignment(
            &query.tenant_id,
            &query.consignment_id,
            query.cursor,
            query.page_size.unwrap_or(0),
        )
        .await
    {
        Ok((tasks, next_cursor)) => {
            state
                .metrics
                .list_tasks_responses
                .fetch_add(1, Ordering::Relaxed);
            Ok(Json(ConsignmentListResponse { tasks, next_cursor }))
        }
        Err(StoreError::InvalidRequest) => Err(bad_request("invalid consignment parameters")),
        Err(err) => {
            error!(error = %err, "failed to list tasks for consignment");
            Err(internal_error())
        }
    }
}

/// Remove one task. Deleting an absent task succeeds.
pub async fn remove_task(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(task_id): Path<String>,
    Query(query): Query<DeviceQuery>,
) -> Result<StatusCode, ApiError> {
    require_app_token(&state, &headers).await?;
    let (task_id, device_id) = parse_task_ids(&task_id, &query.device_id)?;

    match state.store.remove_task(task_id, device_id).await {
        Ok(()) => {
            state
                .metrics
                .remove_task_responses
                .fetch_add(1, Ordering::Relaxed);
            Ok(StatusCode::OK)
        }
        Err(err) => {
            error!(error = %err, "failed to remove task");
            Err(internal_error())
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct DeviceTasksQuery {
    /// Task ID of the last row of the previous page.
    pub cursor: Option<Uuid>,
}

#[derive(Debug, serde::Serialize)]
pub struct DeviceTasksResponse {
    pub tasks: Vec<Task>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<Uuid>,
}

/// Operator listing of every task targeting one device, page by page.
pub async fn list_device_tasks(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(device_id): Path<String>,
    Query(query): Query<DeviceTasksQuery>,
) -> Result<Json<DeviceTasksResponse>, ApiError> {
    require_app_token(&state, &headers).await?;
    let device_id =
        Uuid::parse_str(&device_id).map_err(|_| bad_request("device_id must be a valid UUID"))?;

    match state
        .store
        .get_tasks_for_device(device_id, query.cursor)
        .await
    {
        Ok((tasks, next_cursor)) => {
            state
                .metrics
                .list_tasks_responses
                .fetch_add(1, Ordering::Relaxed);
            Ok(Json(DeviceTasksResponse { tasks, next_cursor }))
        }
        Err(err) => {
            error!(error = %err, "failed to list tasks for device");
            Err(internal_error())
        }
    }
}

fn parse_task_ids(task_id: &str, device_id: &str) -> Result<(Uuid, Uuid), ApiError> {
    let task_id =
        Uuid::parse_str(task_id).map_err(|_| bad_request("task_id must be a valid UUID"))?;
    let device_id =
        Uuid::parse_str(device_id).map_err(|_| bad_request("device_id must be a valid UUID"))?;
    Ok((task_id, device_id))
}

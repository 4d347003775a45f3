//! REST request handlers.

pub mod health;
pub mod tasks;

use std::sync::atomic::Ordering;
use std::sync::Arc;

use axum::http::{header, HeaderMap, StatusCode};
use axum::Json;
use serde::Serialize;

use crate::state::AppState;

/// JSON error body returned for 4xx/5xx responses.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub code: u16,
    pub reason: &'static str,
}

pub type ApiError = (StatusCode, Json<ErrorResponse>);

pub fn error_response(status: StatusCode, reason: &'static str) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            code: status.as_u16(),
            reason,
        }),
    )
}

pub fn bad_request(reason: &'static str) -> ApiError {
    error_response(StatusCode::BAD_REQUEST, reason)
}

pub fn internal_error() -> ApiError {
    error_response(StatusCode::INTERNAL_SERVER_ERROR, "internal server error")
}

/// Enforce the bearer app token on /api/v1 routes when authentication is
/// enabled.
pub async fn require_app_token(state: &Arc<AppState>, headers: &HeaderMap) -> Result<(), ApiError> {
    if !state.api_authn_enabled {
        return Ok(());
    }

    let token = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .unwrap_or("");

    if token.is_empty() || state.verifier.validate_app_token(token).await.is_err() {
        state
            .metrics
            .unauthorized_requests
            .fetch_add(1, Ordering::Relaxed);
        return Err(error_response(
            StatusCode::UNAUTHORIZED,
            "invalid app access token",
        ));
    }
    Ok(())
}

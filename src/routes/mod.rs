//! REST API route handlers.

pub mod git_changes;
pub mod health;
pub mod logs;
pub mod profiles;
pub mod sessions;

use axum::http::StatusCode;
use axum::Json;
use serde_json::{json, Value};

/// Error shape shared by every handler: an HTTP status plus a `detail` body.
pub type ApiError = (StatusCode, Json<Value>);

pub(crate) fn not_found(detail: &str) -> ApiError {
    (StatusCode::NOT_FOUND, Json(json!({ "detail": detail })))
}

pub(crate) fn bad_request(detail: &str) -> ApiError {
    (StatusCode::BAD_REQUEST, Json(json!({ "detail": detail })))
}

pub(crate) fn internal(e: impl std::fmt::Display) -> ApiError {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({ "detail": e.to_string() })),
    )
}

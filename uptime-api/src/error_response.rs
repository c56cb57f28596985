//! Maps `UptimeError` to an HTTP response. This is the one place a status
//! code is chosen — no component below it inspects `UptimeError::kind()`
//! (spec.md §7's propagation policy).

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use tracing::error;
use uptime_core::UptimeError;

pub struct ApiError(pub UptimeError);

impl From<UptimeError> for ApiError {
    fn from(err: UptimeError) -> Self {
        ApiError(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, kind) = match &self.0 {
            UptimeError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
            UptimeError::AlreadyPaused(_) => (StatusCode::CONFLICT, "already_paused"),
            UptimeError::AlreadyActive(_) => (StatusCode::CONFLICT, "already_active"),
            UptimeError::Validation(_) => (StatusCode::BAD_REQUEST, "validation_error"),
            UptimeError::Unauthorized(_) => (StatusCode::FORBIDDEN, "unauthorized"),
            UptimeError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal"),
        };

        if matches!(self.0, UptimeError::Internal(_)) {
            error!(error = %self.0, "internal error reaching API boundary");
        }

        let message = match &self.0 {
            // Full detail is logged above; callers get a generic message.
            UptimeError::Internal(_) => "an internal error occurred".to_string(),
            other => other.to_string(),
        };

        (status, Json(json!({ "error": kind, "message": message }))).into_response()
    }
}

//! HTTP surface.
//!
//! Every failure leaves as `{ "error": <message>, "code": <reason> }` with a
//! status derived from [`PlatformError::reason`].

pub mod routes;

pub use routes::router;

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

use crate::core::PlatformError;

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

#[derive(Debug)]
pub enum WebError {
    Platform(PlatformError),
    Input(String),
    NotFound(String),
}

impl From<PlatformError> for WebError {
    fn from(err: PlatformError) -> Self {
        WebError::Platform(err)
    }
}

/// HTTP status for a platform failure.
pub fn status_for(err: &PlatformError) -> StatusCode {
    match err.reason() {
        "unknown_model" | "not_found" | "workflow_not_found" => StatusCode::NOT_FOUND,
        "duplicate_key" | "schema_migration" => StatusCode::CONFLICT,
        "invalid_key" | "expression_error" | "type_error" | "serialization_error" => {
            StatusCode::BAD_REQUEST
        }
        "schema_validation" | "record_validation" | "workflow_validation" | "rule_failure"
        | "step_execution" => StatusCode::UNPROCESSABLE_ENTITY,
        "notification_error" | "event_delivery" => StatusCode::BAD_GATEWAY,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for WebError {
    fn into_response(self) -> Response {
        let (status, message, code) = match self {
            WebError::Platform(err) => {
                let status = status_for(&err);
                if status.is_server_error() {
                    log::warn!("Request failed: {}", err);
                }
                (status, err.to_string(), err.reason().to_string())
            }
            WebError::Input(msg) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                msg,
                "input_error".to_string(),
            ),
            WebError::NotFound(msg) => (StatusCode::NOT_FOUND, msg, "not_found".to_string()),
        };

        let body = Json(ErrorResponse {
            error: message,
            code,
        });

        (status, body).into_response()
    }
}

pub type Result<T> = std::result::Result<T, WebError>;

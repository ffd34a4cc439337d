//! API error types and JSON error response formatting.
//!
//! ApiError gives every endpoint the same `{error, message}` body and maps
//! pipeline errors onto HTTP status codes.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};

use clarity_core::error::ClarityError;

/// JSON error response body.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Machine-readable error code (e.g., "bad_request", "conflict").
    pub error: String,
    pub message: String,
}

#[derive(Debug)]
pub enum ApiError {
    /// 400 - invalid parameters or configuration.
    BadRequest(String),
    /// 404
    NotFound(String),
    /// 409 - e.g. starting while already recording.
    Conflict(String),
    /// 502 - the remote vision service failed.
    BadGateway(String),
    /// 500
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_code, message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "bad_request", msg),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, "not_found", msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, "conflict", msg),
            ApiError::BadGateway(msg) => (StatusCode::BAD_GATEWAY, "remote_failure", msg),
            ApiError::Internal(msg) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "internal_error", msg)
            }
        };

        if status.is_server_error() {
            tracing::warn!(status = status.as_u16(), %message, "Request failed");
        }

        let body = ErrorBody {
            error: error_code.to_string(),
            message,
        };
        (status, Json(body)).into_response()
    }
}

impl From<ClarityError> for ApiError {
    fn from(err: ClarityError) -> Self {
        match err {
            ClarityError::Config(msg) => ApiError::BadRequest(msg),
            ClarityError::Conflict(msg) => ApiError::Conflict(msg),
            ClarityError::Remote(failure) => ApiError::BadGateway(format!(
                "{}: {}",
                failure.kind_code(),
                failure
            )),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

//! HTTP error types for the `credvault` server.
//!
//! Maps [`CredentialError`] into HTTP responses. Every error produces a JSON
//! body with a machine-readable `error` field and a human-readable `message`.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use tracing::error;

use credvault_core::{CredentialError, ErrorKind};

/// Application-level error returned from HTTP handlers.
#[derive(Debug)]
pub enum AppError {
    /// No actor identity on the request.
    Unauthorized(String),
    /// Client sent invalid input that never reached the services.
    BadRequest(String),
    /// A service call failed.
    Service(CredentialError),
}

/// JSON error response body.
#[derive(Serialize)]
struct ErrorBody {
    error: &'static str,
    message: String,
}

impl AppError {
    fn parts(self) -> (StatusCode, &'static str, String) {
        match self {
            Self::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, "unauthorized", msg),
            Self::BadRequest(msg) => (StatusCode::BAD_REQUEST, "bad_request", msg),
            Self::Service(err) => match err.kind() {
                ErrorKind::NotFound => (StatusCode::NOT_FOUND, "not_found", err.to_string()),
                ErrorKind::Forbidden => (StatusCode::FORBIDDEN, "forbidden", err.to_string()),
                ErrorKind::Validation => (StatusCode::BAD_REQUEST, "bad_request", err.to_string()),
                ErrorKind::Conflict => (StatusCode::CONFLICT, "conflict", err.to_string()),
                ErrorKind::Cancelled => (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "cancelled",
                    err.to_string(),
                ),
                ErrorKind::Internal => {
                    // Storage and audit details stay in the log.
                    error!(error = %err, "request failed");
                    (
                        StatusCode::INTERNAL_SERVER_ERROR,
                        "internal_error",
                        "internal error".to_owned(),
                    )
                }
            },
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_type, message) = self.parts();
        let body = ErrorBody {
            error: error_type,
            message,
        };
        (status, axum::Json(body)).into_response()
    }
}

impl From<CredentialError> for AppError {
    fn from(err: CredentialError) -> Self {
        Self::Service(err)
    }
}

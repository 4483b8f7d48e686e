//! Maps the crate-wide `shardb_core::Error` (and a handful of HTTP-only
//! validation failures) onto the `{error:{code,message,details?}}` envelope,
//! grounded on `akidb-api/handlers/collections.rs::ApiError`.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use serde_json::Value;
use shardb_core::Error;
use tracing::error;

#[derive(Debug)]
pub struct ApiError {
    code: &'static str,
    message: String,
    details: Option<Value>,
}

impl ApiError {
    #[must_use]
    pub fn new(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
        }
    }

    #[must_use]
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new("INVALID_REQUEST", message)
    }

    #[must_use]
    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }
}

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        Self {
            code: err.code(),
            message: err.to_string(),
            details: None,
        }
    }
}

/// The HTTP status a wire error code maps to, per the envelope table.
/// `NETWORK_ERROR` and `NO_SHARDS_AVAILABLE` aren't named in that table;
/// both are treated as infrastructure unavailability (503), alongside the
/// codes the table does name.
fn status_for_code(code: &str) -> StatusCode {
    match code {
        "INVALID_REQUEST" | "INVALID_DOCUMENT" | "INVALID_QUERY" => StatusCode::BAD_REQUEST,
        "UNAUTHORIZED" => StatusCode::UNAUTHORIZED,
        "FORBIDDEN" => StatusCode::FORBIDDEN,
        "RATE_LIMITED" => StatusCode::TOO_MANY_REQUESTS,
        "INTERNAL_ERROR" => StatusCode::INTERNAL_SERVER_ERROR,
        "SYSTEM_OVERLOADED" | "MAINTENANCE_MODE" | "NETWORK_ERROR" | "NO_SHARDS_AVAILABLE" => {
            StatusCode::SERVICE_UNAVAILABLE
        }
        "CONFLICT" | "TRANSACTION_CONFLICT" => StatusCode::CONFLICT,
        c if c.ends_with("_NOT_FOUND") => StatusCode::NOT_FOUND,
        c if c.ends_with("_ALREADY_EXISTS") => StatusCode::CONFLICT,
        c if c.ends_with("_TIMEOUT") => StatusCode::REQUEST_TIMEOUT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorPayload,
}

#[derive(Serialize)]
struct ErrorPayload {
    code: &'static str,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<Value>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = status_for_code(self.code);
        if status.is_server_error() {
            error!(code = self.code, message = %self.message, "request failed with server error");
        }
        (
            status,
            Json(ErrorBody {
                error: ErrorPayload {
                    code: self.code,
                    message: self.message,
                    details: self.details,
                },
            }),
        )
            .into_response()
    }
}

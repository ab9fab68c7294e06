//! Error-to-HTTP response conversion.
//!
//! Route handlers return `Result<T, AppError>` and use `?` on
//! [`scenestream_common::Error`] values directly.

use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use scenestream_common::Error;
use serde_json::json;

/// Wrapper so we can implement `IntoResponse` for an external type.
#[derive(Debug)]
pub struct AppError(pub Error);

impl From<Error> for AppError {
    fn from(e: Error) -> Self {
        Self(e)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.0.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

        if status.is_server_error() && !self.0.is_retryable() {
            tracing::error!(
                status = %status,
                error = %self.0,
                "Server error in API handler"
            );
        }

        let code = match &self.0 {
            Error::NotFound { .. } => "not_found",
            Error::NotYetAvailable { .. } => "not_yet_available",
            Error::Validation(_) => "validation_error",
            Error::Unauthorized(_) => "unauthorized",
            Error::Io { .. } => "io_error",
            Error::Tool { .. } => "tool_error",
            Error::Internal(_) => "internal_error",
        };

        let body = json!({
            "error": self.0.to_string(),
            "code": code,
        });

        let mut response = (status, axum::Json(body)).into_response();
        if let Error::NotYetAvailable { retry_after_ms, .. } = &self.0 {
            let secs = retry_after_ms.div_ceil(1000).max(1);
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(secs));
        }
        response
    }
}

//! Tidepool master error abstractions.

use axum::http::StatusCode;

pub use tidepool_core::{AppError, ErrorKind};

/// The response type of a failed HTTP request.
pub type HttpError = (StatusCode, String);

/// A result type used with the HTTP API.
pub type HttpResult<T> = ::std::result::Result<T, HttpError>;

/// An extension trait for the Tidepool core `AppError`.
pub trait AppErrorExt {
    /// Get the HTTP status code and message for this error.
    fn into_http(self) -> HttpError;
}

impl AppErrorExt for AppError {
    fn into_http(self) -> HttpError {
        let status = match self.kind() {
            ErrorKind::InvalidArgument => StatusCode::BAD_REQUEST,
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::CapacityExhausted => StatusCode::SERVICE_UNAVAILABLE,
            ErrorKind::Connectivity | ErrorKind::ProtocolMismatch | ErrorKind::IoExhausted => StatusCode::BAD_GATEWAY,
            ErrorKind::Integrity | ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            tracing::error!(error = %self, "error handling request");
        }
        (status, self.to_string())
    }
}

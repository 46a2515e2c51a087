//! Error types.
//!
//! Two layers: [`ErrorKind`] is the small closed set of error strings a
//! client can see in a signaling ack; [`BanterError`] is the REST error
//! that converts straight into an HTTP response. Internal detail is
//! logged server-side and never leaks to clients.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

/// Client-visible failure category for a signaling ack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Missing or invalid field on the inbound event.
    BadRequest,
    /// The addressed server/channel/transport/producer does not exist.
    NotFound,
    /// The operation requires a session state the connection is not in.
    InvalidState,
    /// The router cannot consume the producer with the given capabilities.
    IncompatibleCodecs,
    /// SFU or store failure; detail stays in the server log.
    Internal,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::BadRequest => "bad-request",
            Self::NotFound => "not-found",
            Self::InvalidState => "invalid-state",
            Self::IncompatibleCodecs => "incompatible-codecs",
            Self::Internal => "internal",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// REST-facing application error.
#[derive(Debug, thiserror::Error)]
pub enum BanterError {
    #[error("Validation failed: {message}")]
    Validation { message: String },

    #[error("{resource} not found")]
    NotFound { resource: String },

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

/// JSON error body sent to REST clients.
#[derive(Serialize)]
struct ErrorResponse {
    code: u16,
    error: String,
}

impl BanterError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Validation { .. } => StatusCode::BAD_REQUEST,
            Self::NotFound { .. } => StatusCode::NOT_FOUND,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for BanterError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        // Don't leak internal details to clients.
        let message = match &self {
            BanterError::Internal(error) => {
                tracing::error!("internal error: {error:#}");
                "An internal error occurred".to_string()
            }
            other => other.to_string(),
        };

        let body = ErrorResponse {
            code: status.as_u16(),
            error: message,
        };
        (status, axum::Json(body)).into_response()
    }
}

/// Convenience alias for REST handlers.
pub type BanterResult<T> = Result<T, BanterError>;

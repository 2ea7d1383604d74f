//! Shared error handling for API endpoints.
//!
//! Responses carry a stable machine-readable `error` code plus a short
//! human message. Persistence failures are logged with context and surface
//! as a generic 500; they are never swallowed.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use tracing::error;

use crate::session::SessionError;

/// API error type with automatic response conversion.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl ApiError {
    pub fn bad_request(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            code,
            message: message.into(),
        }
    }

    pub fn unauthorized(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::UNAUTHORIZED,
            code,
            message: message.into(),
        }
    }

    pub fn forbidden(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::FORBIDDEN,
            code,
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            code: "internal_error",
            message: message.into(),
        }
    }

    /// Log a store failure with context and produce the generic response.
    pub fn persistence(context: &str, e: impl std::fmt::Display) -> Self {
        error!("{}: {}", context, e);
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            code: "persistence_error",
            message: "Internal error".into(),
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }
}

/// Extension trait for concise error mapping on Results.
pub trait ResultExt<T> {
    fn persist_err(self, context: &str) -> Result<T, ApiError>;
}

impl<T, E: std::fmt::Display> ResultExt<T> for Result<T, E> {
    fn persist_err(self, context: &str) -> Result<T, ApiError> {
        self.map_err(|e| ApiError::persistence(context, e))
    }
}

impl From<SessionError> for ApiError {
    fn from(e: SessionError) -> Self {
        match e {
            SessionError::SessionNotFound => {
                ApiError::unauthorized("session_not_found", "Session no longer exists")
            }
            SessionError::SessionExpired => {
                ApiError::unauthorized("session_expired", "Session has expired")
            }
            SessionError::UserNotFound => {
                ApiError::unauthorized("user_not_found", "User no longer exists")
            }
            SessionError::Token(e) => ApiError::persistence("Token operation failed", e),
            SessionError::Persistence(e) => ApiError::persistence("Session store failed", e),
        }
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: &'static str,
    message: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(ErrorResponse {
                error: self.code,
                message: self.message,
            }),
        )
            .into_response()
    }
}

//! Guard-chain error types.
//!
//! Every failure maps to a 401/403 with a stable machine-readable code;
//! internal detail never leaks to the response body. Guard failures do not
//! clear cookies: an expired access cookie must leave the refresh cookie
//! intact so the client can still reach the refresh endpoint.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;

/// Rejections produced by the credential extraction and guard chain.
#[derive(Debug)]
pub enum AuthError {
    /// No candidate token in header or cookie
    MissingCredential,
    /// Candidate token failed verification (expired, malformed, bad signature)
    InvalidAccessToken,
    /// Claims referenced a session row that no longer exists
    SessionNotFound,
    /// Decoded role is not in the operation's allow-set
    RoleNotPermitted,
    /// Admin shared secret absent, misconfigured or mismatched
    AdminKeyRejected,
    /// Store lookup failed
    Persistence,
}

impl AuthError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            AuthError::MissingCredential
            | AuthError::InvalidAccessToken
            | AuthError::SessionNotFound => StatusCode::UNAUTHORIZED,
            AuthError::RoleNotPermitted | AuthError::AdminKeyRejected => StatusCode::FORBIDDEN,
            AuthError::Persistence => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Stable machine-readable error code.
    pub fn code(&self) -> &'static str {
        match self {
            AuthError::MissingCredential => "missing_credential",
            AuthError::InvalidAccessToken => "invalid_access_token",
            AuthError::SessionNotFound => "session_not_found",
            AuthError::RoleNotPermitted => "role_not_permitted",
            AuthError::AdminKeyRejected => "forbidden",
            AuthError::Persistence => "persistence_error",
        }
    }

    fn message(&self) -> &'static str {
        match self {
            AuthError::MissingCredential => "No credential provided",
            AuthError::InvalidAccessToken => "Invalid or expired access token",
            AuthError::SessionNotFound => "Session no longer exists",
            AuthError::RoleNotPermitted => "Insufficient permissions",
            AuthError::AdminKeyRejected => "Forbidden",
            AuthError::Persistence => "Internal error",
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: &'static str,
    message: &'static str,
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        (
            self.status_code(),
            Json(ErrorBody {
                error: self.code(),
                message: self.message(),
            }),
        )
            .into_response()
    }
}

//! Authentication endpoints.
//!
//! - POST `/login` - Verify credentials, create a session, set tokens
//! - POST `/register` - Create an account, then proceed as login
//! - POST `/refresh` - Exchange a refresh token for a new access token
//! - POST `/logout` - Revoke the current session and clear cookies
//! - GET `/sessions` - List the caller's sessions
//! - DELETE `/sessions` - Revoke every session except the current one
//! - DELETE `/sessions/{id}` - Revoke one of the caller's sessions
//! - POST `/password/forgot`, POST `/password/reset` - Reset flow

use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::SaltString;
use argon2::{Argon2, PasswordHash, PasswordHasher, PasswordVerifier};
use axum::{
    Json, Router,
    extract::{Path, State},
    http::{HeaderMap, HeaderValue, StatusCode, header::SET_COOKIE, header::USER_AGENT},
    response::{AppendHeaders, IntoResponse, Response},
    routing::{delete, get, post},
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info};

use super::error::{ApiError, ResultExt};
use crate::auth::{
    ACCESS_COOKIE_NAME, AuthWithSession, REFRESH_COOKIE_NAME, auth_cookie, bearer_token,
    clear_cookie, get_cookie,
};
use crate::db::{Database, User, UserRole, VerificationKind, now_millis};
use crate::impl_has_auth_backend;
use crate::jwt::{ACCESS_TOKEN_DURATION_SECS, JwtKeys, REFRESH_TOKEN_DURATION_SECS};
use crate::session::{SessionError, SessionService};

/// Password reset codes live for 15 minutes.
const RESET_CODE_TTL_MILLIS: i64 = 15 * 60 * 1000;

const MIN_PASSWORD_LENGTH: usize = 8;

#[derive(Clone)]
pub struct AuthApiState {
    pub db: Database,
    pub jwt: Arc<JwtKeys>,
    pub secure_cookies: bool,
}

impl_has_auth_backend!(AuthApiState);

impl AuthApiState {
    fn service(&self) -> SessionService {
        SessionService::new(self.db.clone(), self.jwt.clone())
    }
}

pub fn router(state: AuthApiState) -> Router {
    Router::new()
        .route("/login", post(login))
        .route("/register", post(register))
        .route("/refresh", post(refresh_tokens))
        .route("/logout", post(logout))
        .route("/sessions", get(list_sessions).delete(revoke_other_sessions))
        .route("/sessions/{id}", delete(revoke_session))
        .route("/password/forgot", post(forgot_password))
        .route("/password/reset", post(reset_password))
        .with_state(state)
}

// =============================================================================
// Request/response types
// =============================================================================

#[derive(Deserialize)]
struct LoginRequest {
    email: String,
    password: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RegisterRequest {
    email: String,
    first_name: String,
    last_name: String,
    password: String,
    role: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct UserResponse {
    id: i64,
    email: String,
    first_name: String,
    last_name: String,
    role: UserRole,
}

impl From<&User> for UserResponse {
    fn from(user: &User) -> Self {
        Self {
            id: user.id,
            email: user.email.clone(),
            first_name: user.first_name.clone(),
            last_name: user.last_name.clone(),
            role: user.role,
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct AuthResponse {
    user: UserResponse,
    access_token: String,
    refresh_token: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RefreshResponse {
    access_token: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    refresh_token: Option<String>,
}

// =============================================================================
// Password hashing
// =============================================================================

fn hash_password(password: &str) -> Result<String, ApiError> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|h| h.to_string())
        .map_err(|e| {
            error!(error = %e, "Failed to hash password");
            ApiError::internal("Failed to process password")
        })
}

fn verify_password(password: &str, hash: &str) -> bool {
    PasswordHash::new(hash)
        .map(|parsed| {
            Argon2::default()
                .verify_password(password.as_bytes(), &parsed)
                .is_ok()
        })
        .unwrap_or(false)
}

// =============================================================================
// Handlers
// =============================================================================

fn user_agent(headers: &HeaderMap) -> &str {
    headers
        .get(USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
}

/// Both credential cookies for a fresh login/registration.
fn credential_cookie_headers(
    access: &str,
    refresh: &str,
    secure: bool,
) -> AppendHeaders<[(axum::http::HeaderName, String); 2]> {
    AppendHeaders([
        (
            SET_COOKIE,
            auth_cookie(ACCESS_COOKIE_NAME, access, ACCESS_TOKEN_DURATION_SECS, secure),
        ),
        (
            SET_COOKIE,
            auth_cookie(
                REFRESH_COOKIE_NAME,
                refresh,
                REFRESH_TOKEN_DURATION_SECS,
                secure,
            ),
        ),
    ])
}

fn clear_cookie_headers(
    secure: bool,
) -> AppendHeaders<[(axum::http::HeaderName, String); 2]> {
    AppendHeaders([
        (SET_COOKIE, clear_cookie(ACCESS_COOKIE_NAME, secure)),
        (SET_COOKIE, clear_cookie(REFRESH_COOKIE_NAME, secure)),
    ])
}

/// Attach cookie-clearing headers to an error response.
fn reject_clearing_cookies(err: ApiError, secure: bool) -> Response {
    let mut response = err.into_response();
    let headers = response.headers_mut();
    for value in [
        clear_cookie(ACCESS_COOKIE_NAME, secure),
        clear_cookie(REFRESH_COOKIE_NAME, secure),
    ] {
        if let Ok(value) = HeaderValue::from_str(&value) {
            headers.append(SET_COOKIE, value);
        }
    }
    response
}

async fn login(
    State(state): State<AuthApiState>,
    headers: HeaderMap,
    Json(payload): Json<LoginRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let user = state
        .db
        .users()
        .get_by_email(payload.email.trim())
        .await
        .persist_err("Failed to look up user")?
        .ok_or_else(|| ApiError::bad_request("invalid_credentials", "Invalid email or password"))?;

    if !verify_password(&payload.password, &user.password_hash) {
        return Err(ApiError::bad_request(
            "invalid_credentials",
            "Invalid email or password",
        ));
    }

    let service = state.service();
    let session = service.create_session(user.id, user_agent(&headers)).await?;
    let tokens = service.issue_initial_tokens(&session, user.role)?;

    info!(user = user.id, session = session.id, "User logged in");

    Ok((
        StatusCode::OK,
        credential_cookie_headers(&tokens.access, &tokens.refresh, state.secure_cookies),
        Json(AuthResponse {
            user: UserResponse::from(&user),
            access_token: tokens.access,
            refresh_token: tokens.refresh,
        }),
    ))
}

async fn register(
    State(state): State<AuthApiState>,
    headers: HeaderMap,
    Json(payload): Json<RegisterRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let email = payload.email.trim();
    if email.is_empty() || !email.contains('@') {
        return Err(ApiError::bad_request("invalid_email", "Invalid email address"));
    }
    if payload.password.len() < MIN_PASSWORD_LENGTH {
        return Err(ApiError::bad_request(
            "weak_password",
            "Password must be at least 8 characters",
        ));
    }

    let existing = state
        .db
        .users()
        .get_by_email(email)
        .await
        .persist_err("Failed to check email availability")?;
    if existing.is_some() {
        return Err(ApiError::bad_request("email_taken", "Email is already registered"));
    }

    let role = UserRole::from_str(payload.role.as_deref().unwrap_or("user"));
    let password_hash = hash_password(&payload.password)?;

    let user_id = state
        .db
        .users()
        .create(
            email,
            payload.first_name.trim(),
            payload.last_name.trim(),
            &password_hash,
            role,
        )
        .await
        .persist_err("Failed to create user")?;

    let user = state
        .db
        .users()
        .get_by_id(user_id)
        .await
        .persist_err("Failed to load new user")?
        .ok_or_else(|| ApiError::internal("User vanished after creation"))?;

    let service = state.service();
    let session = service.create_session(user.id, user_agent(&headers)).await?;
    let tokens = service.issue_initial_tokens(&session, user.role)?;

    info!(user = user.id, session = session.id, "User registered");

    Ok((
        StatusCode::OK,
        credential_cookie_headers(&tokens.access, &tokens.refresh, state.secure_cookies),
        Json(AuthResponse {
            user: UserResponse::from(&user),
            access_token: tokens.access,
            refresh_token: tokens.refresh,
        }),
    ))
}

/// Exchange a refresh token for a new access token, rotating the refresh
/// token when the session is close to expiry. The refresh token arrives as
/// a bearer header (programmatic clients) or the `refreshToken` cookie
/// (browsers); the header wins when both are present.
async fn refresh_tokens(
    State(state): State<AuthApiState>,
    request: axum::extract::Request,
) -> Response {
    let (parts, _body) = request.into_parts();
    let secure = state.secure_cookies;

    match try_refresh(&state, &parts).await {
        Ok(response) => response,
        // A rejected refresh is terminal for browser clients: drop both
        // cookies so the next page load starts unauthenticated.
        Err(err) if err.status() == StatusCode::UNAUTHORIZED => {
            reject_clearing_cookies(err, secure)
        }
        Err(err) => err.into_response(),
    }
}

async fn try_refresh(
    state: &AuthApiState,
    parts: &axum::http::request::Parts,
) -> Result<Response, ApiError> {
    let token = bearer_token(parts)
        .or_else(|| get_cookie(&parts.headers, REFRESH_COOKIE_NAME))
        .ok_or_else(|| ApiError::unauthorized("missing_credential", "No refresh token"))?;

    let claims = state
        .jwt
        .verify_refresh(token)
        .map_err(|_| ApiError::unauthorized("invalid_refresh_token", "Invalid or expired refresh token"))?;

    let outcome = state.service().refresh(claims.sid).await?;

    let mut cookies = vec![(
        SET_COOKIE,
        auth_cookie(
            ACCESS_COOKIE_NAME,
            &outcome.access,
            ACCESS_TOKEN_DURATION_SECS,
            state.secure_cookies,
        ),
    )];
    if let Some(ref refresh) = outcome.refresh {
        cookies.push((
            SET_COOKIE,
            auth_cookie(
                REFRESH_COOKIE_NAME,
                refresh,
                REFRESH_TOKEN_DURATION_SECS,
                state.secure_cookies,
            ),
        ));
    }

    Ok((
        StatusCode::OK,
        AppendHeaders(cookies),
        Json(RefreshResponse {
            access_token: outcome.access,
            refresh_token: outcome.refresh,
        }),
    )
        .into_response())
}

/// Revoke the current session. 400 when it was already revoked; the
/// cookies are cleared either way.
async fn logout(State(state): State<AuthApiState>, auth: crate::auth::Auth) -> Response {
    let secure = state.secure_cookies;

    match state.service().revoke(auth.claims.sid).await {
        Ok(()) => {
            info!(user = auth.claims.sub, session = auth.claims.sid, "User logged out");
            (
                StatusCode::OK,
                clear_cookie_headers(secure),
                Json(serde_json::json!({ "success": true })),
            )
                .into_response()
        }
        Err(SessionError::SessionNotFound) => reject_clearing_cookies(
            ApiError::bad_request("session_not_found", "Already logged out"),
            secure,
        ),
        Err(e) => ApiError::from(e).into_response(),
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SessionInfo {
    id: i64,
    user_agent: String,
    created_at: i64,
    expires_at: i64,
    current: bool,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ListSessionsResponse {
    sessions: Vec<SessionInfo>,
    current_session_id: i64,
}

async fn list_sessions(
    State(state): State<AuthApiState>,
    auth: AuthWithSession,
) -> Result<impl IntoResponse, ApiError> {
    let sessions = state.service().list_sessions(auth.claims.sub).await?;

    let current = auth.session.id;
    let sessions = sessions
        .into_iter()
        .map(|s| SessionInfo {
            current: s.id == current,
            id: s.id,
            user_agent: s.user_agent,
            created_at: s.created_at,
            expires_at: s.expires_at,
        })
        .collect();

    Ok(Json(ListSessionsResponse {
        sessions,
        current_session_id: current,
    }))
}

#[derive(Serialize)]
struct RevokeResponse {
    revoked: bool,
}

/// Revoke one of the caller's sessions by id. A missing row counts as
/// already revoked, not an error.
async fn revoke_session(
    State(state): State<AuthApiState>,
    auth: AuthWithSession,
    Path(session_id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let session = state
        .db
        .sessions()
        .get(session_id)
        .await
        .persist_err("Failed to load session")?;

    let Some(session) = session else {
        return Ok(Json(RevokeResponse { revoked: false }));
    };

    if session.user_id != auth.claims.sub {
        return Err(ApiError::forbidden(
            "forbidden",
            "Cannot revoke another user's session",
        ));
    }

    let revoked = match state.service().revoke(session_id).await {
        Ok(()) => true,
        Err(SessionError::SessionNotFound) => false,
        Err(e) => return Err(e.into()),
    };

    Ok(Json(RevokeResponse { revoked }))
}

#[derive(Serialize)]
struct RevokeOthersResponse {
    revoked: u64,
}

/// "Log out other devices": revoke every session except the current one.
async fn revoke_other_sessions(
    State(state): State<AuthApiState>,
    auth: AuthWithSession,
) -> Result<impl IntoResponse, ApiError> {
    let revoked = state
        .service()
        .revoke_others(auth.claims.sub, auth.session.id)
        .await?;

    Ok(Json(RevokeOthersResponse { revoked }))
}

#[derive(Deserialize)]
struct ForgotPasswordRequest {
    email: String,
}

/// Issue a password reset code. Always 200 so the endpoint cannot be used
/// to probe which emails exist. Delivery is the operator's concern; the
/// code is written to the log.
async fn forgot_password(
    State(state): State<AuthApiState>,
    Json(payload): Json<ForgotPasswordRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let user = state
        .db
        .users()
        .get_by_email(payload.email.trim())
        .await
        .persist_err("Failed to look up user")?;

    if let Some(user) = user {
        let code = uuid::Uuid::new_v4().to_string();
        state
            .db
            .verification_codes()
            .create(
                &code,
                user.id,
                VerificationKind::PasswordReset,
                now_millis() + RESET_CODE_TTL_MILLIS,
            )
            .await
            .persist_err("Failed to store reset code")?;

        info!(user = user.id, code = %code, "Password reset code issued");
    }

    Ok(Json(serde_json::json!({ "success": true })))
}

#[derive(Deserialize)]
struct ResetPasswordRequest {
    code: String,
    password: String,
}

/// Consume a reset code, set the new password and revoke every session of
/// the user.
async fn reset_password(
    State(state): State<AuthApiState>,
    Json(payload): Json<ResetPasswordRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if payload.password.len() < MIN_PASSWORD_LENGTH {
        return Err(ApiError::bad_request(
            "weak_password",
            "Password must be at least 8 characters",
        ));
    }

    let user_id = state
        .db
        .verification_codes()
        .consume(&payload.code, VerificationKind::PasswordReset, now_millis())
        .await
        .persist_err("Failed to consume reset code")?
        .ok_or_else(|| ApiError::bad_request("invalid_code", "Invalid or expired code"))?;

    let password_hash = hash_password(&payload.password)?;
    state
        .db
        .users()
        .update_password(user_id, &password_hash)
        .await
        .persist_err("Failed to update password")?;

    let revoked = state
        .db
        .sessions()
        .delete_by_user(user_id)
        .await
        .persist_err("Failed to revoke sessions")?;

    info!(user = user_id, revoked, "Password reset completed");

    Ok(Json(serde_json::json!({ "success": true })))
}

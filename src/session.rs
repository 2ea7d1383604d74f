//! Session lifecycle policy.
//!
//! Creates sessions on login/registration, decides refresh-token rotation,
//! extends session expiry, and revokes sessions. The session row is the
//! unit of revocation: every refresh attempt is cross-checked against it,
//! so deleting the row invalidates the refresh token regardless of the
//! token's own unexpired signature.

use std::sync::Arc;
use thiserror::Error;

use crate::db::{Database, SessionRecord, UserRole, now_millis};
use crate::jwt::{JwtKeys, TokenError};

/// Session lifetime: 30 days from creation or rotation.
pub const SESSION_TTL_MILLIS: i64 = 30 * 24 * 60 * 60 * 1000;

/// Rotation threshold: a refresh call rotates the refresh token and extends
/// the session only when remaining lifetime is strictly below 7 days.
pub const ROTATION_THRESHOLD_MILLIS: i64 = 7 * 24 * 60 * 60 * 1000;

/// Errors from session lifecycle operations.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("session not found")]
    SessionNotFound,
    #[error("session expired")]
    SessionExpired,
    #[error("user not found")]
    UserNotFound,
    #[error("token error: {0}")]
    Token(#[from] TokenError),
    #[error("persistence error: {0}")]
    Persistence(#[from] sqlx::Error),
}

/// Access and refresh pair minted for a new session.
#[derive(Debug, Clone)]
pub struct IssuedTokens {
    pub access: String,
    pub refresh: String,
}

/// Result of a refresh call. `refresh` is None when the session was not yet
/// eligible for rotation; the client keeps its previous refresh token.
#[derive(Debug, Clone)]
pub struct RefreshOutcome {
    pub access: String,
    pub refresh: Option<String>,
}

/// Whether a session this close to expiry must rotate.
///
/// Strictly-less-than: a session expiring in exactly 7 days does NOT rotate,
/// 7 days minus any epsilon does. Keeps refresh calls cheap most of the time
/// while a session polling normally can never silently run out.
pub fn rotation_due(expires_at: i64, now: i64) -> bool {
    expires_at - now < ROTATION_THRESHOLD_MILLIS
}

#[derive(Clone)]
pub struct SessionService {
    db: Database,
    jwt: Arc<JwtKeys>,
}

impl SessionService {
    pub fn new(db: Database, jwt: Arc<JwtKeys>) -> Self {
        Self { db, jwt }
    }

    /// Create a session row expiring 30 days out. A store failure here is
    /// fatal to the enclosing login/registration call: no tokens may be
    /// minted for a session that was never persisted.
    pub async fn create_session(
        &self,
        user_id: i64,
        user_agent: &str,
    ) -> Result<SessionRecord, SessionError> {
        let expires_at = now_millis() + SESSION_TTL_MILLIS;
        let id = self.db.sessions().create(user_id, user_agent, expires_at).await?;
        let session = self
            .db
            .sessions()
            .get(id)
            .await?
            .ok_or(SessionError::SessionNotFound)?;
        Ok(session)
    }

    /// Mint the initial access + refresh pair for a freshly created session.
    pub fn issue_initial_tokens(
        &self,
        session: &SessionRecord,
        role: UserRole,
    ) -> Result<IssuedTokens, SessionError> {
        Ok(IssuedTokens {
            access: self.jwt.mint_access(session.user_id, session.id, role)?,
            refresh: self.jwt.mint_refresh(session.id)?,
        })
    }

    /// Validate a refresh attempt against the live session record and decide
    /// rotation.
    ///
    /// Order is fixed: unknown session, then missing user (defensive; user
    /// deletion cascades sessions but a racing delete can interleave), then
    /// expiry. A session expiring at exactly the current instant counts as
    /// expired. A fresh access token is always minted on success; the
    /// refresh token rotates only when [`rotation_due`] says so, in which
    /// case the session expiry is extended to now + 30 days first.
    pub async fn refresh(&self, session_id: i64) -> Result<RefreshOutcome, SessionError> {
        let session = self
            .db
            .sessions()
            .get(session_id)
            .await?
            .ok_or(SessionError::SessionNotFound)?;

        let user = self
            .db
            .users()
            .get_by_id(session.user_id)
            .await?
            .ok_or(SessionError::UserNotFound)?;

        let now = now_millis();
        if session.expires_at <= now {
            return Err(SessionError::SessionExpired);
        }

        let access = self.jwt.mint_access(user.id, session.id, user.role)?;

        let refresh = if rotation_due(session.expires_at, now) {
            self.db
                .sessions()
                .update_expiry(session.id, now + SESSION_TTL_MILLIS)
                .await?;
            Some(self.jwt.mint_refresh(session.id)?)
        } else {
            None
        };

        Ok(RefreshOutcome { access, refresh })
    }

    /// Revoke a session. Fails with `SessionNotFound` when the row is
    /// already gone; callers treat that as already-logged-out.
    pub async fn revoke(&self, session_id: i64) -> Result<(), SessionError> {
        if self.db.sessions().delete(session_id).await? {
            Ok(())
        } else {
            Err(SessionError::SessionNotFound)
        }
    }

    /// List all sessions of a user.
    pub async fn list_sessions(&self, user_id: i64) -> Result<Vec<SessionRecord>, SessionError> {
        Ok(self.db.sessions().list_by_user(user_id).await?)
    }

    /// Revoke every session of a user except the given one.
    pub async fn revoke_others(
        &self,
        user_id: i64,
        except_session_id: i64,
    ) -> Result<u64, SessionError> {
        Ok(self
            .db
            .sessions()
            .delete_others(user_id, except_session_id)
            .await?)
    }
}

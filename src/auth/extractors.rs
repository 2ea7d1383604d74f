//! Axum extractors implementing the guard chain.

use std::marker::PhantomData;

use axum::{extract::FromRequestParts, http::header, http::request::Parts};

use super::cookie::{ACCESS_COOKIE_NAME, get_cookie};
use super::errors::AuthError;
use super::state::{HasAdminKey, HasAuthBackend};
use crate::db::{SessionRecord, UserRole};
use crate::jwt::AccessClaims;

/// Header carrying the administrative shared secret.
pub const ADMIN_KEY_HEADER: &str = "x-admin-key";

/// Extract a bearer token from the Authorization header.
/// Returns None when the header is absent or not a Bearer credential.
pub fn bearer_token(parts: &Parts) -> Option<&str> {
    parts
        .headers
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

/// Locate the candidate access token.
///
/// Extraction order is a security invariant: the Authorization header is
/// inspected first and wins whenever it carries a Bearer credential, even an
/// invalid one. Only an absent or non-Bearer header falls back to the
/// `accessToken` cookie.
fn candidate_token(parts: &Parts) -> Option<&str> {
    bearer_token(parts).or_else(|| get_cookie(&parts.headers, ACCESS_COOKIE_NAME))
}

/// A role allow-set for an operation. Pure check, no I/O.
pub trait RoleConstraint {
    fn allows(role: UserRole) -> bool;
}

/// Any authenticated principal.
pub struct AnyRole;

impl RoleConstraint for AnyRole {
    fn allows(_role: UserRole) -> bool {
        true
    }
}

/// Agency staff: agents, assistants and agency admins.
pub struct StaffOnly;

impl RoleConstraint for StaffOnly {
    fn allows(role: UserRole) -> bool {
        role.is_staff()
    }
}

/// Agency admins only.
pub struct AgencyAdminOnly;

impl RoleConstraint for AgencyAdminOnly {
    fn allows(role: UserRole) -> bool {
        role == UserRole::AgencyAdmin
    }
}

/// Authenticated principal guard.
///
/// Runs credential extraction and verification, then the (pure) role check.
/// The decoded claims travel with the request as a typed value; downstream
/// handlers never re-parse the token.
pub struct Auth<C: RoleConstraint = AnyRole> {
    pub claims: AccessClaims,
    _role: PhantomData<C>,
}

fn authenticate<C: RoleConstraint>(parts: &Parts, jwt: &crate::jwt::JwtKeys) -> Result<AccessClaims, AuthError> {
    let token = candidate_token(parts).ok_or(AuthError::MissingCredential)?;
    let claims = jwt
        .verify_access(token)
        .map_err(|_| AuthError::InvalidAccessToken)?;
    if !C::allows(claims.role) {
        return Err(AuthError::RoleNotPermitted);
    }
    Ok(claims)
}

impl<S, C> FromRequestParts<S> for Auth<C>
where
    S: HasAuthBackend + Send + Sync,
    C: RoleConstraint,
{
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let claims = authenticate::<C>(parts, state.jwt())?;
        Ok(Auth {
            claims,
            _role: PhantomData,
        })
    }
}

/// Like [`Auth`], but additionally re-checks the session row in the store.
///
/// Sensitive operations use this so a revoked session is rejected even while
/// its access token is still within its signed validity window.
pub struct AuthWithSession<C: RoleConstraint = AnyRole> {
    pub claims: AccessClaims,
    pub session: SessionRecord,
    _role: PhantomData<C>,
}

impl<S, C> FromRequestParts<S> for AuthWithSession<C>
where
    S: HasAuthBackend + Send + Sync,
    C: RoleConstraint,
{
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let claims = authenticate::<C>(parts, state.jwt())?;

        let session = state
            .db()
            .sessions()
            .get(claims.sid)
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "Failed to load session");
                AuthError::Persistence
            })?
            .ok_or(AuthError::SessionNotFound)?;

        Ok(AuthWithSession {
            claims,
            session,
            _role: PhantomData,
        })
    }
}

/// Static shared-secret guard for administrative endpoints.
///
/// Independent of the session system and checked before any session or role
/// logic. Rejects when the header is absent, the server has no key
/// configured, or the values differ.
pub struct AdminKey;

impl<S> FromRequestParts<S> for AdminKey
where
    S: HasAdminKey + Send + Sync,
{
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let configured = state.admin_key().ok_or(AuthError::AdminKeyRejected)?;
        let presented = parts
            .headers
            .get(ADMIN_KEY_HEADER)
            .and_then(|v| v.to_str().ok())
            .ok_or(AuthError::AdminKeyRejected)?;

        if presented != configured {
            return Err(AuthError::AdminKeyRejected);
        }

        Ok(AdminKey)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;

    fn parts_with(auth: Option<&str>, cookie: Option<&str>) -> Parts {
        let mut builder = Request::builder().uri("/");
        if let Some(auth) = auth {
            builder = builder.header(header::AUTHORIZATION, auth);
        }
        if let Some(cookie) = cookie {
            builder = builder.header(header::COOKIE, cookie);
        }
        let (parts, ()) = builder.body(()).unwrap().into_parts();
        parts
    }

    #[test]
    fn test_bearer_token_parsing() {
        let parts = parts_with(Some("Bearer abc"), None);
        assert_eq!(bearer_token(&parts), Some("abc"));

        let parts = parts_with(Some("Basic abc"), None);
        assert_eq!(bearer_token(&parts), None);

        let parts = parts_with(Some("Bearer "), None);
        assert_eq!(bearer_token(&parts), None);

        let parts = parts_with(None, None);
        assert_eq!(bearer_token(&parts), None);
    }

    #[test]
    fn test_header_takes_precedence_over_cookie() {
        let parts = parts_with(Some("Bearer from-header"), Some("accessToken=from-cookie"));
        assert_eq!(candidate_token(&parts), Some("from-header"));
    }

    #[test]
    fn test_non_bearer_header_falls_back_to_cookie() {
        let parts = parts_with(Some("Basic dXNlcg=="), Some("accessToken=from-cookie"));
        assert_eq!(candidate_token(&parts), Some("from-cookie"));
    }

    #[test]
    fn test_no_candidate() {
        let parts = parts_with(None, Some("other=value"));
        assert_eq!(candidate_token(&parts), None);
    }

    #[test]
    fn test_role_constraints() {
        assert!(AnyRole::allows(UserRole::User));
        assert!(AnyRole::allows(UserRole::AgencyAdmin));

        assert!(!StaffOnly::allows(UserRole::User));
        assert!(StaffOnly::allows(UserRole::Agent));
        assert!(StaffOnly::allows(UserRole::Assistant));
        assert!(StaffOnly::allows(UserRole::AgencyAdmin));

        assert!(!AgencyAdminOnly::allows(UserRole::User));
        assert!(!AgencyAdminOnly::allows(UserRole::Agent));
        assert!(AgencyAdminOnly::allows(UserRole::AgencyAdmin));
    }
}

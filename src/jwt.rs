//! Signed credential minting and verification.
//!
//! Dual-token system: short-lived access tokens carrying the full principal
//! (user id, session id, role) and long-lived refresh tokens carrying the
//! session id only. Each class is signed with its own secret, so a stolen
//! refresh token can never pass verification as an access token.

use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::db::UserRole;

/// Token class for selecting the signing secret and claim shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenClass {
    /// Short-lived access token (15 minutes) - full principal
    Access,
    /// Long-lived refresh token (30 days) - session id only
    Refresh,
}

/// Access token duration: 15 minutes
pub const ACCESS_TOKEN_DURATION_SECS: u64 = 15 * 60;

/// Refresh token duration: 30 days
pub const REFRESH_TOKEN_DURATION_SECS: u64 = 30 * 24 * 60 * 60;

/// Claims for access tokens. Reconstructed per request, never persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessClaims {
    /// Subject (user id)
    pub sub: i64,
    /// Session id the token is bound to
    pub sid: i64,
    /// User role at mint time
    pub role: UserRole,
    /// Issued at (Unix timestamp)
    pub iat: u64,
    /// Expiration time (Unix timestamp)
    pub exp: u64,
}

/// Claims for refresh tokens. Session id only, so role or identity changes
/// take effect on the next access-token mint instead of being cached in a
/// 30-day credential.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefreshClaims {
    /// Session id the token is bound to
    pub sid: i64,
    /// Issued at (Unix timestamp)
    pub iat: u64,
    /// Expiration time (Unix timestamp)
    pub exp: u64,
}

/// Signing and verification keys for both token classes.
#[derive(Clone)]
pub struct JwtKeys {
    access_encoding: EncodingKey,
    access_decoding: DecodingKey,
    refresh_encoding: EncodingKey,
    refresh_decoding: DecodingKey,
}

impl JwtKeys {
    /// Create keys from the two class secrets. The secrets must differ;
    /// startup validation enforces that.
    pub fn new(access_secret: &[u8], refresh_secret: &[u8]) -> Self {
        Self {
            access_encoding: EncodingKey::from_secret(access_secret),
            access_decoding: DecodingKey::from_secret(access_secret),
            refresh_encoding: EncodingKey::from_secret(refresh_secret),
            refresh_decoding: DecodingKey::from_secret(refresh_secret),
        }
    }

    fn encoding_key(&self, class: TokenClass) -> &EncodingKey {
        match class {
            TokenClass::Access => &self.access_encoding,
            TokenClass::Refresh => &self.refresh_encoding,
        }
    }

    fn decoding_key(&self, class: TokenClass) -> &DecodingKey {
        match class {
            TokenClass::Access => &self.access_decoding,
            TokenClass::Refresh => &self.refresh_decoding,
        }
    }

    /// Mint an access token binding a user, session and role.
    pub fn mint_access(
        &self,
        user_id: i64,
        session_id: i64,
        role: UserRole,
    ) -> Result<String, TokenError> {
        let now = unix_now()?;
        let claims = AccessClaims {
            sub: user_id,
            sid: session_id,
            role,
            iat: now,
            exp: now + ACCESS_TOKEN_DURATION_SECS,
        };

        jsonwebtoken::encode(
            &Header::default(),
            &claims,
            self.encoding_key(TokenClass::Access),
        )
        .map_err(TokenError::Encoding)
    }

    /// Mint a refresh token bound to a session.
    pub fn mint_refresh(&self, session_id: i64) -> Result<String, TokenError> {
        let now = unix_now()?;
        let claims = RefreshClaims {
            sid: session_id,
            iat: now,
            exp: now + REFRESH_TOKEN_DURATION_SECS,
        };

        jsonwebtoken::encode(
            &Header::default(),
            &claims,
            self.encoding_key(TokenClass::Refresh),
        )
        .map_err(TokenError::Encoding)
    }

    /// Verify and decode an access token.
    pub fn verify_access(&self, token: &str) -> Result<AccessClaims, TokenError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;

        jsonwebtoken::decode::<AccessClaims>(
            token,
            self.decoding_key(TokenClass::Access),
            &validation,
        )
        .map(|data| data.claims)
        .map_err(classify_decode_error)
    }

    /// Verify and decode a refresh token.
    pub fn verify_refresh(&self, token: &str) -> Result<RefreshClaims, TokenError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;

        jsonwebtoken::decode::<RefreshClaims>(
            token,
            self.decoding_key(TokenClass::Refresh),
            &validation,
        )
        .map(|data| data.claims)
        .map_err(classify_decode_error)
    }
}

fn unix_now() -> Result<u64, TokenError> {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .map_err(|_| TokenError::TimeError)
}

fn classify_decode_error(e: jsonwebtoken::errors::Error) -> TokenError {
    use jsonwebtoken::errors::ErrorKind;
    match e.kind() {
        ErrorKind::ExpiredSignature => TokenError::Expired,
        ErrorKind::InvalidSignature => TokenError::SignatureInvalid,
        _ => TokenError::Malformed,
    }
}

/// Errors from minting or verifying tokens.
#[derive(Debug)]
pub enum TokenError {
    /// Token signature checked out but the expiry has elapsed
    Expired,
    /// Signature does not match (wrong secret or wrong token class)
    SignatureInvalid,
    /// Token is not a structurally valid JWT for the expected claim shape
    Malformed,
    /// Error encoding the token
    Encoding(jsonwebtoken::errors::Error),
    /// System time error
    TimeError,
}

impl std::fmt::Display for TokenError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TokenError::Expired => write!(f, "Token expired"),
            TokenError::SignatureInvalid => write!(f, "Token signature invalid"),
            TokenError::Malformed => write!(f, "Token malformed"),
            TokenError::Encoding(e) => write!(f, "Failed to encode token: {}", e),
            TokenError::TimeError => write!(f, "System time error"),
        }
    }
}

impl std::error::Error for TokenError {}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_keys() -> JwtKeys {
        JwtKeys::new(
            b"access-secret-for-testing-0000000",
            b"refresh-secret-for-testing-00000",
        )
    }

    #[test]
    fn test_mint_and_verify_access_token() {
        let keys = test_keys();

        let token = keys.mint_access(7, 42, UserRole::Agent).unwrap();
        let claims = keys.verify_access(&token).unwrap();

        assert_eq!(claims.sub, 7);
        assert_eq!(claims.sid, 42);
        assert_eq!(claims.role, UserRole::Agent);
        assert!(claims.exp - claims.iat == ACCESS_TOKEN_DURATION_SECS);
    }

    #[test]
    fn test_mint_and_verify_refresh_token() {
        let keys = test_keys();

        let token = keys.mint_refresh(42).unwrap();
        let claims = keys.verify_refresh(&token).unwrap();

        assert_eq!(claims.sid, 42);
        assert!(claims.exp - claims.iat == REFRESH_TOKEN_DURATION_SECS);
    }

    #[test]
    fn test_cross_class_verification_rejected() {
        let keys = test_keys();

        let access = keys.mint_access(7, 42, UserRole::User).unwrap();
        let refresh = keys.mint_refresh(42).unwrap();

        // Each class only verifies against its own secret
        assert!(matches!(
            keys.verify_refresh(&access),
            Err(TokenError::SignatureInvalid)
        ));
        assert!(matches!(
            keys.verify_access(&refresh),
            Err(TokenError::SignatureInvalid | TokenError::Malformed)
        ));
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let keys1 = test_keys();
        let keys2 = JwtKeys::new(b"another-access-secret-000000000", b"another-refresh-secret-00000000");

        let token = keys1.mint_access(7, 42, UserRole::User).unwrap();
        assert!(matches!(
            keys2.verify_access(&token),
            Err(TokenError::SignatureInvalid)
        ));
    }

    #[test]
    fn test_garbage_token_is_malformed() {
        let keys = test_keys();
        assert!(matches!(
            keys.verify_access("not-a-token"),
            Err(TokenError::Malformed)
        ));
    }

    #[test]
    fn test_expired_token_reports_expired() {
        let secret = b"access-secret-for-testing-0000000";
        let encoding_key = EncodingKey::from_secret(secret);

        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_secs();

        let claims = AccessClaims {
            sub: 7,
            sid: 42,
            role: UserRole::User,
            iat: now - 100,
            exp: now - 50, // Expired 50 seconds ago
        };

        let token = jsonwebtoken::encode(&Header::default(), &claims, &encoding_key).unwrap();

        let keys = JwtKeys::new(secret, b"refresh-secret-for-testing-00000");
        assert!(matches!(
            keys.verify_access(&token),
            Err(TokenError::Expired)
        ));
    }

    #[test]
    fn test_role_round_trips() {
        let keys = test_keys();

        for role in [
            UserRole::User,
            UserRole::Agent,
            UserRole::Assistant,
            UserRole::AgencyAdmin,
        ] {
            let token = keys.mint_access(1, 1, role).unwrap();
            assert_eq!(keys.verify_access(&token).unwrap().role, role);
        }
    }
}

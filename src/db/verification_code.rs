//! Single-use, time-bounded verification codes (password reset).
//!
//! Adjacent to the token lifecycle: codes are consumed atomically so a code
//! can never authorize two resets.

use sqlx::sqlite::SqlitePool;

/// What a verification code authorizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerificationKind {
    PasswordReset,
}

impl VerificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            VerificationKind::PasswordReset => "password_reset",
        }
    }
}

#[derive(Clone)]
pub struct VerificationCodeStore {
    pool: SqlitePool,
}

impl VerificationCodeStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Store a code for a user.
    pub async fn create(
        &self,
        code: &str,
        user_id: i64,
        kind: VerificationKind,
        expires_at: i64,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "INSERT INTO verification_codes (code, user_id, kind, expires_at) VALUES (?, ?, ?, ?)",
        )
        .bind(code)
        .bind(user_id)
        .bind(kind.as_str())
        .bind(expires_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Atomically consume a code: delete it and return the owning user id.
    /// Returns None when the code is unknown, of the wrong kind, or expired.
    pub async fn consume(
        &self,
        code: &str,
        kind: VerificationKind,
        now: i64,
    ) -> Result<Option<i64>, sqlx::Error> {
        let row: Option<(i64,)> = sqlx::query_as(
            "DELETE FROM verification_codes
             WHERE code = ? AND kind = ? AND expires_at > ?
             RETURNING user_id",
        )
        .bind(code)
        .bind(kind.as_str())
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|r| r.0))
    }

    /// Delete all codes that expired at or before `now`.
    pub async fn delete_expired(&self, now: i64) -> Result<u64, sqlx::Error> {
        let result = sqlx::query("DELETE FROM verification_codes WHERE expires_at <= ?")
            .bind(now)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

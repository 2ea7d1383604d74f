//! Operational endpoints behind the static shared-secret header.
//!
//! Unrelated to the session system: the [`AdminKey`] guard runs before any
//! session or role logic and compares `x-admin-key` against the configured
//! value.

use axum::{
    Json, Router,
    extract::State,
    response::IntoResponse,
    routing::{delete, get},
};
use serde::Serialize;
use tracing::info;

use super::error::{ApiError, ResultExt};
use crate::auth::{AdminKey, HasAdminKey};
use crate::db::{Database, now_millis};

#[derive(Clone)]
pub struct AdminState {
    pub db: Database,
    pub admin_key: Option<String>,
}

impl HasAdminKey for AdminState {
    fn admin_key(&self) -> Option<&str> {
        self.admin_key.as_deref()
    }
}

pub fn router(state: AdminState) -> Router {
    Router::new()
        .route("/stats", get(stats))
        .route("/sessions/expired", delete(purge_expired_sessions))
        .with_state(state)
}

#[derive(Serialize)]
struct StatsResponse {
    users: i64,
    sessions: i64,
}

async fn stats(
    State(state): State<AdminState>,
    _key: AdminKey,
) -> Result<impl IntoResponse, ApiError> {
    let users = state.db.users().count().await.persist_err("Failed to count users")?;

    let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM sessions")
        .fetch_one(state.db.pool())
        .await
        .persist_err("Failed to count sessions")?;

    Ok(Json(StatsResponse {
        users,
        sessions: row.0,
    }))
}

#[derive(Serialize)]
struct PurgeResponse {
    removed: u64,
}

async fn purge_expired_sessions(
    State(state): State<AdminState>,
    _key: AdminKey,
) -> Result<impl IntoResponse, ApiError> {
    let removed = state
        .db
        .sessions()
        .delete_expired(now_millis())
        .await
        .persist_err("Failed to purge sessions")?;

    if removed > 0 {
        info!(removed, "Purged expired sessions");
    }

    Ok(Json(PurgeResponse { removed }))
}

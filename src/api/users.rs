//! User directory endpoints (agency admins only).

use axum::{Json, Router, extract::State, response::IntoResponse, routing::get};
use serde::Serialize;
use std::sync::Arc;

use super::error::{ApiError, ResultExt};
use crate::auth::{AgencyAdminOnly, AuthWithSession};
use crate::db::{Database, UserRole};
use crate::impl_has_auth_backend;
use crate::jwt::JwtKeys;

#[derive(Clone)]
pub struct UsersState {
    pub db: Database,
    pub jwt: Arc<JwtKeys>,
}

impl_has_auth_backend!(UsersState);

pub fn router(state: UsersState) -> Router {
    Router::new()
        .route("/users", get(list_users))
        .route("/users/", get(list_users))
        .with_state(state)
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct UserSummary {
    id: i64,
    email: String,
    first_name: String,
    last_name: String,
    role: UserRole,
    created_at: i64,
}

/// List all users. Role-gated, and the session row is re-checked so a
/// demoted or logged-out admin loses access immediately.
async fn list_users(
    State(state): State<UsersState>,
    _auth: AuthWithSession<AgencyAdminOnly>,
) -> Result<impl IntoResponse, ApiError> {
    let users = state.db.users().list().await.persist_err("Failed to list users")?;

    let users: Vec<UserSummary> = users
        .into_iter()
        .map(|u| UserSummary {
            id: u.id,
            email: u.email,
            first_name: u.first_name,
            last_name: u.last_name,
            role: u.role,
            created_at: u.created_at,
        })
        .collect();

    Ok(Json(users))
}

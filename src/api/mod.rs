mod admin;
mod auth;
mod error;
mod users;

use axum::Router;
use std::sync::Arc;

use crate::db::Database;
use crate::jwt::JwtKeys;

pub use auth::AuthApiState;

/// Create the API router.
pub fn create_api_router(
    db: Database,
    jwt: Arc<JwtKeys>,
    secure_cookies: bool,
    admin_key: Option<String>,
) -> Router {
    let auth_state = auth::AuthApiState {
        db: db.clone(),
        jwt: jwt.clone(),
        secure_cookies,
    };

    let users_state = users::UsersState {
        db: db.clone(),
        jwt,
    };

    let admin_state = admin::AdminState { db, admin_key };

    Router::new()
        .nest("/auth", auth::router(auth_state))
        .merge(users::router(users_state))
        .nest("/admin", admin::router(admin_state))
}

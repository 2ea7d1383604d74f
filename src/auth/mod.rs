//! Credential extraction and request guards.
//!
//! Per-request chain: locate a candidate access token (Authorization header
//! first, `accessToken` cookie second), verify it, attach the decoded claims
//! to the request, then optionally enforce a role allow-set. A separate
//! static shared-secret guard protects administrative endpoints.

mod cookie;
mod errors;
mod extractors;
mod state;

pub use cookie::{
    ACCESS_COOKIE_NAME, REFRESH_COOKIE_NAME, auth_cookie, clear_cookie, get_cookie,
};
pub use errors::AuthError;
pub use extractors::{
    AdminKey, AgencyAdminOnly, AnyRole, Auth, AuthWithSession, RoleConstraint, StaffOnly,
    bearer_token,
};
pub use state::{HasAdminKey, HasAuthBackend};

//! Guard state traits and impl macro.

use crate::db::Database;
use crate::jwt::JwtKeys;

/// Trait for state types that provide database and JWT access to the guards.
pub trait HasAuthBackend {
    fn jwt(&self) -> &JwtKeys;
    fn db(&self) -> &Database;
}

/// Trait for state types carrying the administrative shared secret.
/// `None` means misconfigured; the admin guard then rejects everything.
pub trait HasAdminKey {
    fn admin_key(&self) -> Option<&str>;
}

/// Implement `HasAuthBackend` for state structs with the standard fields
/// `jwt: Arc<JwtKeys>` and `db: Database`.
#[macro_export]
macro_rules! impl_has_auth_backend {
    ($state_type:ty) => {
        impl $crate::auth::HasAuthBackend for $state_type {
            fn jwt(&self) -> &$crate::jwt::JwtKeys {
                &self.jwt
            }
            fn db(&self) -> &$crate::db::Database {
                &self.db
            }
        }
    };
}

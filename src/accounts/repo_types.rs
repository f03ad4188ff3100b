use serde::Serialize;
use sqlx::FromRow;
use time::OffsetDateTime;

use super::{error::UserError, password::PasswordScheme};

/// User record in the database.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, FromRow)]
pub struct User {
    pub id: i64,
    pub username: String, // stored lowercased
    #[serde(skip_serializing)]
    pub password_hash: String, // "" means no password set yet
    pub verified: bool,
    #[serde(skip_serializing)]
    pub verification_code: String,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

impl User {
    /// Returns a copy with `password_hash` replaced by the digest of `plain`.
    pub fn set_password(
        mut self,
        scheme: &dyn PasswordScheme,
        plain: &str,
    ) -> Result<User, UserError> {
        self.password_hash = scheme.hash(plain)?;
        Ok(self)
    }

    /// Checks `plain` against the stored digest. Always false for the empty sentinel.
    pub fn password_valid(&self, scheme: &dyn PasswordScheme, plain: &str) -> bool {
        if self.password_hash.is_empty() {
            return false;
        }
        scheme.verify(&self.password_hash, plain)
    }
}

/// A user that has not been inserted yet; storage assigns the id.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub username: String,
    pub password_hash: String,
    pub verification_code: String,
    pub created_at: OffsetDateTime,
}

/// Outstanding password reset challenge, at most one per user.
#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct PasswordResetRequest {
    pub user_id: i64,
    pub ip_address: String,
    pub user_agent: String,
    pub token: String,
    pub expires_at: OffsetDateTime,
}

impl PasswordResetRequest {
    pub fn is_live(&self, now: OffsetDateTime) -> bool {
        self.expires_at > now
    }
}

/// Reset request fields known before the user row is resolved.
#[derive(Debug, Clone)]
pub struct ResetDraft {
    pub ip_address: String,
    pub user_agent: String,
    pub token: String,
    pub expires_at: OffsetDateTime,
}

impl ResetDraft {
    pub(crate) fn for_user(self, user_id: i64) -> PasswordResetRequest {
        PasswordResetRequest {
            user_id,
            ip_address: self.ip_address,
            user_agent: self.user_agent,
            token: self.token,
            expires_at: self.expires_at,
        }
    }
}

use async_trait::async_trait;
use time::OffsetDateTime;

use super::{
    error::UserError,
    repo_types::{NewUser, PasswordResetRequest, ResetDraft, User},
};

/// Rewrites a user inside a storage transaction, e.g. by setting a new password.
pub type UserRewrite<'a> = &'a (dyn Fn(User) -> Result<User, UserError> + Send + Sync);

/// Persistence for users and reset requests.
///
/// Every method is its own transaction boundary (or a plain pooled read). Implementations must
/// refresh `updated_at` on every user write.
#[async_trait]
pub trait UserStore: Send + Sync {
    /// Inserts a user. A duplicate username yields [`UserError::UsernameTaken`].
    async fn insert_user(&self, new_user: NewUser) -> Result<User, UserError>;

    async fn find_by_id(&self, id: i64) -> Result<Option<User>, UserError>;

    async fn find_by_username(&self, username: &str) -> Result<Option<User>, UserError>;

    /// Sets `verified` where both id and code match. Returns the number of rows touched.
    async fn mark_verified(
        &self,
        id: i64,
        verification_code: &str,
        now: OffsetDateTime,
    ) -> Result<u64, UserError>;

    /// Replaces any reset request of `username` with a fresh one built from `draft`.
    /// `None` when the user does not exist.
    async fn replace_reset_request(
        &self,
        username: &str,
        draft: ResetDraft,
    ) -> Result<Option<(User, PasswordResetRequest)>, UserError>;

    /// Consumes a live `(user_id, token)` reset request and persists `rewrite(user)`.
    /// Both effects commit together or not at all. `false` when nothing matched.
    async fn redeem_reset(
        &self,
        user_id: i64,
        token: &str,
        now: OffsetDateTime,
        rewrite: UserRewrite<'_>,
    ) -> Result<bool, UserError>;
}

use std::{
    collections::{BTreeMap, HashMap},
    sync::{Mutex, MutexGuard, PoisonError},
};

use async_trait::async_trait;
use time::OffsetDateTime;

use super::{
    error::UserError,
    repo_types::{NewUser, PasswordResetRequest, ResetDraft, User},
    store::{UserRewrite, UserStore},
};

#[derive(Default)]
struct Tables {
    next_id: i64,
    users: BTreeMap<i64, User>,
    resets: HashMap<i64, PasswordResetRequest>,
}

impl Tables {
    fn user_by_username(&self, username: &str) -> Option<&User> {
        self.users.values().find(|u| u.username == username)
    }
}

/// In-process [`UserStore`]. One mutex stands in for the transaction boundary.
#[derive(Default)]
pub struct MemoryUserStore {
    tables: Mutex<Tables>,
}

impl MemoryUserStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Tables> {
        self.tables.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Number of reset rows currently held, across all users.
    pub fn reset_count(&self) -> usize {
        self.lock().resets.len()
    }

    /// The outstanding reset request for a user, if any.
    pub fn reset_request_for(&self, user_id: i64) -> Option<PasswordResetRequest> {
        self.lock().resets.get(&user_id).cloned()
    }

    /// Overwrites a reset request's expiry.
    pub fn set_reset_expiry(&self, user_id: i64, expires_at: OffsetDateTime) -> bool {
        match self.lock().resets.get_mut(&user_id) {
            Some(req) => {
                req.expires_at = expires_at;
                true
            }
            None => false,
        }
    }
}

#[async_trait]
impl UserStore for MemoryUserStore {
    async fn insert_user(&self, new_user: NewUser) -> Result<User, UserError> {
        let mut t = self.lock();
        if t.user_by_username(&new_user.username).is_some() {
            return Err(UserError::UsernameTaken(new_user.username));
        }
        t.next_id += 1;
        let user = User {
            id: t.next_id,
            username: new_user.username,
            password_hash: new_user.password_hash,
            verified: false,
            verification_code: new_user.verification_code,
            created_at: new_user.created_at,
            updated_at: new_user.created_at,
        };
        t.users.insert(user.id, user.clone());
        Ok(user)
    }

    async fn find_by_id(&self, id: i64) -> Result<Option<User>, UserError> {
        Ok(self.lock().users.get(&id).cloned())
    }

    async fn find_by_username(&self, username: &str) -> Result<Option<User>, UserError> {
        Ok(self.lock().user_by_username(username).cloned())
    }

    async fn mark_verified(
        &self,
        id: i64,
        verification_code: &str,
        now: OffsetDateTime,
    ) -> Result<u64, UserError> {
        let mut t = self.lock();
        match t.users.get_mut(&id) {
            Some(user) if user.verification_code == verification_code => {
                user.verified = true;
                user.updated_at = now;
                Ok(1)
            }
            _ => Ok(0),
        }
    }

    async fn replace_reset_request(
        &self,
        username: &str,
        draft: ResetDraft,
    ) -> Result<Option<(User, PasswordResetRequest)>, UserError> {
        let mut t = self.lock();
        let Some(user) = t.user_by_username(username).cloned() else {
            return Ok(None);
        };
        let request = draft.for_user(user.id);
        t.resets.insert(user.id, request.clone());
        Ok(Some((user, request)))
    }

    async fn redeem_reset(
        &self,
        user_id: i64,
        token: &str,
        now: OffsetDateTime,
        rewrite: UserRewrite<'_>,
    ) -> Result<bool, UserError> {
        let mut t = self.lock();
        let matched = t
            .resets
            .get(&user_id)
            .is_some_and(|req| req.token == token && req.is_live(now));
        if !matched {
            return Ok(false);
        }
        let Some(user) = t.users.get(&user_id).cloned() else {
            return Ok(false);
        };
        // Rewrite before touching either table so a failure leaves both unchanged.
        let mut user = rewrite(user)?;
        user.updated_at = now;
        t.resets.remove(&user_id);
        t.users.insert(user_id, user);
        Ok(true)
    }
}

use std::sync::Arc;

use time::Duration;
use tracing::{debug, info, instrument};

use super::{
    clock::{Clock, SystemClock},
    error::UserError,
    password::{Argon2Scheme, PasswordScheme},
    repo_types::{NewUser, ResetDraft, User},
    store::UserStore,
    tokens::{RandomTokens, TokenSource},
};

pub const DEFAULT_RESET_TTL: Duration = Duration::hours(24);

pub(crate) fn normalize_username(username: &str) -> String {
    username.to_lowercase()
}

/// Transactional user operations. Holds no state beyond its collaborators, so clones are cheap
/// and can be shared across requests.
#[derive(Clone)]
pub struct UserManager {
    store: Arc<dyn UserStore>,
    passwords: Arc<dyn PasswordScheme>,
    clock: Arc<dyn Clock>,
    tokens: Arc<dyn TokenSource>,
    reset_ttl: Duration,
}

impl UserManager {
    pub fn new(store: Arc<dyn UserStore>) -> Self {
        Self {
            store,
            passwords: Arc::new(Argon2Scheme::default()),
            clock: Arc::new(SystemClock),
            tokens: Arc::new(RandomTokens::default()),
            reset_ttl: DEFAULT_RESET_TTL,
        }
    }

    pub fn with_passwords(mut self, passwords: Arc<dyn PasswordScheme>) -> Self {
        self.passwords = passwords;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_tokens(mut self, tokens: Arc<dyn TokenSource>) -> Self {
        self.tokens = tokens;
        self
    }

    pub fn with_reset_ttl(mut self, ttl: Duration) -> Self {
        self.reset_ttl = ttl;
        self
    }

    /// Creates a user with a lowercased username, hashed password and fresh verification code.
    #[instrument(name = "users.create", skip(self, password))]
    pub async fn create(&self, username: &str, password: &str) -> Result<User, UserError> {
        let username = normalize_username(username);
        if username.is_empty() {
            return Err(UserError::InvalidUsername);
        }

        let new_user = NewUser {
            username,
            password_hash: self.passwords.hash(password)?,
            verification_code: self.tokens.generate(),
            created_at: self.clock.now(),
        };
        let user = self.store.insert_user(new_user).await?;
        info!(user_id = user.id, "user created");
        Ok(user)
    }

    /// Issues a reset token, replacing any earlier one. `None` for unknown usernames.
    #[instrument(name = "users.create_reset_token", skip(self, user_agent))]
    pub async fn create_reset_token(
        &self,
        username: &str,
        ip_address: &str,
        user_agent: &str,
    ) -> Result<Option<(User, String)>, UserError> {
        let draft = ResetDraft {
            ip_address: ip_address.to_owned(),
            user_agent: user_agent.to_owned(),
            token: self.tokens.generate(),
            expires_at: self.clock.now() + self.reset_ttl,
        };
        let issued = self
            .store
            .replace_reset_request(&normalize_username(username), draft)
            .await?;
        match issued {
            Some((user, request)) => {
                info!(user_id = user.id, expires_at = %request.expires_at, "reset token issued");
                Ok(Some((user, request.token)))
            }
            None => {
                debug!("reset requested for unknown username");
                Ok(None)
            }
        }
    }

    #[instrument(name = "users.lookup_by_id", skip(self))]
    pub async fn lookup_by_id(&self, id: i64) -> Result<Option<User>, UserError> {
        if id <= 0 {
            return Ok(None);
        }
        self.store.find_by_id(id).await
    }

    /// Exact match against the stored (already lowercased) username.
    #[instrument(name = "users.lookup_by_username", skip(self))]
    pub async fn lookup_by_username(&self, username: &str) -> Result<Option<User>, UserError> {
        self.store.find_by_username(username).await
    }

    /// The user when the credentials match; `None` for an unknown user or a wrong password alike.
    #[instrument(name = "users.login", skip(self, password))]
    pub async fn login(&self, username: &str, password: &str) -> Result<Option<User>, UserError> {
        let user = self
            .store
            .find_by_username(&normalize_username(username))
            .await?;
        Ok(user.filter(|u| u.password_valid(self.passwords.as_ref(), password)))
    }

    /// Marks the user verified when the code matches. Mismatches are silently ignored.
    #[instrument(name = "users.verify", skip(self, verification_code))]
    pub async fn verify(&self, id: i64, verification_code: &str) -> Result<(), UserError> {
        let rows = self
            .store
            .mark_verified(id, verification_code, self.clock.now())
            .await?;
        debug!(rows, "verify applied");
        Ok(())
    }

    /// Consumes a live reset token and sets a new password. `false` if no live token matched.
    #[instrument(name = "users.reset_password", skip(self, token, new_password))]
    pub async fn reset_password(
        &self,
        user_id: i64,
        token: &str,
        new_password: &str,
    ) -> Result<bool, UserError> {
        let passwords = self.passwords.as_ref();
        let rewrite = |user: User| user.set_password(passwords, new_password);
        let reset = self
            .store
            .redeem_reset(user_id, token, self.clock.now(), &rewrite)
            .await?;
        if reset {
            info!(user_id, "password reset");
        }
        Ok(reset)
    }
}

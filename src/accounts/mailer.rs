use async_trait::async_trait;
use tracing::debug;

use super::repo_types::User;

/// Delivers verification codes and reset tokens to users.
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send_verification(&self, user: &User) -> anyhow::Result<()>;
    async fn send_reset(&self, user: &User, token: &str) -> anyhow::Result<()>;
}

/// Mailer that only records that a mail would have gone out. Codes and tokens are credentials
/// and never reach the log.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send_verification(&self, user: &User) -> anyhow::Result<()> {
        debug!(user_id = user.id, "verification mail");
        Ok(())
    }

    async fn send_reset(&self, user: &User, _token: &str) -> anyhow::Result<()> {
        debug!(user_id = user.id, "password reset mail");
        Ok(())
    }
}

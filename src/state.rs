use std::sync::Arc;

use anyhow::Context;
use sqlx::postgres::PgPoolOptions;

use crate::accounts::{
    mailer::{LogMailer, Mailer},
    memory::MemoryUserStore,
    password::Argon2Scheme,
    repo::PgUserStore,
    store::UserStore,
    UserManager,
};
use crate::config::AppConfig;

#[derive(Clone)]
pub struct AppState {
    pub users: UserManager,
    pub mailer: Arc<dyn Mailer>,
    pub config: Arc<AppConfig>,
}

impl AppState {
    pub async fn init() -> anyhow::Result<Self> {
        let config = Arc::new(AppConfig::from_env()?);

        let db = PgPoolOptions::new()
            .max_connections(config.db_max_connections)
            .connect(&config.database_url)
            .await
            .context("connect to database")?;

        if let Err(e) = crate::MIGRATOR.run(&db).await {
            tracing::warn!(error = %e, "migration failed; continuing");
        }

        let store = Arc::new(PgUserStore::new(db)) as Arc<dyn UserStore>;
        Self::from_parts(store, Arc::new(LogMailer), config)
    }

    pub fn from_parts(
        store: Arc<dyn UserStore>,
        mailer: Arc<dyn Mailer>,
        config: Arc<AppConfig>,
    ) -> anyhow::Result<Self> {
        let passwords =
            Argon2Scheme::from_config(&config.password).context("argon2 parameters")?;
        let users = UserManager::new(store)
            .with_passwords(Arc::new(passwords))
            .with_reset_ttl(config.reset_token_ttl());
        Ok(Self {
            users,
            mailer,
            config,
        })
    }

    /// State backed by [`MemoryUserStore`], for running without Postgres.
    pub fn in_memory(config: AppConfig) -> anyhow::Result<Self> {
        Self::from_parts(
            Arc::new(MemoryUserStore::new()),
            Arc::new(LogMailer),
            Arc::new(config),
        )
    }
}

//! User accounts: registration, login, email verification and password reset on Postgres.

pub mod accounts;
pub mod app;
pub mod config;
pub mod state;

pub static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");

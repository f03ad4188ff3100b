use crate::state::AppState;
use axum::Router;

pub mod clock;
pub mod dto;
pub mod error;
pub mod handlers;
pub mod mailer;
pub mod memory;
pub mod password;
pub mod repo;
pub mod repo_types;
pub mod services;
pub mod store;
pub mod tokens;

pub use error::UserError;
pub use repo_types::{PasswordResetRequest, User};
pub use services::UserManager;

pub fn router() -> Router<AppState> {
    Router::new().merge(handlers::auth_routes())
}

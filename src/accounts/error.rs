use thiserror::Error;

/// Failures surfaced by the user manager.
///
/// Negative outcomes such as "no such user", "wrong password" or "expired token" are not errors;
/// they come back as `None`/`false` so callers cannot tell which half of a check failed.
#[derive(Debug, Error)]
pub enum UserError {
    #[error("username {0:?} is already taken")]
    UsernameTaken(String),

    #[error("username must not be empty")]
    InvalidUsername,

    #[error("password hashing failed: {0}")]
    PasswordHash(String),

    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

impl UserError {
    pub fn is_username_taken(&self) -> bool {
        matches!(self, UserError::UsernameTaken(_))
    }
}

/// Postgres SQLSTATE for `unique_violation`.
const UNIQUE_VIOLATION: &str = "23505";

/// True when `err` is a unique violation on the named constraint.
pub(crate) fn is_unique_violation(err: &sqlx::Error, constraint: &str) -> bool {
    match err {
        sqlx::Error::Database(db_err) => {
            db_err.code().as_deref() == Some(UNIQUE_VIOLATION)
                && db_err.constraint() == Some(constraint)
        }
        _ => false,
    }
}

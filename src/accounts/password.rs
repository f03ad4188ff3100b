use argon2::{
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Algorithm, Argon2, Params, Version,
};
use rand::rngs::OsRng;
use tracing::{error, warn};

use super::error::UserError;
use crate::config::PasswordConfig;

/// Memory-hard password hashing capability used by the user helpers.
pub trait PasswordScheme: Send + Sync {
    fn hash(&self, plain: &str) -> Result<String, UserError>;

    /// Constant-time check of `plain` against a stored digest.
    fn verify(&self, digest: &str, plain: &str) -> bool;
}

/// Argon2id with PHC-string digests.
#[derive(Clone)]
pub struct Argon2Scheme {
    argon2: Argon2<'static>,
}

impl Argon2Scheme {
    pub fn new(memory_kib: u32, iterations: u32, parallelism: u32) -> Result<Self, UserError> {
        let params = Params::new(memory_kib, iterations, parallelism, None)
            .map_err(|e| UserError::PasswordHash(e.to_string()))?;
        Ok(Self {
            argon2: Argon2::new(Algorithm::Argon2id, Version::V0x13, params),
        })
    }

    pub fn from_config(cfg: &PasswordConfig) -> Result<Self, UserError> {
        Self::new(cfg.memory_kib, cfg.iterations, cfg.parallelism)
    }

    #[cfg(test)]
    pub(crate) fn fast_for_tests() -> Self {
        Self::new(8, 1, 1).expect("valid argon2 params")
    }
}

impl Default for Argon2Scheme {
    fn default() -> Self {
        Self {
            argon2: Argon2::default(),
        }
    }
}

impl PasswordScheme for Argon2Scheme {
    fn hash(&self, plain: &str) -> Result<String, UserError> {
        let salt = SaltString::generate(&mut OsRng);
        let hash = self
            .argon2
            .hash_password(plain.as_bytes(), &salt)
            .map_err(|e| {
                error!(error = %e, "argon2 hash_password error");
                UserError::PasswordHash(e.to_string())
            })?
            .to_string();
        Ok(hash)
    }

    fn verify(&self, digest: &str, plain: &str) -> bool {
        let parsed = match PasswordHash::new(digest) {
            Ok(p) => p,
            Err(e) => {
                warn!(error = %e, "argon2 parse hash error");
                return false;
            }
        };
        self.argon2
            .verify_password(plain.as_bytes(), &parsed)
            .is_ok()
    }
}

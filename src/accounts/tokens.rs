use std::sync::atomic::{AtomicU64, Ordering};

use rand::{distributions::Alphanumeric, rngs::OsRng, Rng};

/// Source of reset tokens and verification codes.
pub trait TokenSource: Send + Sync {
    /// Returns a fresh non-empty token.
    fn generate(&self) -> String;
}

pub const DEFAULT_TOKEN_LEN: usize = 32;

/// Alphanumeric tokens drawn from the OS RNG.
#[derive(Debug, Clone, Copy)]
pub struct RandomTokens {
    len: usize,
}

impl RandomTokens {
    pub fn new(len: usize) -> Self {
        Self { len: len.max(1) }
    }
}

impl Default for RandomTokens {
    fn default() -> Self {
        Self::new(DEFAULT_TOKEN_LEN)
    }
}

impl TokenSource for RandomTokens {
    fn generate(&self) -> String {
        OsRng
            .sample_iter(&Alphanumeric)
            .take(self.len)
            .map(char::from)
            .collect()
    }
}

/// Deterministic `<prefix>-1`, `<prefix>-2`, ... tokens.
#[derive(Debug)]
pub struct SequentialTokens {
    prefix: String,
    next: AtomicU64,
}

impl SequentialTokens {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            next: AtomicU64::new(1),
        }
    }
}

impl TokenSource for SequentialTokens {
    fn generate(&self) -> String {
        let n = self.next.fetch_add(1, Ordering::Relaxed);
        format!("{}-{}", self.prefix, n)
    }
}

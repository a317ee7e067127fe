//! bcrypt password hashing.
//!
//! bcrypt is deliberately slow, so both operations run on the blocking pool
//! to keep it off the async workers.

use crate::error::{AuthError, Result};

/// Hashes and checks passwords with a fixed bcrypt cost.
#[derive(Debug, Clone, Copy)]
pub struct PasswordHasher {
    cost: u32,
}

impl PasswordHasher {
    /// Create a hasher with the given cost (work factor).
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Configuration`] if `cost` is outside the range
    /// bcrypt accepts (4 to 31).
    pub fn new(cost: u32) -> Result<Self> {
        if (4..=31).contains(&cost) {
            Ok(Self { cost })
        } else {
            Err(AuthError::Configuration(format!(
                "bcrypt cost {cost} is outside 4..=31"
            )))
        }
    }

    /// The configured cost.
    #[must_use]
    pub const fn cost(&self) -> u32 {
        self.cost
    }

    /// Hash a password.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::HashingFailed`] if bcrypt fails.
    pub async fn hash(&self, password: &str) -> Result<String> {
        let password = password.to_string();
        let cost = self.cost;
        tokio::task::spawn_blocking(move || bcrypt::hash(password, cost))
            .await
            .map_err(|e| AuthError::HashingFailed(e.to_string()))?
            .map_err(|e| AuthError::HashingFailed(e.to_string()))
    }

    /// Check a password against a stored hash.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::HashingFailed`] if the stored hash is not a
    /// valid bcrypt string.
    pub async fn verify(&self, password: &str, hash: &str) -> Result<bool> {
        let password = password.to_string();
        let hash = hash.to_string();
        tokio::task::spawn_blocking(move || bcrypt::verify(password, &hash))
            .await
            .map_err(|e| AuthError::HashingFailed(e.to_string()))?
            .map_err(|e| AuthError::HashingFailed(e.to_string()))
    }
}

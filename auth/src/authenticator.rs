//! Password login and per-request token authentication.

use crate::error::{AuthError, Result};
use crate::password::PasswordHasher;
use crate::token::TokenService;
use crate::users::UserRepository;
use conversion_report_core::principal::Principal;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Turns credentials into tokens and tokens into principals.
///
/// The role in a token is informational only: [`Authenticator::authenticate`]
/// reloads the user on every call, so role changes take effect immediately
/// and a deleted user's token stops working.
pub struct Authenticator {
    users: Arc<dyn UserRepository>,
    tokens: TokenService,
    hasher: PasswordHasher,
}

impl Authenticator {
    /// Create an authenticator.
    #[must_use]
    pub fn new(users: Arc<dyn UserRepository>, tokens: TokenService, hasher: PasswordHasher) -> Self {
        Self {
            users,
            tokens,
            hasher,
        }
    }

    /// The password hasher, for seeding accounts with the same cost.
    #[must_use]
    pub const fn hasher(&self) -> &PasswordHasher {
        &self.hasher
    }

    /// The user repository.
    #[must_use]
    pub fn users(&self) -> &dyn UserRepository {
        self.users.as_ref()
    }

    /// Check a username and password and issue a token.
    ///
    /// # Errors
    ///
    /// - [`AuthError::InvalidCredentials`] for an unknown user or wrong password
    /// - [`AuthError::DatabaseError`] or [`AuthError::HashingFailed`] on system failure
    pub async fn login(&self, username: &str, password: &str) -> Result<String> {
        let Some(user) = self.users.find_by_username(username).await? else {
            warn!(username, "Login failed: unknown user");
            return Err(AuthError::InvalidCredentials);
        };

        if !self.hasher.verify(password, &user.password_hash).await? {
            warn!(username, "Login failed: wrong password");
            return Err(AuthError::InvalidCredentials);
        }

        let token = self.tokens.issue(&user.principal())?;
        info!(username, role = %user.role, "User logged in");
        Ok(token)
    }

    /// Verify a bearer token and load the current principal.
    ///
    /// # Errors
    ///
    /// - [`AuthError::InvalidToken`] or [`AuthError::TokenExpired`] for a bad token
    /// - [`AuthError::UnknownUser`] if the account no longer exists
    /// - [`AuthError::DatabaseError`] if the user lookup fails
    pub async fn authenticate(&self, token: &str) -> Result<Principal> {
        let claims = self.tokens.verify(token)?;
        let user = self
            .users
            .find_by_username(&claims.sub)
            .await?
            .ok_or_else(|| AuthError::UnknownUser(claims.sub.clone()))?;

        if user.role.as_str() != claims.role {
            debug!(
                username = %user.username,
                token_role = %claims.role,
                current_role = %user.role,
                "Role changed since token was issued"
            );
        }
        Ok(user.principal())
    }
}

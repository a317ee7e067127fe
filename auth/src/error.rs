//! Error types for authentication operations.

use thiserror::Error;

/// Result type alias for authentication operations.
pub type Result<T> = std::result::Result<T, AuthError>;

/// Everything that can go wrong while logging in or checking a token.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthError {
    // ═══════════════════════════════════════════════════════════
    // Authentication Errors
    // ═══════════════════════════════════════════════════════════

    /// Unknown username or wrong password.
    #[error("Invalid credentials")]
    InvalidCredentials,

    /// No bearer token was presented.
    #[error("Missing bearer token")]
    MissingToken,

    /// The token is malformed, badly signed or carries bad claims.
    #[error("Invalid token: {0}")]
    InvalidToken(String),

    /// The token was valid but its `exp` has passed.
    #[error("Token has expired")]
    TokenExpired,

    /// The token names a user that no longer exists.
    #[error("Unknown user: {0}")]
    UnknownUser(String),

    // ═══════════════════════════════════════════════════════════
    // System Errors
    // ═══════════════════════════════════════════════════════════

    /// User storage failed.
    #[error("Database error: {0}")]
    DatabaseError(String),

    /// bcrypt failed to hash or check a password.
    #[error("Password hashing failed: {0}")]
    HashingFailed(String),

    /// A token could not be signed.
    #[error("Token signing failed: {0}")]
    SigningFailed(String),

    /// The authenticator was set up with unusable settings.
    #[error("Invalid auth configuration: {0}")]
    Configuration(String),
}

impl AuthError {
    /// Returns `true` if this error is the caller's fault (maps to 401).
    ///
    /// # Examples
    ///
    /// ```
    /// # use conversion_report_auth::AuthError;
    /// assert!(AuthError::TokenExpired.is_user_error());
    /// assert!(!AuthError::DatabaseError("down".into()).is_user_error());
    /// ```
    #[must_use]
    pub const fn is_user_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidCredentials
                | Self::MissingToken
                | Self::InvalidToken(_)
                | Self::TokenExpired
                | Self::UnknownUser(_)
        )
    }
}

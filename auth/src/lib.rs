//! # Conversion Report Authentication
//!
//! Username/password login with bcrypt, stateless bearer tokens (JWT, HS256),
//! and per-request resolution of the caller's [`Principal`].
//!
//! ## Flow
//!
//! ```text
//! POST /api/auth/login {username, password}
//!     → Authenticator::login → bcrypt verify → TokenService::issue → {token}
//!
//! Authorization: Bearer <token>
//!     → Authenticator::authenticate → TokenService::verify
//!     → UserRepository::find_by_username → Principal {username, role}
//! ```
//!
//! ## Example
//!
//! ```rust,ignore
//! use conversion_report_auth::*;
//!
//! let tokens = TokenService::new(secret.as_bytes(), Duration::from_secs(86_400), clock)?;
//! let auth = Authenticator::new(users, tokens, PasswordHasher::new(12)?);
//!
//! let token = auth.login("user", "password").await?;
//! let principal = auth.authenticate(&token).await?;
//! ```
//!
//! [`Principal`]: conversion_report_core::principal::Principal

#![forbid(unsafe_code)]
#![warn(missing_docs)]

// Public modules
pub mod authenticator;
pub mod error;
pub mod password;
pub mod token;
pub mod users;

/// Mock repositories for testing.
#[cfg(any(test, feature = "test-utils"))]
pub mod mocks;

// Re-export main types for convenience
pub use authenticator::Authenticator;
pub use error::{AuthError, Result};
pub use password::PasswordHasher;
pub use token::{Claims, TokenService};
pub use users::{DEFAULT_USERS, User, UserFuture, UserRepository, seed_default_users};

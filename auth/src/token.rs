//! Signed bearer tokens (JWT, HS256).
//!
//! Claims carry the username in `sub`, the role at issue time in `role`, and
//! `iat`/`exp` as Unix seconds. Expiry is checked against the injected
//! [`Clock`], not the system time, so tests can move time forward.

use crate::error::{AuthError, Result};
use chrono::Duration;
use conversion_report_core::clock::Clock;
use conversion_report_core::principal::Principal;
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Minimum length of a configured signing secret, in bytes.
pub const MIN_SECRET_LEN: usize = 32;

/// Decoded token claims.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// Username.
    pub sub: String,
    /// Role name at issue time.
    pub role: String,
    /// Issued at, Unix seconds.
    pub iat: i64,
    /// Expires at, Unix seconds.
    pub exp: i64,
}

/// Issues and verifies bearer tokens.
pub struct TokenService {
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
    ttl: Duration,
    clock: Arc<dyn Clock>,
}

impl TokenService {
    /// Create a service signing with `secret`.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Configuration`] if the secret is shorter than
    /// [`MIN_SECRET_LEN`] bytes or the ttl is not positive.
    pub fn new(secret: &[u8], ttl: std::time::Duration, clock: Arc<dyn Clock>) -> Result<Self> {
        if secret.len() < MIN_SECRET_LEN {
            return Err(AuthError::Configuration(format!(
                "signing secret must be at least {MIN_SECRET_LEN} bytes"
            )));
        }
        let ttl = Duration::from_std(ttl)
            .ok()
            .filter(|ttl| *ttl > Duration::zero())
            .ok_or_else(|| AuthError::Configuration("token ttl must be positive".to_string()))?;

        let mut validation = Validation::new(Algorithm::HS256);
        // Expiry is checked against the injected clock in `verify`.
        validation.validate_exp = false;
        validation.set_required_spec_claims(&["sub", "exp"]);

        Ok(Self {
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
            validation,
            ttl,
            clock,
        })
    }

    /// Create a service with a random secret.
    ///
    /// Tokens do not survive a restart. Only meant for tests and local runs.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Configuration`] if the ttl is not positive.
    pub fn ephemeral(ttl: std::time::Duration, clock: Arc<dyn Clock>) -> Result<Self> {
        let mut secret = [0_u8; 64];
        rand::thread_rng().fill_bytes(&mut secret);
        tracing::warn!("Using an ephemeral token secret; tokens will not survive a restart");
        Self::new(&secret, ttl, clock)
    }

    /// Sign a token for `principal`.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::SigningFailed`] if encoding fails.
    pub fn issue(&self, principal: &Principal) -> Result<String> {
        let now = self.clock.now();
        let claims = Claims {
            sub: principal.username.clone(),
            role: principal.role.as_str().to_string(),
            iat: now.timestamp(),
            exp: (now + self.ttl).timestamp(),
        };

        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(|e| AuthError::SigningFailed(e.to_string()))
    }

    /// Check signature and expiry and return the claims.
    ///
    /// # Errors
    ///
    /// - [`AuthError::TokenExpired`] if `exp` is not in the future
    /// - [`AuthError::InvalidToken`] for anything else wrong with the token
    pub fn verify(&self, token: &str) -> Result<Claims> {
        let data = decode::<Claims>(token, &self.decoding, &self.validation).map_err(|e| {
            match e.kind() {
                ErrorKind::ExpiredSignature => AuthError::TokenExpired,
                _ => AuthError::InvalidToken(e.to_string()),
            }
        })?;

        if data.claims.exp <= self.clock.now().timestamp() {
            return Err(AuthError::TokenExpired);
        }
        Ok(data.claims)
    }
}

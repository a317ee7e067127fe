//! Custom Axum extractors.
//!
//! - [`BearerToken`]: the raw token from `Authorization: Bearer <token>`
//! - [`AuthenticatedUser`]: the caller's current [`Principal`], resolved
//!   through the [`Authenticator`]
//! - [`ValidJson`]: `Json<T>` whose rejections become 400 [`AppError`]s
//!
//! # Examples
//!
//! ```ignore
//! async fn handler(
//!     AuthenticatedUser(principal): AuthenticatedUser,
//!     ValidJson(body): ValidJson<ReportRequestDto>,
//! ) -> Result<Json<ReportIdResponse>, AppError> {
//!     tracing::info!(user = %principal.username, "Processing request");
//!     ...
//! }
//! ```

use crate::error::AppError;
use axum::{
    Json, async_trait,
    extract::{FromRef, FromRequest, FromRequestParts, Request},
    http::{header::AUTHORIZATION, request::Parts},
};
use conversion_report_auth::Authenticator;
use conversion_report_core::principal::Principal;
use serde::de::DeserializeOwned;
use std::sync::Arc;

/// Bearer token from the `Authorization` header.
///
/// The scheme is matched case-insensitively.
#[derive(Debug, Clone)]
pub struct BearerToken(pub String);

#[async_trait]
impl<S> FromRequestParts<S> for BearerToken
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get(AUTHORIZATION)
            .ok_or_else(|| AppError::unauthorized("Missing bearer token"))?
            .to_str()
            .map_err(|_| AppError::unauthorized("Malformed Authorization header"))?;

        parse_bearer(header)
            .map(|token| Self(token.to_string()))
            .ok_or_else(|| AppError::unauthorized("Authorization scheme must be Bearer"))
    }
}

fn parse_bearer(header: &str) -> Option<&str> {
    let (scheme, token) = header.trim().split_once(' ')?;
    let token = token.trim();
    (scheme.eq_ignore_ascii_case("bearer") && !token.is_empty()).then_some(token)
}

/// The authenticated caller.
///
/// Verifies the bearer token and reloads the user, so the role is always
/// the one currently stored.
#[derive(Debug, Clone)]
pub struct AuthenticatedUser(pub Principal);

#[async_trait]
impl<S> FromRequestParts<S> for AuthenticatedUser
where
    Arc<Authenticator>: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let BearerToken(token) = BearerToken::from_request_parts(parts, state).await?;
        let auth = Arc::<Authenticator>::from_ref(state);
        let principal = auth.authenticate(&token).await?;
        Ok(Self(principal))
    }
}

/// JSON body whose rejections (bad syntax, missing fields, wrong content
/// type) are reported as 400 with the usual error body.
#[derive(Debug, Clone)]
pub struct ValidJson<T>(pub T);

#[async_trait]
impl<S, T> FromRequest<S> for ValidJson<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(req, state)
            .await
            .map_err(|rejection| AppError::bad_request(rejection.body_text()))?;
        Ok(Self(value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bearer_scheme_is_case_insensitive() {
        assert_eq!(parse_bearer("Bearer abc.def"), Some("abc.def"));
        assert_eq!(parse_bearer("bearer abc.def"), Some("abc.def"));
        assert_eq!(parse_bearer("  BEARER   abc  "), Some("abc"));
    }

    #[test]
    fn other_schemes_and_empty_tokens_are_rejected() {
        assert_eq!(parse_bearer("Basic dXNlcjpwYXNz"), None);
        assert_eq!(parse_bearer("Bearer "), None);
        assert_eq!(parse_bearer("Bearer"), None);
    }
}

//! Login endpoint.

use crate::WebResult;
use crate::dto::{LoginRequest, TokenResponse};
use crate::extractors::ValidJson;
use axum::{Json, extract::State};
use conversion_report_auth::Authenticator;
use std::sync::Arc;

/// Exchange a username and password for a bearer token.
///
/// # Endpoint
///
/// ```text
/// POST /api/auth/login
/// {"username": "user", "password": "password"}
/// ```
///
/// # Errors
///
/// - 400 if the body is malformed
/// - 401 if the credentials do not match
pub async fn login(
    State(auth): State<Arc<Authenticator>>,
    ValidJson(credentials): ValidJson<LoginRequest>,
) -> WebResult<Json<TokenResponse>> {
    let token = auth
        .login(&credentials.username, &credentials.password)
        .await?;
    tracing::debug!(user = %credentials.username, "Issued token");
    Ok(Json(TokenResponse { token }))
}

//! Health check endpoint.
//!
//! Used by load balancers and container health checks to verify the process is up.

use axum::http::StatusCode;

/// Liveness check.
///
/// Returns 200 OK to indicate the service is running.
/// This endpoint does NOT check dependencies (database, broker).
///
/// # Endpoint
///
/// ```text
/// GET /health
/// ```
#[allow(clippy::unused_async)]
pub async fn health_check() -> (StatusCode, &'static str) {
    (StatusCode::OK, "ok")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_health_check() {
        let (status, body) = health_check().await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "ok");
    }
}

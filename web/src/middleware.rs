//! Axum middleware for request tracking and observability.
//!
//! Every request gets:
//! - an `x-request-id` (kept if the client sent one, otherwise a new UUID),
//!   echoed on the response
//! - a tracing span carrying the request id, method and path
//! - a deadline; requests still running when it expires get 408
//!
//! # Example
//!
//! ```ignore
//! use conversion_report_web::middleware::with_observability;
//!
//! let app = with_observability(Router::new().route("/health", get(health)), timeout);
//! ```

use axum::{Router, http::Request};
use std::time::Duration;
use tower::ServiceBuilder;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use tracing::Span;

/// Header carrying the request id.
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Wrap a router with request ids, tracing and the request deadline.
#[must_use]
pub fn with_observability<S>(router: Router<S>, request_timeout: Duration) -> Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    router.layer(
        ServiceBuilder::new()
            .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
            .layer(TraceLayer::new_for_http().make_span_with(make_request_span))
            .layer(PropagateRequestIdLayer::x_request_id())
            .layer(TimeoutLayer::new(request_timeout)),
    )
}

/// Span for one HTTP request, keyed by its request id.
pub fn make_request_span<B>(request: &Request<B>) -> Span {
    let request_id = request
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("-");

    tracing::info_span!(
        "http_request",
        request_id = %request_id,
        method = %request.method(),
        path = %request.uri().path(),
    )
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)] // Test code can use unwrap/expect
mod tests {
    use super::*;
    use axum::{body::Body, http::StatusCode, routing::get};
    use tower::ServiceExt;

    fn app(timeout: Duration) -> Router {
        with_observability(
            Router::new()
                .route("/test", get(|| async { "ok" }))
                .route(
                    "/slow",
                    get(|| async {
                        tokio::time::sleep(Duration::from_secs(5)).await;
                        "late"
                    }),
                ),
            timeout,
        )
    }

    #[tokio::test]
    async fn request_id_generated_if_missing() {
        let request = Request::builder().uri("/test").body(Body::empty()).unwrap();

        let response = app(Duration::from_secs(5)).oneshot(request).await.unwrap();

        let id = response
            .headers()
            .get(REQUEST_ID_HEADER)
            .expect("request id header should be present")
            .to_str()
            .unwrap();
        assert_eq!(id.len(), 36);
    }

    #[tokio::test]
    async fn request_id_preserved_from_request() {
        let request = Request::builder()
            .uri("/test")
            .header(REQUEST_ID_HEADER, "client-supplied-id")
            .body(Body::empty())
            .unwrap();

        let response = app(Duration::from_secs(5)).oneshot(request).await.unwrap();

        assert_eq!(
            response.headers().get(REQUEST_ID_HEADER).unwrap(),
            "client-supplied-id"
        );
    }

    #[tokio::test]
    async fn slow_request_times_out() {
        let request = Request::builder().uri("/slow").body(Body::empty()).unwrap();

        let response = app(Duration::from_millis(20)).oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::REQUEST_TIMEOUT);
    }
}

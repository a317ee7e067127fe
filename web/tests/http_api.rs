//! HTTP API tests over in-memory infrastructure.
//!
//! Requests go through the full router (extractors, middleware, error
//! mapping) with `tower::ServiceExt::oneshot`.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use axum::Router;
use axum::body::{Body, to_bytes};
use axum::http::{Method, Request, StatusCode, header};
use conversion_report_auth::mocks::MockUserRepository;
use conversion_report_auth::{Authenticator, PasswordHasher, TokenService, User};
use conversion_report_core::principal::Role;
use conversion_report_core::report::ReportId;
use conversion_report_testing::helpers::timestamp;
use conversion_report_testing::mocks::test_clock;
use conversion_report_testing::PipelineHarness;
use conversion_report_web::{AppState, REQUEST_ID_HEADER, router};
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

struct TestApp {
    harness: PipelineHarness,
    app: Router,
}

impl TestApp {
    async fn new() -> Self {
        let harness = PipelineHarness::new();
        let hasher = PasswordHasher::new(4).unwrap();
        let users = MockUserRepository::new();
        for (username, password, role) in [("user", "password", Role::User), ("admin", "admin", Role::Admin)] {
            users.insert(User {
                username: username.to_string(),
                password_hash: hasher.hash(password).await.unwrap(),
                role,
            });
        }

        let tokens = TokenService::new(
            b"an-http-test-secret-that-is-long-enough",
            Duration::from_secs(3600),
            Arc::new(test_clock()),
        )
        .unwrap();
        let auth = Arc::new(Authenticator::new(Arc::new(users), tokens, hasher));
        let app = router(
            AppState::new(harness.service.clone(), auth),
            Duration::from_secs(5),
        );

        Self { harness, app }
    }

    async fn send(&self, method: Method, uri: &str, token: Option<&str>, body: Option<Value>) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }
        let request = match body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let response = self.app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, value)
    }

    async fn login(&self, username: &str, password: &str) -> String {
        let (status, body) = self
            .send(
                Method::POST,
                "/api/auth/login",
                None,
                Some(json!({ "username": username, "password": password })),
            )
            .await;
        assert_eq!(status, StatusCode::OK, "login failed: {body}");
        body["token"].as_str().unwrap().to_string()
    }

    async fn submit(&self, token: &str) -> String {
        let (status, body) = self
            .send(Method::POST, "/api/reports", Some(token), Some(report_body()))
            .await;
        assert_eq!(status, StatusCode::OK, "submit failed: {body}");
        body["reportId"].as_str().unwrap().to_string()
    }
}

fn report_body() -> Value {
    json!({
        "productId": "p1",
        "layoutId": "l1",
        "startDate": "2024-01-01T00:00:00",
        "endDate": "2024-01-31T23:59:59"
    })
}

#[tokio::test]
async fn login_returns_token_for_valid_credentials() {
    let app = TestApp::new().await;
    let token = app.login("user", "password").await;
    assert!(!token.is_empty());
}

#[tokio::test]
async fn login_rejects_wrong_password() {
    let app = TestApp::new().await;
    let (status, body) = app
        .send(
            Method::POST,
            "/api/auth/login",
            None,
            Some(json!({ "username": "user", "password": "nope" })),
        )
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["code"], "UNAUTHENTICATED");
}

#[tokio::test]
async fn login_rejects_malformed_body() {
    let app = TestApp::new().await;
    let (status, body) = app
        .send(Method::POST, "/api/auth/login", None, Some(json!({ "username": "user" })))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "INVALID_INPUT");
}

#[tokio::test]
async fn reports_require_a_token() {
    let app = TestApp::new().await;
    let (status, _) = app
        .send(Method::POST, "/api/reports", None, Some(report_body()))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = app
        .send(Method::POST, "/api/reports", Some("garbage"), Some(report_body()))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn admin_cannot_submit_reports() {
    let app = TestApp::new().await;
    let token = app.login("admin", "admin").await;
    let (status, body) = app
        .send(Method::POST, "/api/reports", Some(&token), Some(report_body()))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["code"], "FORBIDDEN");
}

#[tokio::test]
async fn inverted_window_is_rejected() {
    let app = TestApp::new().await;
    let token = app.login("user", "password").await;
    let mut body = report_body();
    body["startDate"] = json!("2024-02-01T00:00:00");
    let (status, _) = app
        .send(Method::POST, "/api/reports", Some(&token), Some(body))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(app.harness.bus.published(PipelineHarness::REQUESTS_TOPIC).is_empty());
}

#[tokio::test]
async fn minute_precision_window_is_accepted() {
    let app = TestApp::new().await;
    let token = app.login("user", "password").await;
    let mut body = report_body();
    body["startDate"] = json!("2024-01-01T00:00");
    body["endDate"] = json!("2024-01-02T00:00");

    let (status, body) = app
        .send(Method::POST, "/api/reports", Some(&token), Some(body))
        .await;

    assert_eq!(status, StatusCode::OK, "submit failed: {body}");
    let id: ReportId = body["reportId"].as_str().unwrap().parse().unwrap();
    let stored = app.harness.store.request(id).unwrap();
    assert_eq!(stored.parameters.start_date, timestamp("2024-01-01T00:00:00"));
    assert_eq!(stored.parameters.end_date, timestamp("2024-01-02T00:00:00"));
}

#[tokio::test]
async fn submitted_report_is_served_once_computed() {
    let app = TestApp::new().await;
    app.harness
        .analytics
        .record_views("p1", "l1", timestamp("2024-01-10T12:00:00"), 4);
    app.harness
        .analytics
        .record_payments("p1", "l1", timestamp("2024-01-31T23:59:59"), 1);

    let token = app.login("user", "password").await;
    let id = app.submit(&token).await;
    assert_eq!(
        app.harness.bus.published(PipelineHarness::REQUESTS_TOPIC),
        vec![format!("Report ID: {id}")]
    );

    let uri = format!("/api/reports/{id}");
    let (status, body) = app.send(Method::GET, &uri, Some(&token), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "NOT_FOUND");

    app.harness.drain().await;

    let (status, body) = app.send(Method::GET, &uri, Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["requestId"], id);
    assert_eq!(body["paymentCount"], 1);
    assert!((body["conversionRatio"].as_f64().unwrap() - 0.25).abs() < f64::EPSILON);

    let admin = app.login("admin", "admin").await;
    let (status, _) = app.send(Method::GET, &uri, Some(&admin), None).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn malformed_report_id_is_bad_request() {
    let app = TestApp::new().await;
    let token = app.login("user", "password").await;
    let (status, _) = app
        .send(Method::GET, "/api/reports/not-a-uuid", Some(&token), None)
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn admin_updates_report() {
    let app = TestApp::new().await;
    let user = app.login("user", "password").await;
    let admin = app.login("admin", "admin").await;
    let id = app.submit(&user).await;
    app.harness.drain().await;
    let uri = format!("/api/reports/{id}");

    let (status, _) = app
        .send(Method::PUT, &uri, Some(&user), Some(report_body()))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = app
        .send(Method::PUT, &uri, Some(&admin), Some(report_body()))
        .await;
    assert_eq!(status, StatusCode::OK);

    // The result is dropped until the request is recomputed.
    let (status, _) = app.send(Method::GET, &uri, Some(&user), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    app.harness.drain().await;
    let (status, _) = app.send(Method::GET, &uri, Some(&user), None).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn stale_version_conflicts() {
    let app = TestApp::new().await;
    let user = app.login("user", "password").await;
    let admin = app.login("admin", "admin").await;
    let id = app.submit(&user).await;
    app.harness.drain().await;

    let mut body = report_body();
    body["version"] = json!(0);
    let (status, body) = app
        .send(Method::PUT, &format!("/api/reports/{id}"), Some(&admin), Some(body))
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "VERSION_CONFLICT");
}

#[tokio::test]
async fn unknown_report_cannot_be_updated() {
    let app = TestApp::new().await;
    let admin = app.login("admin", "admin").await;
    let uri = format!("/api/reports/{}", ReportId::new());
    let (status, _) = app
        .send(Method::PUT, &uri, Some(&admin), Some(report_body()))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn admin_deletes_report() {
    let app = TestApp::new().await;
    let user = app.login("user", "password").await;
    let admin = app.login("admin", "admin").await;
    let id = app.submit(&user).await;
    app.harness.drain().await;
    let uri = format!("/api/reports/{id}");

    let (status, _) = app.send(Method::DELETE, &uri, Some(&user), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = app.send(Method::DELETE, &uri, Some(&admin), None).await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = app.send(Method::GET, &uri, Some(&user), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, _) = app.send(Method::DELETE, &uri, Some(&admin), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn health_is_public_and_tagged_with_request_id() {
    let app = TestApp::new().await;
    let request = Request::builder().uri("/health").body(Body::empty()).unwrap();

    let response = app.app.clone().oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().contains_key(REQUEST_ID_HEADER));
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert_eq!(&bytes[..], b"ok");
}

//! Route table.

use crate::handlers;
use crate::middleware::with_observability;
use crate::state::AppState;
use axum::{
    Router,
    routing::{get, post},
};
use std::time::Duration;

/// Build the HTTP API.
///
/// ```text
/// POST   /api/auth/login
/// POST   /api/reports
/// GET    /api/reports/:id
/// PUT    /api/reports/:id
/// DELETE /api/reports/:id
/// GET    /health
/// ```
///
/// Every route runs under `request_timeout` and gets an `x-request-id`.
pub fn router(state: AppState, request_timeout: Duration) -> Router {
    let api = Router::new()
        .route("/api/auth/login", post(handlers::login))
        .route("/api/reports", post(handlers::create_report))
        .route(
            "/api/reports/:id",
            get(handlers::get_report)
                .put(handlers::update_report)
                .delete(handlers::delete_report),
        )
        .route("/health", get(handlers::health_check))
        .with_state(state);

    with_observability(api, request_timeout)
}

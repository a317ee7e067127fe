//! Application state for Axum handlers.

use axum::extract::FromRef;
use conversion_report_auth::Authenticator;
use conversion_report_runtime::ReportService;
use std::sync::Arc;

/// Application state shared across all HTTP handlers.
///
/// Handlers extract the part they need with `State<ReportService>` or
/// `State<Arc<Authenticator>>`.
#[derive(Clone, FromRef)]
pub struct AppState {
    /// Report use cases
    pub reports: ReportService,
    /// Login and token verification
    pub auth: Arc<Authenticator>,
}

impl AppState {
    /// Create a new application state.
    #[must_use]
    pub const fn new(reports: ReportService, auth: Arc<Authenticator>) -> Self {
        Self { reports, auth }
    }
}

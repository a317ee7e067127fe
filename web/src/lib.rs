//! HTTP API of the conversion report pipeline.
//!
//! Thin shell over [`conversion_report_runtime::ReportService`] and
//! [`conversion_report_auth::Authenticator`]:
//!
//! 1. **Extract** the bearer token and JSON body
//! 2. **Resolve** the caller to a principal
//! 3. **Call** the service, which enforces roles
//! 4. **Map** the result or error to a response
//!
//! # Example
//!
//! ```ignore
//! use conversion_report_web::{AppState, router};
//!
//! let app = router(AppState::new(reports, Arc::new(authenticator)), Duration::from_secs(30));
//! let listener = tokio::net::TcpListener::bind("0.0.0.0:8080").await?;
//! axum::serve(listener, app).await?;
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod dto;
pub mod error;
pub mod extractors;
pub mod handlers;
pub mod middleware;
pub mod routes;
pub mod state;

// Re-export key types for convenience
pub use error::AppError;
pub use extractors::{AuthenticatedUser, BearerToken, ValidJson};
pub use middleware::{REQUEST_ID_HEADER, with_observability};
pub use routes::router;
pub use state::AppState;

/// Result type alias for web handlers.
pub type WebResult<T> = Result<T, AppError>;

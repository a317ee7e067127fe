//! Error types for web handlers.
//!
//! [`AppError`] bridges service and authentication errors to HTTP responses
//! with a JSON body `{code, message}`.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use conversion_report_auth::AuthError;
use conversion_report_core::error::ReportError;
use metrics::counter;
use serde::Serialize;
use std::fmt;

/// Responses with a 4xx or 5xx status, labelled by `code`.
pub const HTTP_ERRORS: &str = "http_errors_total";

/// Application error type for web handlers.
///
/// # Examples
///
/// ```ignore
/// async fn handler(State(reports): State<ReportService>) -> Result<Json<Dto>, AppError> {
///     let result = reports.fetch(&principal, id).await?;
///     Ok(Json(result.into()))
/// }
/// ```
#[derive(Debug)]
pub struct AppError {
    /// HTTP status code
    status: StatusCode,
    /// Error message (user-facing)
    message: String,
    /// Error code (for client error handling)
    code: &'static str,
    /// Internal error (for logging, not exposed to client)
    source: Option<anyhow::Error>,
}

impl AppError {
    /// Create a new application error.
    #[must_use]
    pub const fn new(status: StatusCode, message: String, code: &'static str) -> Self {
        Self {
            status,
            message,
            code,
            source: None,
        }
    }

    /// Attach the underlying error for logging.
    #[must_use]
    pub fn with_source(mut self, source: anyhow::Error) -> Self {
        self.source = Some(source);
        self
    }

    /// The response status.
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        self.status
    }

    /// The machine-readable error code.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        self.code
    }

    /// Create a 400 Bad Request error.
    #[must_use]
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message.into(), "INVALID_INPUT")
    }

    /// Create a 401 Unauthorized error.
    #[must_use]
    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, message.into(), "UNAUTHENTICATED")
    }

    /// Create a 403 Forbidden error.
    #[must_use]
    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(StatusCode::FORBIDDEN, message.into(), "FORBIDDEN")
    }

    /// Create a 404 Not Found error.
    #[must_use]
    pub fn not_found(resource: impl fmt::Display, id: impl fmt::Display) -> Self {
        Self::new(
            StatusCode::NOT_FOUND,
            format!("{resource} with id {id} not found"),
            "NOT_FOUND",
        )
    }

    /// Create a 409 Conflict error.
    #[must_use]
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(StatusCode::CONFLICT, message.into(), "VERSION_CONFLICT")
    }

    /// Create a 500 Internal Server Error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            message.into(),
            "INTERNAL",
        )
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

impl std::error::Error for AppError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_ref()
            .map(|e| e.as_ref() as &(dyn std::error::Error + 'static))
    }
}

/// Error response body (JSON).
#[derive(Debug, Serialize)]
struct ErrorResponse {
    code: &'static str,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            if let Some(source) = &self.source {
                tracing::error!(
                    status = %self.status,
                    code = self.code,
                    message = %self.message,
                    error = %source,
                    "Internal server error"
                );
            } else {
                tracing::error!(
                    status = %self.status,
                    code = self.code,
                    message = %self.message,
                    "Internal server error"
                );
            }
        }
        counter!(HTTP_ERRORS, "code" => self.code).increment(1);

        let body = ErrorResponse {
            code: self.code,
            message: self.message,
        };

        (self.status, Json(body)).into_response()
    }
}

impl From<ReportError> for AppError {
    fn from(err: ReportError) -> Self {
        match err {
            ReportError::InvalidInput(message) => Self::bad_request(message),
            ReportError::Unauthenticated => Self::unauthorized("Authentication required"),
            ReportError::Forbidden { .. } => Self::forbidden(err.to_string()),
            ReportError::NotFound(id) => Self::not_found("Report", id),
            ReportError::VersionConflict { .. } => Self::conflict(err.to_string()),
            ReportError::Store(_) | ReportError::Queue(_) | ReportError::Analytics(_) => {
                Self::internal("An internal error occurred").with_source(err.into())
            }
        }
    }
}

impl From<AuthError> for AppError {
    fn from(err: AuthError) -> Self {
        if err.is_user_error() {
            Self::unauthorized(err.to_string())
        } else {
            Self::internal("An internal error occurred").with_source(err.into())
        }
    }
}

/// Convert `anyhow::Error` to `AppError`.
impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        Self::internal("An internal error occurred").with_source(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use conversion_report_core::principal::Role;
    use conversion_report_core::queue::QueueError;
    use conversion_report_core::report::{ReportId, Version};

    #[test]
    fn test_error_display() {
        let err = AppError::bad_request("Invalid input");
        assert_eq!(err.to_string(), "[INVALID_INPUT] Invalid input");
    }

    #[test]
    fn service_errors_map_to_statuses() {
        let id = ReportId::new();
        let cases = [
            (ReportError::InvalidInput("bad".into()), StatusCode::BAD_REQUEST),
            (ReportError::Unauthenticated, StatusCode::UNAUTHORIZED),
            (
                ReportError::Forbidden {
                    actual: Role::Admin,
                    required: &[Role::User],
                },
                StatusCode::FORBIDDEN,
            ),
            (ReportError::NotFound(id), StatusCode::NOT_FOUND),
            (
                ReportError::VersionConflict {
                    id,
                    expected: Version::new(3),
                },
                StatusCode::CONFLICT,
            ),
            (
                ReportError::Queue(QueueError::ConnectionFailed("down".into())),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];

        for (err, status) in cases {
            assert_eq!(AppError::from(err).status(), status);
        }
    }

    #[test]
    fn internal_errors_hide_details() {
        let err = AppError::from(ReportError::Queue(QueueError::ConnectionFailed(
            "broker at 10.0.0.7 refused".into(),
        )));
        assert!(!err.to_string().contains("10.0.0.7"));
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn auth_errors_split_user_and_system() {
        assert_eq!(
            AppError::from(AuthError::TokenExpired).status(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            AppError::from(AuthError::DatabaseError("down".into())).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}

//! Error taxonomy of the report service operations.

use crate::analytics::AnalyticsError;
use crate::principal::Role;
use crate::queue::QueueError;
use crate::report::{ReportId, ValidationError, Version};
use crate::store::StoreError;
use thiserror::Error;

/// Errors surfaced by intake, retrieval and admin operations.
#[derive(Error, Debug, Clone)]
pub enum ReportError {
    /// The request body failed validation.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// No valid credentials were presented.
    #[error("Authentication required")]
    Unauthenticated,

    /// The caller lacks the required role.
    #[error("Role {actual} may not perform this operation (requires one of {required:?})")]
    Forbidden {
        /// Caller's role
        actual: Role,
        /// Roles that would have been accepted
        required: &'static [Role],
    },

    /// No such request or result.
    #[error("Report not found: {0}")]
    NotFound(ReportId),

    /// The caller's version is stale.
    #[error("Report {id} was modified concurrently (expected version {expected})")]
    VersionConflict {
        /// Report that conflicted
        id: ReportId,
        /// Version the caller expected
        expected: Version,
    },

    /// Transient storage failure.
    #[error("Store error: {0}")]
    Store(StoreError),

    /// Transient message bus failure.
    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    /// Transient analytics failure.
    #[error("Analytics error: {0}")]
    Analytics(#[from] AnalyticsError),
}

impl ReportError {
    /// Whether the failure is on the server side and may succeed on retry.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Store(_) | Self::Queue(_) | Self::Analytics(_))
    }
}

impl From<StoreError> for ReportError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::VersionConflict { id, expected, .. } => {
                Self::VersionConflict { id, expected }
            }
            StoreError::NotFound(id) => Self::NotFound(id),
            other => Self::Store(other),
        }
    }
}

impl From<ValidationError> for ReportError {
    fn from(err: ValidationError) -> Self {
        Self::InvalidInput(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_conflicts_keep_their_meaning() {
        let id = ReportId::new();
        let err = ReportError::from(StoreError::VersionConflict {
            id,
            expected: Version::new(1),
            actual: Some(Version::new(2)),
        });
        assert!(matches!(err, ReportError::VersionConflict { expected, .. } if expected == Version::new(1)));
        assert!(!err.is_transient());

        assert!(matches!(
            ReportError::from(StoreError::NotFound(id)),
            ReportError::NotFound(found) if found == id
        ));
    }

    #[test]
    fn database_failures_are_transient() {
        let err = ReportError::from(StoreError::DatabaseError("timeout".into()));
        assert!(err.is_transient());
        assert!(err.to_string().contains("timeout"));
    }

    #[test]
    fn validation_becomes_invalid_input() {
        let err = ReportError::from(ValidationError::BlankLayoutId);
        assert!(matches!(err, ReportError::InvalidInput(msg) if msg.contains("layoutId")));
    }
}

//! Durable storage for report requests and results.
//!
//! Writes always go through an explicit [`ReportTransaction`] obtained from
//! [`ReportStore::begin`]. The caller decides whether to commit or roll back;
//! dropping a transaction without committing discards its writes.
//!
//! ```rust,ignore
//! let mut tx = store.begin().await?;
//! tx.upsert_result(&result).await?;
//! tx.update_request(&completed, loaded.version).await?;
//! tx.commit().await?;
//! ```
//!
//! Every request write names the version the caller last saw. If the stored
//! version differs, the write fails with [`StoreError::VersionConflict`] and
//! nothing is changed.

use crate::report::{ReportId, ReportRequest, ReportResult, Version};
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Errors that can occur during store operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Optimistic concurrency check failed.
    #[error("Version conflict for report {id}: expected {expected}, found {actual:?}")]
    VersionConflict {
        /// Report whose version did not match
        id: ReportId,
        /// Version the caller supplied
        expected: Version,
        /// Version actually stored, if the row still exists
        actual: Option<Version>,
    },

    /// The request to mutate does not exist.
    #[error("Report not found: {0}")]
    NotFound(ReportId),

    /// A request with the same id already exists.
    #[error("Report already exists: {0}")]
    AlreadyExists(ReportId),

    /// Database error.
    #[error("Database error: {0}")]
    DatabaseError(String),

    /// A stored row could not be mapped back to the domain.
    #[error("Corrupt row for report {id}: {reason}")]
    CorruptRow {
        /// Report whose row is corrupt
        id: ReportId,
        /// What was wrong with it
        reason: String,
    },
}

impl StoreError {
    /// Whether retrying the whole unit of work might succeed.
    #[must_use]
    pub const fn is_conflict(&self) -> bool {
        matches!(self, Self::VersionConflict { .. })
    }
}

/// Boxed future returned by store operations.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, StoreError>> + Send + 'a>>;

/// Request-side operations available inside a transaction.
pub trait RequestStore: Send {
    /// Load a request, seeing this transaction's own writes.
    fn find_request(&mut self, id: ReportId) -> StoreFuture<'_, Option<ReportRequest>>;

    /// Insert a new request.
    ///
    /// # Errors
    ///
    /// [`StoreError::AlreadyExists`] if the id is taken.
    fn insert_request(&mut self, request: &ReportRequest) -> StoreFuture<'_, ()>;

    /// Overwrite parameters and status of an existing request.
    ///
    /// Succeeds only if the stored version equals `expected`; the stored
    /// version then becomes `expected.next()`, which is returned.
    ///
    /// # Errors
    ///
    /// [`StoreError::VersionConflict`] on a stale `expected`,
    /// [`StoreError::NotFound`] if the row is gone.
    fn update_request(
        &mut self,
        request: &ReportRequest,
        expected: Version,
    ) -> StoreFuture<'_, Version>;

    /// Delete a request whose stored version equals `expected`.
    ///
    /// # Errors
    ///
    /// Same as [`RequestStore::update_request`].
    fn delete_request(&mut self, id: ReportId, expected: Version) -> StoreFuture<'_, ()>;
}

/// Result-side operations available inside a transaction.
pub trait ResultStore: Send {
    /// Load the result for a request, seeing this transaction's own writes.
    fn find_result(&mut self, id: ReportId) -> StoreFuture<'_, Option<ReportResult>>;

    /// Insert or replace the result for `result.request_id`.
    fn upsert_result(&mut self, result: &ReportResult) -> StoreFuture<'_, ()>;

    /// Remove the result for a request. Returns whether one existed.
    fn delete_result(&mut self, id: ReportId) -> StoreFuture<'_, bool>;
}

/// An open unit of work over both request and result rows.
pub trait ReportTransaction: RequestStore + ResultStore {
    /// Make every write in this transaction durable and visible.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the commit fails; nothing is applied then.
    fn commit(self: Box<Self>) -> StoreFuture<'static, ()>;

    /// Discard every write in this transaction.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the backend reports a failure while rolling back.
    fn rollback(self: Box<Self>) -> StoreFuture<'static, ()>;
}

/// Entry point to report persistence.
///
/// Implementations must be `Send + Sync`; one store is shared by the HTTP
/// handlers and every worker task.
pub trait ReportStore: Send + Sync {
    /// Open a new transaction.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::DatabaseError`] if no connection is available.
    fn begin(&self) -> StoreFuture<'_, Box<dyn ReportTransaction>>;

    /// Load a request outside any transaction.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the read fails.
    fn find_request(&self, id: ReportId) -> StoreFuture<'_, Option<ReportRequest>>;

    /// Load a result outside any transaction.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the read fails.
    fn find_result(&self, id: ReportId) -> StoreFuture<'_, Option<ReportResult>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_version_conflicts_are_conflicts() {
        let id = ReportId::new();
        assert!(
            StoreError::VersionConflict {
                id,
                expected: Version::INITIAL,
                actual: Some(Version::new(1)),
            }
            .is_conflict()
        );
        assert!(!StoreError::NotFound(id).is_conflict());
        assert!(!StoreError::DatabaseError("down".into()).is_conflict());
    }

    #[test]
    fn conflict_message_names_both_versions() {
        let id = ReportId::new();
        let err = StoreError::VersionConflict {
            id,
            expected: Version::new(2),
            actual: Some(Version::new(3)),
        };
        let msg = err.to_string();
        assert!(msg.contains("expected 2"));
        assert!(msg.contains("Some(Version(3))"));
    }
}

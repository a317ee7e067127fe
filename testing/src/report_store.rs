//! In-memory report store with transactional semantics.
//!
//! Writes made through an [`InMemoryTransaction`] are staged privately and
//! applied atomically on commit. At commit time every row the transaction
//! touched must still have the version it had when first read; otherwise the
//! commit fails with [`StoreError::VersionConflict`] and nothing is applied.

use conversion_report_core::report::{ReportId, ReportRequest, ReportResult, Version};
use conversion_report_core::store::{
    ReportStore, ReportTransaction, RequestStore, ResultStore, StoreError, StoreFuture,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Debug, Default)]
struct Tables {
    requests: HashMap<ReportId, ReportRequest>,
    results: HashMap<ReportId, ReportResult>,
}

#[derive(Debug, Default)]
struct Shared {
    tables: Mutex<Tables>,
    unavailable: AtomicBool,
    injected_conflicts: AtomicUsize,
    commits: AtomicUsize,
    transactions: AtomicUsize,
}

impl Shared {
    fn lock(&self) -> Result<MutexGuard<'_, Tables>, StoreError> {
        self.tables
            .lock()
            .map_err(|_| StoreError::DatabaseError("store lock poisoned".to_string()))
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            Err(StoreError::DatabaseError("store unavailable".to_string()))
        } else {
            Ok(())
        }
    }
}

/// `HashMap`-backed [`ReportStore`] for fast, deterministic tests.
///
/// Clones share the same tables.
///
/// # Example
///
/// ```
/// use conversion_report_testing::InMemoryReportStore;
/// use conversion_report_core::store::{ReportStore, ReportTransaction};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let store = InMemoryReportStore::new();
/// let tx = store.begin().await?;
/// tx.commit().await?;
/// assert_eq!(store.commit_count(), 1);
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Debug, Default)]
pub struct InMemoryReportStore {
    shared: Arc<Shared>,
}

impl InMemoryReportStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a request directly, bypassing transactions.
    pub fn seed_request(&self, request: ReportRequest) {
        if let Ok(mut tables) = self.shared.lock() {
            tables.requests.insert(request.id, request);
        }
    }

    /// Insert or replace a result directly, bypassing transactions.
    pub fn seed_result(&self, result: ReportResult) {
        if let Ok(mut tables) = self.shared.lock() {
            tables.results.insert(result.request_id, result);
        }
    }

    /// Committed request, if any.
    #[must_use]
    pub fn request(&self, id: ReportId) -> Option<ReportRequest> {
        self.shared
            .lock()
            .ok()
            .and_then(|tables| tables.requests.get(&id).cloned())
    }

    /// Committed result, if any.
    #[must_use]
    pub fn result(&self, id: ReportId) -> Option<ReportResult> {
        self.shared
            .lock()
            .ok()
            .and_then(|tables| tables.results.get(&id).cloned())
    }

    /// Number of committed requests.
    #[must_use]
    pub fn request_count(&self) -> usize {
        self.shared.lock().map_or(0, |tables| tables.requests.len())
    }

    /// Number of committed results.
    #[must_use]
    pub fn result_count(&self) -> usize {
        self.shared.lock().map_or(0, |tables| tables.results.len())
    }

    /// Number of successful commits so far.
    #[must_use]
    pub fn commit_count(&self) -> usize {
        self.shared.commits.load(Ordering::SeqCst)
    }

    /// Number of transactions opened so far.
    #[must_use]
    pub fn transaction_count(&self) -> usize {
        self.shared.transactions.load(Ordering::SeqCst)
    }

    /// Make every operation fail with [`StoreError::DatabaseError`].
    pub fn set_unavailable(&self, unavailable: bool) {
        self.shared.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Fail the next `count` commits with a version conflict, as if another
    /// writer had raced ahead.
    pub fn inject_conflicts(&self, count: usize) {
        self.shared.injected_conflicts.store(count, Ordering::SeqCst);
    }

    fn take_injected_conflict(&self) -> bool {
        self.shared
            .injected_conflicts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

impl ReportStore for InMemoryReportStore {
    fn begin(&self) -> StoreFuture<'_, Box<dyn ReportTransaction>> {
        let store = self.clone();
        Box::pin(async move {
            store.shared.check_available()?;
            store.shared.transactions.fetch_add(1, Ordering::SeqCst);
            let tx: Box<dyn ReportTransaction> = Box::new(InMemoryTransaction::new(store));
            Ok(tx)
        })
    }

    fn find_request(&self, id: ReportId) -> StoreFuture<'_, Option<ReportRequest>> {
        Box::pin(async move {
            self.shared.check_available()?;
            Ok(self.shared.lock()?.requests.get(&id).cloned())
        })
    }

    fn find_result(&self, id: ReportId) -> StoreFuture<'_, Option<ReportResult>> {
        Box::pin(async move {
            self.shared.check_available()?;
            Ok(self.shared.lock()?.results.get(&id).cloned())
        })
    }
}

/// Transaction handle returned by [`InMemoryReportStore::begin`].
#[derive(Debug)]
pub struct InMemoryTransaction {
    store: InMemoryReportStore,
    /// Version of each touched request as first seen in the committed tables.
    read_versions: HashMap<ReportId, Option<Version>>,
    staged_requests: HashMap<ReportId, Option<ReportRequest>>,
    staged_results: HashMap<ReportId, Option<ReportResult>>,
}

impl InMemoryTransaction {
    fn new(store: InMemoryReportStore) -> Self {
        Self {
            store,
            read_versions: HashMap::new(),
            staged_requests: HashMap::new(),
            staged_results: HashMap::new(),
        }
    }

    fn visible_request(&mut self, id: ReportId) -> Result<Option<ReportRequest>, StoreError> {
        if let Some(staged) = self.staged_requests.get(&id) {
            return Ok(staged.clone());
        }
        let committed = self.store.shared.lock()?.requests.get(&id).cloned();
        self.read_versions
            .entry(id)
            .or_insert_with(|| committed.as_ref().map(|r| r.version));
        Ok(committed)
    }

    fn visible_result(&self, id: ReportId) -> Result<Option<ReportResult>, StoreError> {
        if let Some(staged) = self.staged_results.get(&id) {
            return Ok(staged.clone());
        }
        Ok(self.store.shared.lock()?.results.get(&id).cloned())
    }

    fn check_version(
        &mut self,
        id: ReportId,
        expected: Version,
    ) -> Result<ReportRequest, StoreError> {
        let current = self.visible_request(id)?.ok_or(StoreError::NotFound(id))?;
        if current.version != expected {
            return Err(StoreError::VersionConflict {
                id,
                expected,
                actual: Some(current.version),
            });
        }
        Ok(current)
    }

    fn apply(self) -> Result<(), StoreError> {
        let Self {
            store,
            read_versions,
            staged_requests,
            staged_results,
        } = self;
        store.shared.check_available()?;
        let mut tables = store.shared.lock()?;

        for (id, seen) in &read_versions {
            let now = tables.requests.get(id).map(|r| r.version);
            if now != *seen {
                return Err(match seen {
                    Some(expected) => StoreError::VersionConflict {
                        id: *id,
                        expected: *expected,
                        actual: now,
                    },
                    None => StoreError::AlreadyExists(*id),
                });
            }
        }
        if store.take_injected_conflict() {
            if let Some((id, seen)) = read_versions.iter().next() {
                return Err(StoreError::VersionConflict {
                    id: *id,
                    expected: seen.unwrap_or(Version::INITIAL),
                    actual: seen.map(Version::next),
                });
            }
        }

        for (id, staged) in staged_requests {
            match staged {
                Some(request) => tables.requests.insert(id, request),
                None => tables.requests.remove(&id),
            };
        }
        for (id, staged) in staged_results {
            match staged {
                Some(result) => tables.results.insert(id, result),
                None => tables.results.remove(&id),
            };
        }
        drop(tables);
        store.shared.commits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

impl RequestStore for InMemoryTransaction {
    fn find_request(&mut self, id: ReportId) -> StoreFuture<'_, Option<ReportRequest>> {
        Box::pin(async move { self.visible_request(id) })
    }

    fn insert_request(&mut self, request: &ReportRequest) -> StoreFuture<'_, ()> {
        let request = request.clone();
        Box::pin(async move {
            if self.visible_request(request.id)?.is_some() {
                return Err(StoreError::AlreadyExists(request.id));
            }
            self.staged_requests.insert(request.id, Some(request));
            Ok(())
        })
    }

    fn update_request(
        &mut self,
        request: &ReportRequest,
        expected: Version,
    ) -> StoreFuture<'_, Version> {
        let mut request = request.clone();
        Box::pin(async move {
            self.check_version(request.id, expected)?;
            let next = expected.next();
            request.version = next;
            self.staged_requests.insert(request.id, Some(request));
            Ok(next)
        })
    }

    fn delete_request(&mut self, id: ReportId, expected: Version) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            self.check_version(id, expected)?;
            self.staged_requests.insert(id, None);
            Ok(())
        })
    }
}

impl ResultStore for InMemoryTransaction {
    fn find_result(&mut self, id: ReportId) -> StoreFuture<'_, Option<ReportResult>> {
        Box::pin(async move { self.visible_result(id) })
    }

    fn upsert_result(&mut self, result: &ReportResult) -> StoreFuture<'_, ()> {
        let result = result.clone();
        Box::pin(async move {
            self.staged_results.insert(result.request_id, Some(result));
            Ok(())
        })
    }

    fn delete_result(&mut self, id: ReportId) -> StoreFuture<'_, bool> {
        Box::pin(async move {
            let existed = self.visible_result(id)?.is_some();
            self.staged_results.insert(id, None);
            Ok(existed)
        })
    }
}

impl ReportTransaction for InMemoryTransaction {
    fn commit(self: Box<Self>) -> StoreFuture<'static, ()> {
        let outcome = (*self).apply();
        Box::pin(async move { outcome })
    }

    fn rollback(self: Box<Self>) -> StoreFuture<'static, ()> {
        drop(self);
        Box::pin(async { Ok(()) })
    }
}

#[cfg(test)]
#[allow(clippy::expect_used)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use conversion_report_core::report::{ReportParameters, ReportStatus};

    fn request() -> ReportRequest {
        let day = NaiveDate::from_ymd_opt(2024, 1, 1)
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .expect("valid timestamp");
        ReportRequest::pending(ReportId::new(), ReportParameters::new("p1", "l1", day, day))
    }

    #[tokio::test]
    async fn writes_are_invisible_until_commit() {
        let store = InMemoryReportStore::new();
        let req = request();

        let mut tx = store.begin().await.expect("begin");
        tx.insert_request(&req).await.expect("insert");
        assert!(tx.find_request(req.id).await.expect("find").is_some());
        assert!(store.request(req.id).is_none());

        tx.commit().await.expect("commit");
        assert_eq!(store.request(req.id), Some(req));
    }

    #[tokio::test]
    async fn rollback_discards_writes() {
        let store = InMemoryReportStore::new();
        let req = request();

        let mut tx = store.begin().await.expect("begin");
        tx.insert_request(&req).await.expect("insert");
        tx.rollback().await.expect("rollback");

        assert_eq!(store.request_count(), 0);
        assert_eq!(store.commit_count(), 0);
    }

    #[tokio::test]
    async fn update_bumps_version_and_rejects_stale() {
        let store = InMemoryReportStore::new();
        let req = request();
        store.seed_request(req.clone());

        let mut tx = store.begin().await.expect("begin");
        let completed = ReportRequest {
            status: ReportStatus::Completed,
            ..req.clone()
        };
        let next = tx
            .update_request(&completed, Version::INITIAL)
            .await
            .expect("update");
        assert_eq!(next, Version::new(1));

        let stale = tx.update_request(&completed, Version::INITIAL).await;
        assert!(matches!(stale, Err(StoreError::VersionConflict { .. })));
        tx.commit().await.expect("commit");

        let stored = store.request(req.id).expect("stored");
        assert_eq!(stored.version, Version::new(1));
        assert_eq!(stored.status, ReportStatus::Completed);
    }

    #[tokio::test]
    async fn concurrent_writers_conflict_at_commit() {
        let store = InMemoryReportStore::new();
        let req = request();
        store.seed_request(req.clone());

        let mut first = store.begin().await.expect("begin");
        let mut second = store.begin().await.expect("begin");
        first
            .update_request(&req, Version::INITIAL)
            .await
            .expect("first update");
        second
            .update_request(&req, Version::INITIAL)
            .await
            .expect("second update");

        first.commit().await.expect("first commit");
        let err = second.commit().await.expect_err("second commit must fail");
        assert!(err.is_conflict());
        assert_eq!(store.commit_count(), 1);
    }

    #[tokio::test]
    async fn delete_result_reports_existence() {
        let store = InMemoryReportStore::new();
        let req = request();
        store.seed_result(ReportResult {
            request_id: req.id,
            conversion_ratio: 0.5,
            payment_count: 5,
        });

        let mut tx = store.begin().await.expect("begin");
        assert!(tx.delete_result(req.id).await.expect("delete"));
        assert!(!tx.delete_result(req.id).await.expect("delete again"));
        tx.commit().await.expect("commit");
        assert_eq!(store.result_count(), 0);
    }

    #[tokio::test]
    async fn unavailable_store_fails_begin() {
        let store = InMemoryReportStore::new();
        store.set_unavailable(true);
        assert!(matches!(
            store.begin().await,
            Err(StoreError::DatabaseError(_))
        ));
    }
}

//! In-memory analytics reader over recorded view and payment events.

use chrono::NaiveDateTime;
use conversion_report_core::analytics::{Analytics, AnalyticsError, AnalyticsQuery};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};

#[derive(Clone, Debug)]
struct Event {
    product_id: String,
    layout_id: String,
    timestamp: NaiveDateTime,
}

impl Event {
    fn matches(&self, query: &AnalyticsQuery) -> bool {
        self.product_id == query.product_id
            && self.layout_id == query.layout_id
            && self.timestamp >= query.start
            && self.timestamp <= query.end
    }
}

#[derive(Debug, Default)]
struct Inner {
    views: RwLock<Vec<Event>>,
    payments: RwLock<Vec<Event>>,
    queries: AtomicUsize,
    unavailable: AtomicBool,
}

/// Analytics reader that counts events recorded by the test.
///
/// Clones share the same events. Every `count_*` call increments
/// [`InMemoryAnalytics::query_count`], which lets tests assert that a code
/// path did not touch analytics at all.
///
/// # Example
///
/// ```
/// use conversion_report_testing::InMemoryAnalytics;
/// use conversion_report_core::analytics::{Analytics, AnalyticsQuery};
/// use chrono::NaiveDate;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let t = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap().and_hms_opt(12, 0, 0).unwrap();
/// let analytics = InMemoryAnalytics::new();
/// analytics.record_views("p1", "l1", t, 3);
///
/// let query = AnalyticsQuery { product_id: "p1".into(), layout_id: "l1".into(), start: t, end: t };
/// assert_eq!(analytics.count_views(&query).await?, 3);
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Debug, Default)]
pub struct InMemoryAnalytics {
    inner: Arc<Inner>,
}

impl InMemoryAnalytics {
    /// Create a reader with no events.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn record(
        events: &RwLock<Vec<Event>>,
        product_id: &str,
        layout_id: &str,
        timestamp: NaiveDateTime,
        count: usize,
    ) {
        if let Ok(mut events) = events.write() {
            events.extend((0..count).map(|_| Event {
                product_id: product_id.to_string(),
                layout_id: layout_id.to_string(),
                timestamp,
            }));
        }
    }

    /// Record `count` view events at `timestamp`.
    pub fn record_views(
        &self,
        product_id: &str,
        layout_id: &str,
        timestamp: NaiveDateTime,
        count: usize,
    ) {
        Self::record(&self.inner.views, product_id, layout_id, timestamp, count);
    }

    /// Record `count` payment events at `timestamp`.
    pub fn record_payments(
        &self,
        product_id: &str,
        layout_id: &str,
        timestamp: NaiveDateTime,
        count: usize,
    ) {
        Self::record(&self.inner.payments, product_id, layout_id, timestamp, count);
    }

    /// Number of count queries served so far.
    #[must_use]
    pub fn query_count(&self) -> usize {
        self.inner.queries.load(Ordering::SeqCst)
    }

    /// Make every query fail with [`AnalyticsError::QueryFailed`].
    pub fn set_unavailable(&self, unavailable: bool) {
        self.inner.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn count(&self, events: &RwLock<Vec<Event>>, query: &AnalyticsQuery) -> Result<u64, AnalyticsError> {
        self.inner.queries.fetch_add(1, Ordering::SeqCst);
        if self.inner.unavailable.load(Ordering::SeqCst) {
            return Err(AnalyticsError::QueryFailed("analytics unavailable".to_string()));
        }
        let events = events
            .read()
            .map_err(|_| AnalyticsError::QueryFailed("lock poisoned".to_string()))?;
        let matching = events.iter().filter(|e| e.matches(query)).count();
        u64::try_from(matching).map_err(|e| AnalyticsError::InvalidCount(e.to_string()))
    }
}

impl Analytics for InMemoryAnalytics {
    fn count_views(
        &self,
        query: &AnalyticsQuery,
    ) -> Pin<Box<dyn Future<Output = Result<u64, AnalyticsError>> + Send + '_>> {
        let outcome = self.count(&self.inner.views, query);
        Box::pin(async move { outcome })
    }

    fn count_payments(
        &self,
        query: &AnalyticsQuery,
    ) -> Pin<Box<dyn Future<Output = Result<u64, AnalyticsError>> + Send + '_>> {
        let outcome = self.count(&self.inner.payments, query);
        Box::pin(async move { outcome })
    }
}

//! Read-only counts over the view and payment event tables.
//!
//! Matching is exact on `(product_id, layout_id)` and inclusive on both ends
//! of the time window.

use crate::report::ReportParameters;
use chrono::NaiveDateTime;
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Errors from the analytics reader.
#[derive(Error, Debug, Clone)]
pub enum AnalyticsError {
    /// The underlying database failed or was unreachable.
    #[error("Analytics query failed: {0}")]
    QueryFailed(String),

    /// The database returned something that is not a count.
    #[error("Invalid count returned: {0}")]
    InvalidCount(String),
}

/// Filter for a count query.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AnalyticsQuery {
    /// Exact product match.
    pub product_id: String,
    /// Exact layout match.
    pub layout_id: String,
    /// Window start, inclusive.
    pub start: NaiveDateTime,
    /// Window end, inclusive.
    pub end: NaiveDateTime,
}

impl From<&ReportParameters> for AnalyticsQuery {
    fn from(params: &ReportParameters) -> Self {
        Self {
            product_id: params.product_id.clone(),
            layout_id: params.layout_id.clone(),
            start: params.start_date,
            end: params.end_date,
        }
    }
}

/// Views and payments for one query window.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct ConversionCounts {
    /// Number of matching view events.
    pub views: u64,
    /// Number of matching payment events.
    pub payments: u64,
}

impl ConversionCounts {
    /// Create counts from raw numbers.
    #[must_use]
    pub const fn new(views: u64, payments: u64) -> Self {
        Self { views, payments }
    }

    /// Fraction of views that converted.
    ///
    /// `0.0` when there were no views; otherwise `payments / views`, which
    /// may exceed `1.0` because payments are not joined to views.
    ///
    /// # Examples
    ///
    /// ```
    /// use conversion_report_core::analytics::ConversionCounts;
    ///
    /// assert_eq!(ConversionCounts::new(10, 5).ratio(), 0.5);
    /// assert_eq!(ConversionCounts::new(0, 3).ratio(), 0.0);
    /// assert_eq!(ConversionCounts::new(2, 3).ratio(), 1.5);
    /// ```
    #[must_use]
    #[allow(clippy::cast_precision_loss)] // counts far below 2^52 in practice
    pub fn ratio(self) -> f64 {
        if self.views == 0 {
            0.0
        } else {
            self.payments as f64 / self.views as f64
        }
    }
}

/// Aggregate counts over historical interaction data.
///
/// Implementations must be `Send + Sync`; one reader is shared by every
/// worker task.
pub trait Analytics: Send + Sync {
    /// Count view events matching the query.
    ///
    /// # Errors
    ///
    /// Returns [`AnalyticsError`] if the query cannot be executed.
    fn count_views(
        &self,
        query: &AnalyticsQuery,
    ) -> Pin<Box<dyn Future<Output = Result<u64, AnalyticsError>> + Send + '_>>;

    /// Count payment events matching the query.
    ///
    /// # Errors
    ///
    /// Returns [`AnalyticsError`] if the query cannot be executed.
    fn count_payments(
        &self,
        query: &AnalyticsQuery,
    ) -> Pin<Box<dyn Future<Output = Result<u64, AnalyticsError>> + Send + '_>>;

    /// Count views and payments together.
    ///
    /// The default issues the two queries one after the other. Readers that
    /// can do better (one snapshot, one round trip) override it.
    ///
    /// # Errors
    ///
    /// Returns [`AnalyticsError`] if either query fails.
    fn count_conversions(
        &self,
        query: &AnalyticsQuery,
    ) -> Pin<Box<dyn Future<Output = Result<ConversionCounts, AnalyticsError>> + Send + '_>> {
        let query = query.clone();
        Box::pin(async move {
            let views = self.count_views(&query).await?;
            let payments = self.count_payments(&query).await?;
            Ok(ConversionCounts { views, payments })
        })
    }
}

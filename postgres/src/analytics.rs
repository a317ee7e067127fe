//! Conversion counts from the `views` and `payments` tables.

use conversion_report_core::analytics::{
    Analytics, AnalyticsError, AnalyticsQuery, ConversionCounts,
};
use metrics::histogram;
use sqlx::{PgConnection, PgPool};
use std::future::Future;
use std::pin::Pin;
use std::time::Instant;

const COUNT_VIEWS: &str = "SELECT COUNT(*) FROM views \
     WHERE product_id = $1 AND layout_id = $2 AND \"timestamp\" BETWEEN $3 AND $4";

const COUNT_PAYMENTS: &str = "SELECT COUNT(*) FROM payments \
     WHERE product_id = $1 AND layout_id = $2 AND \"timestamp\" BETWEEN $3 AND $4";

/// Time spent counting one window, in seconds.
pub const ANALYTICS_QUERY_DURATION: &str = "analytics_query_duration_seconds";

/// Read-only [`Analytics`] over `PostgreSQL`.
///
/// [`Analytics::count_conversions`] reads both tables from one
/// `REPEATABLE READ` snapshot so a payment and its view cannot straddle the
/// two queries.
#[derive(Clone)]
pub struct PostgresAnalytics {
    pool: PgPool,
}

impl PostgresAnalytics {
    /// Create a reader over an existing pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn count_on_pool(
        &self,
        sql: &'static str,
        query: &AnalyticsQuery,
    ) -> Result<u64, AnalyticsError> {
        let mut conn = self.pool.acquire().await.map_err(query_failed)?;
        count(&mut conn, sql, query).await
    }
}

impl Analytics for PostgresAnalytics {
    fn count_views(
        &self,
        query: &AnalyticsQuery,
    ) -> Pin<Box<dyn Future<Output = Result<u64, AnalyticsError>> + Send + '_>> {
        let query = query.clone();
        Box::pin(async move { self.count_on_pool(COUNT_VIEWS, &query).await })
    }

    fn count_payments(
        &self,
        query: &AnalyticsQuery,
    ) -> Pin<Box<dyn Future<Output = Result<u64, AnalyticsError>> + Send + '_>> {
        let query = query.clone();
        Box::pin(async move { self.count_on_pool(COUNT_PAYMENTS, &query).await })
    }

    fn count_conversions(
        &self,
        query: &AnalyticsQuery,
    ) -> Pin<Box<dyn Future<Output = Result<ConversionCounts, AnalyticsError>> + Send + '_>> {
        let query = query.clone();
        Box::pin(async move {
            let started = Instant::now();
            let mut tx = self.pool.begin().await.map_err(query_failed)?;
            sqlx::query("SET TRANSACTION ISOLATION LEVEL REPEATABLE READ READ ONLY")
                .execute(&mut *tx)
                .await
                .map_err(query_failed)?;

            let views = count(&mut tx, COUNT_VIEWS, &query).await?;
            let payments = count(&mut tx, COUNT_PAYMENTS, &query).await?;
            tx.commit().await.map_err(query_failed)?;

            histogram!(ANALYTICS_QUERY_DURATION).record(started.elapsed().as_secs_f64());
            Ok(ConversionCounts::new(views, payments))
        })
    }
}

async fn count(
    conn: &mut PgConnection,
    sql: &'static str,
    query: &AnalyticsQuery,
) -> Result<u64, AnalyticsError> {
    let (raw,): (i64,) = sqlx::query_as(sql)
        .bind(&query.product_id)
        .bind(&query.layout_id)
        .bind(query.start)
        .bind(query.end)
        .fetch_one(conn)
        .await
        .map_err(query_failed)?;

    u64::try_from(raw).map_err(|_| AnalyticsError::InvalidCount(raw.to_string()))
}

fn query_failed(e: sqlx::Error) -> AnalyticsError {
    AnalyticsError::QueryFailed(e.to_string())
}

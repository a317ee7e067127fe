//! Report requests and results in `PostgreSQL`.
//!
//! Request writes are conditional on the stored version:
//!
//! ```sql
//! UPDATE report_request SET ..., version = version + 1
//! WHERE id = $1 AND version = $2
//! RETURNING version
//! ```
//!
//! When no row comes back the current version is read to tell a missing
//! request apart from a stale one.

use conversion_report_core::report::{
    ReportId, ReportParameters, ReportRequest, ReportResult, ReportStatus, Version,
};
use conversion_report_core::store::{
    ReportStore, ReportTransaction, RequestStore, ResultStore, StoreError, StoreFuture,
};
use sqlx::postgres::PgRow;
use sqlx::{PgConnection, PgPool, Postgres, Row, Transaction};
use tracing::debug;
use uuid::Uuid;

const SELECT_REQUEST: &str = "SELECT id, product_id, layout_id, start_date, end_date, status, version \
     FROM report_request WHERE id = $1";

const SELECT_RESULT: &str =
    "SELECT request_id, conversion_ratio, payment_count FROM report_result WHERE request_id = $1";

/// PostgreSQL-backed [`ReportStore`].
#[derive(Clone)]
pub struct PostgresReportStore {
    pool: PgPool,
}

impl PostgresReportStore {
    /// Create a store over an existing pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Get the underlying connection pool.
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }
}

impl ReportStore for PostgresReportStore {
    fn begin(&self) -> StoreFuture<'_, Box<dyn ReportTransaction>> {
        Box::pin(async move {
            let tx = self.pool.begin().await.map_err(database_error)?;
            Ok(Box::new(PostgresTransaction { tx }) as Box<dyn ReportTransaction>)
        })
    }

    fn find_request(&self, id: ReportId) -> StoreFuture<'_, Option<ReportRequest>> {
        Box::pin(async move {
            let mut conn = self.pool.acquire().await.map_err(database_error)?;
            select_request(&mut conn, id).await
        })
    }

    fn find_result(&self, id: ReportId) -> StoreFuture<'_, Option<ReportResult>> {
        Box::pin(async move {
            let mut conn = self.pool.acquire().await.map_err(database_error)?;
            select_result(&mut conn, id).await
        })
    }
}

/// One open database transaction.
///
/// Dropping it without calling [`ReportTransaction::commit`] rolls back.
pub struct PostgresTransaction {
    tx: Transaction<'static, Postgres>,
}

impl RequestStore for PostgresTransaction {
    fn find_request(&mut self, id: ReportId) -> StoreFuture<'_, Option<ReportRequest>> {
        Box::pin(select_request(&mut self.tx, id))
    }

    fn insert_request(&mut self, request: &ReportRequest) -> StoreFuture<'_, ()> {
        let request = request.clone();
        Box::pin(async move {
            sqlx::query(
                "INSERT INTO report_request \
                 (id, product_id, layout_id, start_date, end_date, status, version) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7)",
            )
            .bind(Uuid::from(request.id))
            .bind(&request.parameters.product_id)
            .bind(&request.parameters.layout_id)
            .bind(request.parameters.start_date)
            .bind(request.parameters.end_date)
            .bind(request.status.as_str())
            .bind(version_to_db(request.version)?)
            .execute(&mut *self.tx)
            .await
            .map_err(|e| match e {
                sqlx::Error::Database(ref db) if db.is_unique_violation() => {
                    StoreError::AlreadyExists(request.id)
                }
                other => database_error(other),
            })?;

            debug!(report_id = %request.id, "Inserted report request");
            Ok(())
        })
    }

    fn update_request(
        &mut self,
        request: &ReportRequest,
        expected: Version,
    ) -> StoreFuture<'_, Version> {
        let request = request.clone();
        Box::pin(async move {
            let row = sqlx::query(
                "UPDATE report_request \
                 SET product_id = $3, layout_id = $4, start_date = $5, end_date = $6, \
                     status = $7, version = version + 1 \
                 WHERE id = $1 AND version = $2 \
                 RETURNING version",
            )
            .bind(Uuid::from(request.id))
            .bind(version_to_db(expected)?)
            .bind(&request.parameters.product_id)
            .bind(&request.parameters.layout_id)
            .bind(request.parameters.start_date)
            .bind(request.parameters.end_date)
            .bind(request.status.as_str())
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(database_error)?;

            match row {
                Some(row) => {
                    let version = version_from_db(request.id, row.try_get("version"))?;
                    debug!(report_id = %request.id, %version, status = %request.status, "Updated report request");
                    Ok(version)
                }
                None => Err(missed_write(&mut self.tx, request.id, expected).await),
            }
        })
    }

    fn delete_request(&mut self, id: ReportId, expected: Version) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            let deleted = sqlx::query("DELETE FROM report_request WHERE id = $1 AND version = $2")
                .bind(Uuid::from(id))
                .bind(version_to_db(expected)?)
                .execute(&mut *self.tx)
                .await
                .map_err(database_error)?
                .rows_affected();

            if deleted == 0 {
                return Err(missed_write(&mut self.tx, id, expected).await);
            }
            debug!(report_id = %id, "Deleted report request");
            Ok(())
        })
    }
}

impl ResultStore for PostgresTransaction {
    fn find_result(&mut self, id: ReportId) -> StoreFuture<'_, Option<ReportResult>> {
        Box::pin(select_result(&mut self.tx, id))
    }

    fn upsert_result(&mut self, result: &ReportResult) -> StoreFuture<'_, ()> {
        let result = result.clone();
        Box::pin(async move {
            let payment_count = i64::try_from(result.payment_count).map_err(|_| {
                StoreError::DatabaseError(format!(
                    "Payment count {} does not fit in BIGINT",
                    result.payment_count
                ))
            })?;

            sqlx::query(
                "INSERT INTO report_result (request_id, conversion_ratio, payment_count) \
                 VALUES ($1, $2, $3) \
                 ON CONFLICT (request_id) DO UPDATE \
                 SET conversion_ratio = EXCLUDED.conversion_ratio, \
                     payment_count = EXCLUDED.payment_count",
            )
            .bind(Uuid::from(result.request_id))
            .bind(result.conversion_ratio)
            .bind(payment_count)
            .execute(&mut *self.tx)
            .await
            .map_err(database_error)?;
            Ok(())
        })
    }

    fn delete_result(&mut self, id: ReportId) -> StoreFuture<'_, bool> {
        Box::pin(async move {
            let deleted = sqlx::query("DELETE FROM report_result WHERE request_id = $1")
                .bind(Uuid::from(id))
                .execute(&mut *self.tx)
                .await
                .map_err(database_error)?
                .rows_affected();
            Ok(deleted > 0)
        })
    }
}

impl ReportTransaction for PostgresTransaction {
    fn commit(self: Box<Self>) -> StoreFuture<'static, ()> {
        Box::pin(async move { self.tx.commit().await.map_err(database_error) })
    }

    fn rollback(self: Box<Self>) -> StoreFuture<'static, ()> {
        Box::pin(async move { self.tx.rollback().await.map_err(database_error) })
    }
}

async fn select_request(
    conn: &mut PgConnection,
    id: ReportId,
) -> Result<Option<ReportRequest>, StoreError> {
    let row = sqlx::query(SELECT_REQUEST)
        .bind(Uuid::from(id))
        .fetch_optional(conn)
        .await
        .map_err(database_error)?;

    row.map(|row| row_to_request(id, &row)).transpose()
}

async fn select_result(
    conn: &mut PgConnection,
    id: ReportId,
) -> Result<Option<ReportResult>, StoreError> {
    let row = sqlx::query(SELECT_RESULT)
        .bind(Uuid::from(id))
        .fetch_optional(conn)
        .await
        .map_err(database_error)?;

    row.map(|row| row_to_result(id, &row)).transpose()
}

/// Explain why a conditional write touched no row.
async fn missed_write(conn: &mut PgConnection, id: ReportId, expected: Version) -> StoreError {
    let current = sqlx::query("SELECT version FROM report_request WHERE id = $1")
        .bind(Uuid::from(id))
        .fetch_optional(conn)
        .await;

    match current {
        Ok(None) => StoreError::NotFound(id),
        Ok(Some(row)) => match version_from_db(id, row.try_get("version")) {
            Ok(actual) => StoreError::VersionConflict {
                id,
                expected,
                actual: Some(actual),
            },
            Err(e) => e,
        },
        Err(e) => database_error(e),
    }
}

fn row_to_request(id: ReportId, row: &PgRow) -> Result<ReportRequest, StoreError> {
    let corrupt = |e: sqlx::Error| StoreError::CorruptRow {
        id,
        reason: e.to_string(),
    };

    let status: String = row.try_get("status").map_err(corrupt)?;
    let status = ReportStatus::parse(&status).ok_or_else(|| StoreError::CorruptRow {
        id,
        reason: format!("unknown status {status:?}"),
    })?;

    Ok(ReportRequest {
        id: ReportId::from_uuid(row.try_get("id").map_err(corrupt)?),
        parameters: ReportParameters {
            product_id: row.try_get("product_id").map_err(corrupt)?,
            layout_id: row.try_get("layout_id").map_err(corrupt)?,
            start_date: row.try_get("start_date").map_err(corrupt)?,
            end_date: row.try_get("end_date").map_err(corrupt)?,
        },
        status,
        version: version_from_db(id, row.try_get("version"))?,
    })
}

fn row_to_result(id: ReportId, row: &PgRow) -> Result<ReportResult, StoreError> {
    let corrupt = |reason: String| StoreError::CorruptRow { id, reason };

    let payment_count: i64 = row
        .try_get("payment_count")
        .map_err(|e| corrupt(e.to_string()))?;

    Ok(ReportResult {
        request_id: ReportId::from_uuid(
            row.try_get("request_id").map_err(|e| corrupt(e.to_string()))?,
        ),
        conversion_ratio: row
            .try_get("conversion_ratio")
            .map_err(|e| corrupt(e.to_string()))?,
        payment_count: u64::try_from(payment_count)
            .map_err(|_| corrupt(format!("negative payment count {payment_count}")))?,
    })
}

fn version_to_db(version: Version) -> Result<i64, StoreError> {
    i64::try_from(version.value())
        .map_err(|_| StoreError::DatabaseError(format!("Version {version} does not fit in BIGINT")))
}

fn version_from_db(id: ReportId, raw: Result<i64, sqlx::Error>) -> Result<Version, StoreError> {
    let raw = raw.map_err(|e| StoreError::CorruptRow {
        id,
        reason: e.to_string(),
    })?;
    u64::try_from(raw)
        .map(Version::new)
        .map_err(|_| StoreError::CorruptRow {
            id,
            reason: format!("negative version {raw}"),
        })
}

fn database_error(e: sqlx::Error) -> StoreError {
    StoreError::DatabaseError(e.to_string())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn versions_map_to_bigint() {
        assert_eq!(version_to_db(Version::new(42)).unwrap(), 42);
        assert!(version_to_db(Version::new(u64::MAX)).is_err());
    }

    #[test]
    fn negative_version_is_corrupt() {
        let id = ReportId::new();
        assert_eq!(version_from_db(id, Ok(3)).unwrap(), Version::new(3));
        assert!(matches!(
            version_from_db(id, Ok(-1)),
            Err(StoreError::CorruptRow { .. })
        ));
    }

    #[test]
    fn driver_errors_become_database_errors() {
        let err = database_error(sqlx::Error::PoolTimedOut);
        assert!(matches!(err, StoreError::DatabaseError(_)));
        assert!(!err.is_conflict());
    }
}

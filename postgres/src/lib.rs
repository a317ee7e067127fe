//! `PostgreSQL` storage for the conversion report pipeline.
//!
//! This crate provides the durable side of the system:
//!
//! - [`PostgresReportStore`]: report requests and results with optimistic
//!   concurrency on every request write
//! - [`PostgresAnalytics`]: read-only counts over the `views` and `payments`
//!   tables
//! - [`PostgresUserRepository`]: login accounts
//! - [`connect`] and [`migrate`]: pool construction and schema setup
//!
//! All queries are built at runtime with `sqlx::query` so the crate compiles
//! without a live database.
//!
//! # Example
//!
//! ```ignore
//! use conversion_report_postgres::{connect, migrate, PostgresReportStore};
//! use std::time::Duration;
//!
//! let pool = connect("postgres://localhost/reports", 10, Duration::from_secs(30)).await?;
//! migrate(&pool).await?;
//! let store = PostgresReportStore::new(pool);
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod analytics;
mod store;
mod users;

pub use analytics::{ANALYTICS_QUERY_DURATION, PostgresAnalytics};
pub use store::{PostgresReportStore, PostgresTransaction};
pub use users::PostgresUserRepository;

pub use sqlx::PgPool;

use conversion_report_core::store::StoreError;
use sqlx::postgres::PgPoolOptions;
use std::time::Duration;
use tracing::info;

/// Open a connection pool.
///
/// # Errors
///
/// Returns [`StoreError::DatabaseError`] if no connection can be established
/// within `connect_timeout`.
pub async fn connect(
    database_url: &str,
    max_connections: u32,
    connect_timeout: Duration,
) -> Result<PgPool, StoreError> {
    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .acquire_timeout(connect_timeout)
        .connect(database_url)
        .await
        .map_err(|e| StoreError::DatabaseError(format!("Failed to connect: {e}")))?;

    info!(max_connections, "Database pool ready");
    Ok(pool)
}

/// Apply the bundled schema migrations.
///
/// # Errors
///
/// Returns [`StoreError::DatabaseError`] if a migration fails.
pub async fn migrate(pool: &PgPool) -> Result<(), StoreError> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .map_err(|e| StoreError::DatabaseError(format!("Migration failed: {e}")))?;
    Ok(())
}

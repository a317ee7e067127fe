//! # Conversion Report Runtime
//!
//! Use cases and the background worker of the conversion report pipeline.
//!
//! - [`service::ReportService`]: intake, retrieval and admin operations
//! - [`worker::ReportWorker`]: computes a report from a work message
//! - [`consumer::QueueConsumer`]: subscribe-process-settle loop feeding a
//!   [`consumer::MessageHandler`]
//! - [`retry`]: bounded exponential backoff
//! - [`metrics`]: Prometheus exporter and metric names
//!
//! All infrastructure is injected as `Arc<dyn ...>` capabilities from
//! `conversion-report-core`.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod consumer;
pub mod metrics;
pub mod retry;
pub mod service;
pub mod worker;

pub use consumer::{ConsumerError, MessageHandler, QueueConsumer, QueueConsumerBuilder};
pub use retry::RetryPolicy;
pub use service::ReportService;
pub use worker::{Outcome, ReportWorker};

use conversion_report_core::report::ReportId;
use conversion_report_core::store::ReportTransaction;

/// Roll back after a failed unit of work, logging instead of failing.
///
/// The original error is what the caller reports; a rollback failure only
/// means the connection will discard the transaction on its own.
pub(crate) async fn rollback_quietly(tx: Box<dyn ReportTransaction>, id: ReportId) {
    if let Err(e) = tx.rollback().await {
        tracing::warn!(report_id = %id, error = %e, "Rollback failed");
    }
}

//! Prometheus metrics for the report pipeline.
//!
//! Metric names are exported as constants so call sites and dashboards agree.
//!
//! # Example
//!
//! ```rust,no_run
//! use conversion_report_runtime::metrics::MetricsServer;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut server = MetricsServer::new("0.0.0.0:9090".parse()?);
//! server.start()?;
//! // Metrics available at http://localhost:9090/metrics
//! # Ok(())
//! # }
//! ```

use metrics::{describe_counter, describe_histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;
use thiserror::Error;

/// Requests accepted by intake.
pub const REPORTS_SUBMITTED: &str = "reports_submitted_total";
/// Requests whose result was written by a worker.
pub const REPORTS_COMPLETED: &str = "reports_completed_total";
/// Deliveries for requests that were already complete.
pub const REPORTS_DUPLICATE: &str = "reports_duplicate_deliveries_total";
/// Work messages that could not be parsed.
pub const MALFORMED_MESSAGES: &str = "reports_malformed_messages_total";
/// Work messages naming a request that does not exist.
pub const MISSING_REQUESTS: &str = "reports_missing_requests_total";
/// Writes that lost an optimistic concurrency race and were retried or failed.
pub const VERSION_CONFLICTS: &str = "reports_version_conflicts_total";
/// Deliveries handed back to the broker for redelivery.
pub const DELIVERIES_NACKED: &str = "reports_deliveries_nacked_total";
/// Work messages that could not be published after commit.
pub const ENQUEUE_FAILURES: &str = "reports_enqueue_failures_total";
/// Completion notices that could not be published.
pub const NOTIFICATION_FAILURES: &str = "reports_notification_failures_total";
/// Time from delivery to settlement.
pub const PROCESSING_DURATION: &str = "reports_processing_duration_seconds";

/// Errors from metrics operations.
#[derive(Error, Debug)]
pub enum MetricsError {
    /// Failed to build metrics exporter
    #[error("Failed to build metrics exporter: {0}")]
    Build(String),
    /// Failed to install metrics exporter
    #[error("Failed to install metrics exporter: {0}")]
    Install(String),
}

/// Prometheus exporter serving `/metrics` over HTTP.
pub struct MetricsServer {
    addr: SocketAddr,
    handle: Option<PrometheusHandle>,
}

impl MetricsServer {
    /// Create a server that will listen on `addr` once started.
    #[must_use]
    pub const fn new(addr: SocketAddr) -> Self {
        Self { addr, handle: None }
    }

    /// Install the global recorder and start the HTTP listener.
    ///
    /// Must be called from within a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`MetricsError`] if the exporter cannot be built or a
    /// different recorder is already installed.
    pub fn start(&mut self) -> Result<(), MetricsError> {
        let (recorder, exporter) = PrometheusBuilder::new()
            .with_http_listener(self.addr)
            .set_buckets_for_metric(
                Matcher::Suffix("duration_seconds".to_string()),
                &[0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0],
            )
            .map_err(|e| MetricsError::Build(e.to_string()))?
            .build()
            .map_err(|e| MetricsError::Build(e.to_string()))?;

        let handle = recorder.handle();
        metrics::set_global_recorder(recorder).map_err(|e| MetricsError::Install(e.to_string()))?;
        tokio::spawn(async move {
            // `ExporterError` implements neither `Debug` nor `Display` in
            // metrics-exporter-prometheus 0.15, so it cannot be logged as a field.
            if exporter.await.is_err() {
                tracing::error!("Metrics exporter stopped");
            }
        });

        register_metrics();
        self.handle = Some(handle);
        tracing::info!(addr = %self.addr, "Metrics server started");
        Ok(())
    }

    /// Render current metrics in Prometheus format.
    ///
    /// Returns `None` if the server hasn't been started.
    #[must_use]
    pub fn render(&self) -> Option<String> {
        self.handle.as_ref().map(PrometheusHandle::render)
    }
}

/// Register all metric descriptions.
fn register_metrics() {
    describe_counter!(REPORTS_SUBMITTED, "Report requests accepted by intake");
    describe_counter!(REPORTS_COMPLETED, "Report results written by workers");
    describe_counter!(
        REPORTS_DUPLICATE,
        "Deliveries skipped because the report was already complete"
    );
    describe_counter!(MALFORMED_MESSAGES, "Work messages that could not be parsed");
    describe_counter!(
        MISSING_REQUESTS,
        "Work messages naming a report request that does not exist"
    );
    describe_counter!(
        VERSION_CONFLICTS,
        "Completion writes rejected by the optimistic version check"
    );
    describe_counter!(DELIVERIES_NACKED, "Deliveries returned for redelivery");
    describe_counter!(
        ENQUEUE_FAILURES,
        "Committed report requests whose work message could not be published"
    );
    describe_counter!(
        NOTIFICATION_FAILURES,
        "Completion notices that could not be published"
    );
    describe_histogram!(
        PROCESSING_DURATION,
        "Time from receiving a work message to settling it"
    );
}

//! End-to-end pipeline wiring over in-memory infrastructure.

use crate::{InMemoryAnalytics, InMemoryMessageBus, InMemoryReportStore};
use conversion_report_runtime::retry::RetryPolicy;
use conversion_report_runtime::{Outcome, ReportService, ReportWorker};
use std::sync::Arc;
use std::time::Duration;

/// Upper bound on deliveries processed by one [`PipelineHarness::drain`].
const DRAIN_LIMIT: usize = 1_000;

/// Intake service and worker sharing one in-memory store, analytics reader
/// and message bus.
///
/// Work messages are processed only when the test asks for it, so every
/// intermediate state can be observed.
///
/// # Example
///
/// ```
/// use conversion_report_testing::{PipelineHarness, helpers};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let harness = PipelineHarness::new();
/// let id = harness
///     .service
///     .submit(&helpers::user(), helpers::parameters("p1", "l1", "2024-01-01T00:00:00", "2024-01-02T00:00:00"))
///     .await?;
/// harness.drain().await;
/// assert!(harness.store.result(id).is_some());
/// # Ok(())
/// # }
/// ```
pub struct PipelineHarness {
    /// Request and result storage
    pub store: InMemoryReportStore,
    /// View and payment events
    pub analytics: InMemoryAnalytics,
    /// Work queue and notifications
    pub bus: InMemoryMessageBus,
    /// Intake, retrieval and admin operations
    pub service: ReportService,
    /// Worker consuming the work queue
    pub worker: ReportWorker,
}

impl PipelineHarness {
    /// Topic carrying work messages.
    pub const REQUESTS_TOPIC: &'static str = "report.requests";
    /// Topic carrying completion notices.
    pub const NOTIFICATIONS_TOPIC: &'static str = "notifications";

    /// Wire a fresh pipeline with notifications enabled and millisecond
    /// retry delays.
    #[must_use]
    pub fn new() -> Self {
        let store = InMemoryReportStore::new();
        let analytics = InMemoryAnalytics::new();
        let bus = InMemoryMessageBus::new();

        let retry = RetryPolicy::builder()
            .initial_delay(Duration::from_millis(1))
            .max_delay(Duration::from_millis(5))
            .build();
        let service = ReportService::new(
            Arc::new(store.clone()),
            Arc::new(bus.clone()),
            Self::REQUESTS_TOPIC,
        )
        .with_retry_policy(retry.clone());
        let worker = ReportWorker::new(Arc::new(store.clone()), Arc::new(analytics.clone()))
            .with_notifications(Arc::new(bus.clone()), Self::NOTIFICATIONS_TOPIC)
            .with_retry_policy(retry);

        Self {
            store,
            analytics,
            bus,
            service,
            worker,
        }
    }

    /// Process and settle the next queued work message, if any.
    pub async fn deliver_next(&self) -> Option<Outcome> {
        let delivery = self.bus.try_next(Self::REQUESTS_TOPIC)?;
        let outcome = self.worker.process(delivery.payload()).await;
        if let Err(e) = delivery.settle(outcome.settlement()).await {
            tracing::warn!(error = %e, "Harness failed to settle delivery");
        }
        Some(outcome)
    }

    /// Process work messages until the queue is empty.
    ///
    /// Nacked messages are requeued and processed again, so a permanently
    /// failing message stops the drain only at an internal safety limit.
    pub async fn drain(&self) -> Vec<Outcome> {
        let mut outcomes = Vec::new();
        while outcomes.len() < DRAIN_LIMIT {
            match self.deliver_next().await {
                Some(outcome) => outcomes.push(outcome),
                None => break,
            }
        }
        outcomes
    }
}

impl Default for PipelineHarness {
    fn default() -> Self {
        Self::new()
    }
}

//! The report worker: turns a work message into a persisted result.
//!
//! For each `Report ID: <uuid>` message the worker:
//!
//! 1. loads the request (a missing request is acknowledged and dropped,
//!    including one deleted after the load but before the write)
//! 2. skips requests that are already complete with a result
//! 3. counts views and payments for the request window
//! 4. in one transaction upserts the result and marks the request
//!    `COMPLETED`, guarded by the version it loaded
//! 5. publishes a completion notice if configured
//!
//! A lost version race restarts the whole computation from step 1 with
//! backoff. Transient store or analytics failures leave the message to be
//! redelivered.

use crate::consumer::MessageHandler;
use crate::metrics::{
    DELIVERIES_NACKED, MALFORMED_MESSAGES, MISSING_REQUESTS, NOTIFICATION_FAILURES,
    PROCESSING_DURATION, REPORTS_COMPLETED, REPORTS_DUPLICATE, VERSION_CONFLICTS,
};
use crate::retry::{RetryPolicy, retry_if};
use crate::rollback_quietly;
use conversion_report_core::analytics::{Analytics, AnalyticsError, AnalyticsQuery};
use conversion_report_core::message::{CompletionNotice, ReportMessage};
use conversion_report_core::queue::{Publisher, Settlement};
use conversion_report_core::report::{
    ReportId, ReportRequest, ReportResult, ReportStatus, Version,
};
use conversion_report_core::store::{ReportStore, ReportTransaction, StoreError};
use metrics::{counter, histogram};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tracing::{debug, info, warn};

/// What happened to one work message.
#[derive(Clone, Debug, PartialEq)]
pub enum Outcome {
    /// A result was written and the request marked complete.
    Completed {
        /// Request that completed
        id: ReportId,
        /// Result that was written
        result: ReportResult,
    },
    /// The request was already complete; nothing was read or written.
    AlreadyCompleted(ReportId),
    /// The payload was not a valid work message.
    Malformed,
    /// No request exists for the id.
    MissingRequest(ReportId),
    /// Processing failed transiently and should be retried later.
    Deferred {
        /// Request being processed
        id: ReportId,
        /// Why it was deferred
        reason: String,
    },
}

impl Outcome {
    /// How the delivery carrying this message must be settled.
    #[must_use]
    pub const fn settlement(&self) -> Settlement {
        match self {
            Self::Deferred { .. } => Settlement::Nack,
            _ => Settlement::Ack,
        }
    }
}

/// Failure of a single processing attempt.
#[derive(Error, Debug, Clone)]
pub enum AttemptError {
    /// Storage failed or a version check lost.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Counting failed.
    #[error(transparent)]
    Analytics(#[from] AnalyticsError),
}

impl AttemptError {
    const fn is_conflict(&self) -> bool {
        matches!(self, Self::Store(e) if e.is_conflict())
    }
}

#[derive(Clone)]
struct Notifications {
    publisher: Arc<dyn Publisher>,
    topic: String,
}

/// Computes conversion reports from work messages.
///
/// Cloning is cheap; clones share the injected capabilities.
#[derive(Clone)]
pub struct ReportWorker {
    store: Arc<dyn ReportStore>,
    analytics: Arc<dyn Analytics>,
    notifications: Option<Notifications>,
    retry: RetryPolicy,
}

impl ReportWorker {
    /// Create a worker with the default retry policy and no notifications.
    #[must_use]
    pub fn new(store: Arc<dyn ReportStore>, analytics: Arc<dyn Analytics>) -> Self {
        Self {
            store,
            analytics,
            notifications: None,
            retry: RetryPolicy::default(),
        }
    }

    /// Publish `REPORT_COMPLETED:<id>` to `topic` after each completion.
    #[must_use]
    pub fn with_notifications(mut self, publisher: Arc<dyn Publisher>, topic: impl Into<String>) -> Self {
        self.notifications = Some(Notifications {
            publisher,
            topic: topic.into(),
        });
        self
    }

    /// Set how version conflicts are retried.
    #[must_use]
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Process one work message payload.
    pub async fn process(&self, payload: &str) -> Outcome {
        let started = Instant::now();
        let outcome = self.process_inner(payload).await;
        histogram!(PROCESSING_DURATION).record(started.elapsed().as_secs_f64());
        outcome
    }

    async fn process_inner(&self, payload: &str) -> Outcome {
        let id = match ReportMessage::parse(payload) {
            Ok(message) => message.id(),
            Err(e) => {
                warn!(error = %e, "Dropping malformed work message");
                counter!(MALFORMED_MESSAGES).increment(1);
                return Outcome::Malformed;
            }
        };

        let attempt = retry_if(&self.retry, || self.attempt(id), |e: &AttemptError| {
            if e.is_conflict() {
                counter!(VERSION_CONFLICTS).increment(1);
                true
            } else {
                false
            }
        })
        .await;

        match attempt {
            Ok(outcome) => {
                match &outcome {
                    Outcome::Completed { result, .. } => {
                        info!(
                            report_id = %id,
                            conversion_ratio = result.conversion_ratio,
                            payment_count = result.payment_count,
                            "Report completed"
                        );
                        counter!(REPORTS_COMPLETED).increment(1);
                        self.notify(id).await;
                    }
                    Outcome::AlreadyCompleted(_) => {
                        debug!(report_id = %id, "Report already completed, skipping");
                        counter!(REPORTS_DUPLICATE).increment(1);
                    }
                    Outcome::MissingRequest(_) => {
                        warn!(report_id = %id, "No report request for work message");
                        counter!(MISSING_REQUESTS).increment(1);
                    }
                    Outcome::Malformed | Outcome::Deferred { .. } => {}
                }
                outcome
            }
            Err(e) => {
                warn!(report_id = %id, error = %e, "Report processing deferred");
                counter!(DELIVERIES_NACKED).increment(1);
                Outcome::Deferred {
                    id,
                    reason: e.to_string(),
                }
            }
        }
    }

    async fn attempt(&self, id: ReportId) -> Result<Outcome, AttemptError> {
        let Some(request) = self.store.find_request(id).await? else {
            return Ok(Outcome::MissingRequest(id));
        };

        if request.is_completed() && self.store.find_result(id).await?.is_some() {
            return Ok(Outcome::AlreadyCompleted(id));
        }

        let counts = self
            .analytics
            .count_conversions(&AnalyticsQuery::from(&request.parameters))
            .await?;
        let result = ReportResult {
            request_id: id,
            conversion_ratio: counts.ratio(),
            payment_count: counts.payments,
        };

        let mut tx = self.store.begin().await?;
        match write_completion(tx.as_mut(), &request, &result).await {
            Ok(version) => {
                tx.commit().await?;
                debug!(report_id = %id, %version, "Completion committed");
                Ok(Outcome::Completed { id, result })
            }
            Err(StoreError::NotFound(missing)) => {
                rollback_quietly(tx, id).await;
                debug!(report_id = %id, "Request deleted before completion was written");
                Ok(Outcome::MissingRequest(missing))
            }
            Err(e) => {
                rollback_quietly(tx, id).await;
                Err(e.into())
            }
        }
    }

    async fn notify(&self, id: ReportId) {
        let Some(notifications) = &self.notifications else {
            return;
        };
        let notice = CompletionNotice::new(id).to_string();
        if let Err(e) = notifications
            .publisher
            .publish(&notifications.topic, &notice)
            .await
        {
            warn!(report_id = %id, error = %e, "Failed to publish completion notice");
            counter!(NOTIFICATION_FAILURES).increment(1);
        }
    }
}

async fn write_completion(
    tx: &mut dyn ReportTransaction,
    request: &ReportRequest,
    result: &ReportResult,
) -> Result<Version, StoreError> {
    tx.upsert_result(result).await?;
    let completed = ReportRequest {
        status: ReportStatus::Completed,
        ..request.clone()
    };
    tx.update_request(&completed, request.version).await
}

impl MessageHandler for ReportWorker {
    fn handle<'a>(&'a self, payload: &'a str) -> Pin<Box<dyn Future<Output = Settlement> + Send + 'a>> {
        Box::pin(async move { self.process(payload).await.settlement() })
    }
}

//! Report use cases: intake, retrieval and admin mutation.
//!
//! Every operation takes the authenticated [`Principal`] explicitly and
//! checks its role before touching storage.
//!
//! | Operation | Roles |
//! |---|---|
//! | [`ReportService::submit`] | `USER` |
//! | [`ReportService::fetch`] | `USER`, `ADMIN` |
//! | [`ReportService::update`] | `ADMIN` |
//! | [`ReportService::delete`] | `ADMIN` |
//!
//! Writes are committed before the work message is published. If the
//! publish fails the request stays `PENDING` and the caller gets an error.
//!
//! Admin writes that did not name a version re-read and retry when a
//! concurrent writer (usually a worker completing the report) commits first.

use crate::metrics::{ENQUEUE_FAILURES, REPORTS_SUBMITTED, VERSION_CONFLICTS};
use crate::retry::{RetryPolicy, retry_if};
use crate::rollback_quietly;
use conversion_report_core::error::ReportError;
use conversion_report_core::message::ReportMessage;
use conversion_report_core::principal::{Principal, Role};
use conversion_report_core::queue::Publisher;
use conversion_report_core::report::{
    ReportId, ReportParameters, ReportRequest, ReportResult, ReportStatus, Version,
};
use conversion_report_core::store::{ReportStore, ReportTransaction};
use metrics::counter;
use std::sync::Arc;
use tracing::{error, info};

const SUBMIT_ROLES: &[Role] = &[Role::User];
const READ_ROLES: &[Role] = &[Role::User, Role::Admin];
const ADMIN_ROLES: &[Role] = &[Role::Admin];

fn authorize(principal: &Principal, required: &'static [Role]) -> Result<(), ReportError> {
    if principal.has_any_role(required) {
        Ok(())
    } else {
        Err(ReportError::Forbidden {
            actual: principal.role,
            required,
        })
    }
}

/// Intake, retrieval and admin operations over report requests.
#[derive(Clone)]
pub struct ReportService {
    store: Arc<dyn ReportStore>,
    publisher: Arc<dyn Publisher>,
    requests_topic: String,
    retry: RetryPolicy,
}

impl ReportService {
    /// Create a service publishing work messages to `requests_topic`.
    #[must_use]
    pub fn new(
        store: Arc<dyn ReportStore>,
        publisher: Arc<dyn Publisher>,
        requests_topic: impl Into<String>,
    ) -> Self {
        Self {
            store,
            publisher,
            requests_topic: requests_topic.into(),
            retry: RetryPolicy::default(),
        }
    }

    /// Override the retry policy used when an admin write loses a version race.
    #[must_use]
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Accept a new report request and queue it for computation.
    ///
    /// # Errors
    ///
    /// - [`ReportError::Forbidden`] unless the principal has role `USER`
    /// - [`ReportError::InvalidInput`] if the parameters do not validate
    /// - [`ReportError::Store`] or [`ReportError::Queue`] on infrastructure failure
    pub async fn submit(
        &self,
        principal: &Principal,
        parameters: ReportParameters,
    ) -> Result<ReportId, ReportError> {
        authorize(principal, SUBMIT_ROLES)?;
        parameters.validate()?;

        let request = ReportRequest::pending(ReportId::new(), parameters);
        let id = request.id;

        let mut tx = self.store.begin().await?;
        if let Err(e) = tx.insert_request(&request).await {
            rollback_quietly(tx, id).await;
            return Err(e.into());
        }
        tx.commit().await?;

        info!(report_id = %id, user = %principal.username, "Report request accepted");
        counter!(REPORTS_SUBMITTED).increment(1);

        self.enqueue(id).await?;
        Ok(id)
    }

    /// Return the computed result for a request.
    ///
    /// # Errors
    ///
    /// - [`ReportError::Forbidden`] unless the principal has role `USER` or `ADMIN`
    /// - [`ReportError::NotFound`] if no result exists yet
    pub async fn fetch(&self, principal: &Principal, id: ReportId) -> Result<ReportResult, ReportError> {
        authorize(principal, READ_ROLES)?;
        self.store
            .find_result(id)
            .await?
            .ok_or(ReportError::NotFound(id))
    }

    /// Replace the parameters of a request and queue it for recomputation.
    ///
    /// The request goes back to `PENDING` and any existing result is removed
    /// in the same transaction. `expected` defaults to the version currently
    /// stored; in that case a lost version race is retried with a fresh read.
    /// Returns the new version.
    ///
    /// # Errors
    ///
    /// - [`ReportError::Forbidden`] unless the principal has role `ADMIN`
    /// - [`ReportError::InvalidInput`] if the parameters do not validate
    /// - [`ReportError::NotFound`] if the request does not exist
    /// - [`ReportError::VersionConflict`] if `expected` is stale, or if no
    ///   version was given and every retry lost the race
    pub async fn update(
        &self,
        principal: &Principal,
        id: ReportId,
        parameters: ReportParameters,
        expected: Option<Version>,
    ) -> Result<Version, ReportError> {
        authorize(principal, ADMIN_ROLES)?;
        parameters.validate()?;

        let version = retry_if(
            &self.retry,
            || self.reset_once(id, parameters.clone(), expected),
            |e: &ReportError| expected.is_none() && is_lost_race(e),
        )
        .await?;

        info!(report_id = %id, user = %principal.username, %version, "Report request updated");
        self.enqueue(id).await?;
        Ok(version)
    }

    /// Delete a request and its result.
    ///
    /// # Errors
    ///
    /// - [`ReportError::Forbidden`] unless the principal has role `ADMIN`
    /// - [`ReportError::NotFound`] if the request does not exist
    /// - [`ReportError::VersionConflict`] if every retry lost a version race
    pub async fn delete(&self, principal: &Principal, id: ReportId) -> Result<(), ReportError> {
        authorize(principal, ADMIN_ROLES)?;

        retry_if(&self.retry, || self.remove_once(id), is_lost_race).await?;

        info!(report_id = %id, user = %principal.username, "Report request deleted");
        Ok(())
    }

    async fn reset_once(
        &self,
        id: ReportId,
        parameters: ReportParameters,
        expected: Option<Version>,
    ) -> Result<Version, ReportError> {
        let mut tx = self.store.begin().await?;
        let version = match reset_request(tx.as_mut(), id, parameters, expected).await {
            Ok(version) => version,
            Err(e) => {
                rollback_quietly(tx, id).await;
                return Err(e);
            }
        };
        tx.commit().await?;
        Ok(version)
    }

    async fn remove_once(&self, id: ReportId) -> Result<(), ReportError> {
        let mut tx = self.store.begin().await?;
        if let Err(e) = remove_request(tx.as_mut(), id).await {
            rollback_quietly(tx, id).await;
            return Err(e);
        }
        tx.commit().await?;
        Ok(())
    }

    async fn enqueue(&self, id: ReportId) -> Result<(), ReportError> {
        let message = ReportMessage::new(id).to_string();
        self.publisher
            .publish(&self.requests_topic, &message)
            .await
            .map_err(|e| {
                error!(
                    report_id = %id,
                    topic = %self.requests_topic,
                    error = %e,
                    "Report request committed but not queued"
                );
                counter!(ENQUEUE_FAILURES).increment(1);
                ReportError::from(e)
            })
    }
}

fn is_lost_race(err: &ReportError) -> bool {
    let conflict = matches!(err, ReportError::VersionConflict { .. });
    if conflict {
        counter!(VERSION_CONFLICTS).increment(1);
    }
    conflict
}

async fn reset_request(
    tx: &mut dyn ReportTransaction,
    id: ReportId,
    parameters: ReportParameters,
    expected: Option<Version>,
) -> Result<Version, ReportError> {
    let current = tx.find_request(id).await?.ok_or(ReportError::NotFound(id))?;
    let expected = expected.unwrap_or(current.version);
    let reset = ReportRequest {
        id,
        parameters,
        status: ReportStatus::Pending,
        version: current.version,
    };
    let version = tx.update_request(&reset, expected).await?;
    tx.delete_result(id).await?;
    Ok(version)
}

async fn remove_request(tx: &mut dyn ReportTransaction, id: ReportId) -> Result<(), ReportError> {
    let current = tx.find_request(id).await?.ok_or(ReportError::NotFound(id))?;
    tx.delete_result(id).await?;
    tx.delete_request(id, current.version).await?;
    Ok(())
}

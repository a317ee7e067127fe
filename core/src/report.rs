//! Report request and result types.
//!
//! A [`ReportRequest`] is created in [`ReportStatus::Pending`] by intake and
//! moved to [`ReportStatus::Completed`] by the worker once its
//! [`ReportResult`] has been persisted. Both records share the same
//! [`ReportId`].

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

/// Identifier shared by a report request and its result.
///
/// Always a UUID in canonical hyphenated form on the wire.
///
/// # Examples
///
/// ```
/// use conversion_report_core::report::ReportId;
///
/// let id = ReportId::new();
/// let parsed: ReportId = id.to_string().parse().unwrap();
/// assert_eq!(id, parsed);
/// ```
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ReportId(Uuid);

impl ReportId {
    /// Allocate a fresh random (v4) identifier.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Wrap an existing UUID.
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// The underlying UUID.
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for ReportId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ReportId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.hyphenated())
    }
}

impl FromStr for ReportId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

impl From<Uuid> for ReportId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl From<ReportId> for Uuid {
    fn from(id: ReportId) -> Self {
        id.0
    }
}

/// Optimistic concurrency version of a report request.
///
/// New requests start at [`Version::INITIAL`]. Every persisted mutation
/// moves the version forward by one; a write that names a stale version is
/// rejected by the store.
///
/// # Examples
///
/// ```
/// use conversion_report_core::report::Version;
///
/// let v0 = Version::INITIAL;
/// assert_eq!(v0.next(), Version::new(1));
/// ```
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Version(u64);

impl Version {
    /// The version of a freshly created request.
    pub const INITIAL: Self = Self(0);

    /// Create a `Version` with the given value.
    #[must_use]
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    /// Get the version number.
    #[must_use]
    pub const fn value(self) -> u64 {
        self.0
    }

    /// Get the next version (current + 1).
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }

    /// Check if this is the initial version (0).
    #[must_use]
    pub const fn is_initial(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for Version {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl From<Version> for u64 {
    fn from(version: Version) -> Self {
        version.0
    }
}

/// Lifecycle state of a report request.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReportStatus {
    /// Accepted and waiting for a worker.
    Pending,
    /// Result persisted.
    Completed,
}

impl ReportStatus {
    /// Storage representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Completed => "COMPLETED",
        }
    }

    /// Parse the storage representation.
    ///
    /// Returns `None` for anything other than `PENDING` or `COMPLETED`.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "PENDING" => Some(Self::Pending),
            "COMPLETED" => Some(Self::Completed),
            _ => None,
        }
    }
}

impl fmt::Display for ReportStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a set of report parameters was rejected.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// `product_id` is empty or whitespace.
    #[error("productId must not be blank")]
    BlankProductId,

    /// `layout_id` is empty or whitespace.
    #[error("layoutId must not be blank")]
    BlankLayoutId,

    /// The window ends before it starts.
    #[error("startDate {start} is after endDate {end}")]
    InvertedWindow {
        /// Requested window start
        start: NaiveDateTime,
        /// Requested window end
        end: NaiveDateTime,
    },
}

/// What a report covers: one product, one layout, one closed time window.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportParameters {
    /// Product the events belong to.
    pub product_id: String,
    /// Visual layout the events were recorded under.
    pub layout_id: String,
    /// Window start, inclusive.
    pub start_date: NaiveDateTime,
    /// Window end, inclusive.
    pub end_date: NaiveDateTime,
}

impl ReportParameters {
    /// Build parameters without validating them.
    #[must_use]
    pub fn new(
        product_id: impl Into<String>,
        layout_id: impl Into<String>,
        start_date: NaiveDateTime,
        end_date: NaiveDateTime,
    ) -> Self {
        Self {
            product_id: product_id.into(),
            layout_id: layout_id.into(),
            start_date,
            end_date,
        }
    }

    /// Check that both identifiers are non-blank and `start_date <= end_date`.
    ///
    /// # Errors
    ///
    /// Returns the first [`ValidationError`] found.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.product_id.trim().is_empty() {
            return Err(ValidationError::BlankProductId);
        }
        if self.layout_id.trim().is_empty() {
            return Err(ValidationError::BlankLayoutId);
        }
        if self.start_date > self.end_date {
            return Err(ValidationError::InvertedWindow {
                start: self.start_date,
                end: self.end_date,
            });
        }
        Ok(())
    }
}

/// A durable request to compute one conversion report.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportRequest {
    /// Server-allocated identifier.
    pub id: ReportId,
    /// What to compute.
    pub parameters: ReportParameters,
    /// Where the request is in its lifecycle.
    pub status: ReportStatus,
    /// Optimistic concurrency version.
    pub version: Version,
}

impl ReportRequest {
    /// A new request in [`ReportStatus::Pending`] at [`Version::INITIAL`].
    #[must_use]
    pub const fn pending(id: ReportId, parameters: ReportParameters) -> Self {
        Self {
            id,
            parameters,
            status: ReportStatus::Pending,
            version: Version::INITIAL,
        }
    }

    /// Whether the worker has already finished this request.
    #[must_use]
    pub fn is_completed(&self) -> bool {
        self.status == ReportStatus::Completed
    }
}

/// The computed outcome of a report request.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ReportResult {
    /// Same id as the owning request.
    pub request_id: ReportId,
    /// `payment_count / view_count`, or `0.0` when there were no views.
    pub conversion_ratio: f64,
    /// Payments in the window.
    pub payment_count: u64,
}

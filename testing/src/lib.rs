//! # Conversion Report Testing
//!
//! In-memory infrastructure and helpers for testing the report pipeline.
//!
//! This crate provides:
//! - [`InMemoryReportStore`]: transactional request/result storage
//! - [`InMemoryAnalytics`]: view and payment counts over recorded events
//! - [`InMemoryMessageBus`]: work queue with ack/nack
//! - [`PipelineHarness`]: service and worker wired over the above
//! - [`FixedClock`]: deterministic time
//!
//! ## Example
//!
//! ```
//! use conversion_report_testing::{PipelineHarness, helpers};
//! use conversion_report_core::report::ReportStatus;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let harness = PipelineHarness::new();
//! let params = helpers::parameters("p1", "l1", "2024-01-01T00:00:00", "2024-01-31T23:59:59");
//! let id = harness.service.submit(&helpers::user(), params).await?;
//!
//! harness.drain().await;
//! assert_eq!(harness.store.request(id).map(|r| r.status), Some(ReportStatus::Completed));
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod analytics;
mod harness;
mod message_bus;
mod report_store;

pub use analytics::InMemoryAnalytics;
pub use harness::PipelineHarness;
pub use message_bus::InMemoryMessageBus;
pub use report_store::{InMemoryReportStore, InMemoryTransaction};

/// Mock implementations of environment traits.
pub mod mocks {
    use chrono::{DateTime, Duration, Utc};
    use conversion_report_core::clock::Clock;
    use std::sync::{Arc, RwLock};

    /// Clock that only moves when told to.
    ///
    /// Clones share the same time, so a test can advance the clock seen by
    /// a component it has already handed a clone to.
    ///
    /// # Example
    ///
    /// ```
    /// use conversion_report_testing::mocks::FixedClock;
    /// use conversion_report_core::clock::Clock;
    /// use chrono::{Duration, Utc};
    ///
    /// let clock = FixedClock::new(Utc::now());
    /// let before = clock.now();
    /// clock.advance(Duration::hours(1));
    /// assert_eq!(clock.now() - before, Duration::hours(1));
    /// ```
    #[derive(Debug, Clone)]
    pub struct FixedClock {
        time: Arc<RwLock<DateTime<Utc>>>,
    }

    impl FixedClock {
        /// Create a clock stopped at `time`.
        #[must_use]
        pub fn new(time: DateTime<Utc>) -> Self {
            Self {
                time: Arc::new(RwLock::new(time)),
            }
        }

        /// Move the clock forward.
        pub fn advance(&self, by: Duration) {
            if let Ok(mut time) = self.time.write() {
                *time += by;
            }
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.time
                .read()
                .map_or_else(|poisoned| *poisoned.into_inner(), |time| *time)
        }
    }

    /// Create a default fixed clock for tests (2025-01-01 00:00:00 UTC).
    ///
    /// # Panics
    ///
    /// Panics if the hardcoded timestamp fails to parse.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn test_clock() -> FixedClock {
        FixedClock::new(
            DateTime::parse_from_rfc3339("2025-01-01T00:00:00Z")
                .expect("hardcoded timestamp should always parse")
                .with_timezone(&Utc),
        )
    }
}

/// Builders for common test inputs.
pub mod helpers {
    use chrono::NaiveDateTime;
    use conversion_report_core::principal::{Principal, Role};
    use conversion_report_core::report::ReportParameters;

    /// A caller with role `USER`.
    #[must_use]
    pub fn user() -> Principal {
        Principal::new("user", Role::User)
    }

    /// A caller with role `ADMIN`.
    #[must_use]
    pub fn admin() -> Principal {
        Principal::new("admin", Role::Admin)
    }

    /// Parse an ISO-8601 local date-time such as `2024-01-01T00:00:00`.
    ///
    /// # Panics
    ///
    /// Panics if `s` is not a valid timestamp; inputs are test literals.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn timestamp(s: &str) -> NaiveDateTime {
        s.parse().expect("test timestamp literal should parse")
    }

    /// Report parameters from literal timestamps.
    ///
    /// # Panics
    ///
    /// Panics if either timestamp is invalid.
    #[must_use]
    pub fn parameters(product_id: &str, layout_id: &str, start: &str, end: &str) -> ReportParameters {
        ReportParameters::new(product_id, layout_id, timestamp(start), timestamp(end))
    }
}

pub use mocks::{FixedClock, test_clock};

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, Duration};
    use conversion_report_core::clock::Clock;

    #[test]
    fn test_fixed_clock() {
        let clock = test_clock();
        let time1 = clock.now();
        let time2 = clock.now();
        assert_eq!(time1, time2);
        assert_eq!((time1.year(), time1.month(), time1.day()), (2025, 1, 1));
    }

    #[test]
    fn clones_share_time() {
        let clock = test_clock();
        let other = clock.clone();
        clock.advance(Duration::minutes(5));
        assert_eq!(other.now(), clock.now());
    }

    #[test]
    fn timestamp_helper_parses_iso_local() {
        let t = helpers::timestamp("2024-03-04T05:06:07");
        assert_eq!(t.to_string(), "2024-03-04 05:06:07");
    }
}

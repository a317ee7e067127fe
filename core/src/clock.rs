//! Clock abstraction for time-dependent code (token issuance and expiry).

use chrono::{DateTime, Utc};

/// Source of the current time.
///
/// # Examples
///
/// ```
/// use conversion_report_core::clock::{Clock, SystemClock};
///
/// let clock = SystemClock;
/// let _now = clock.now();
/// ```
pub trait Clock: Send + Sync {
    /// Get the current time.
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock.
#[derive(Copy, Clone, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

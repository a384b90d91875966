//! Time source and scheduling arithmetic.
//!
//! Every timestamp the pipeline writes (event `occurred_at`, task
//! `created_at`/`execute_after`, claim and completion times) comes from a
//! [`Clock`], so tests can pin or advance time.

use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};

use crate::error::DomainError;

/// Abstraction over system time for deterministic behavior.
pub trait Clock: Send + Sync {
    /// Returns the current time.
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock used in production.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Computes `now + delay`, the eligibility time of a freshly pushed task.
///
/// # Errors
///
/// Returns `DomainError::Validation` if the delay does not fit a timestamp.
pub fn schedule_after(now: DateTime<Utc>, delay: Duration) -> Result<DateTime<Utc>, DomainError> {
    TimeDelta::from_std(delay)
        .ok()
        .and_then(|delta| now.checked_add_signed(delta))
        .ok_or_else(|| DomainError::Validation(format!("task delay out of range: {delay:?}")))
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    #[test]
    fn test_schedule_after_adds_delay() {
        let now = Utc.with_ymd_and_hms(2026, 1, 15, 10, 0, 0).unwrap();
        assert_eq!(
            schedule_after(now, Duration::from_secs(90)).unwrap(),
            now + TimeDelta::seconds(90)
        );
    }

    #[test]
    fn test_schedule_after_rejects_out_of_range_delay() {
        let now = Utc.with_ymd_and_hms(2026, 1, 15, 10, 0, 0).unwrap();
        let result = schedule_after(now, Duration::from_secs(u64::MAX));
        assert!(matches!(result, Err(DomainError::Validation(_))));
    }
}

//! Column encoding shared by the SQLite repositories.

use chrono::{DateTime, Utc};
use leadflow_core::error::DomainError;
use uuid::Uuid;

pub(crate) fn storage_error(err: impl std::fmt::Display) -> DomainError {
    DomainError::Storage(err.to_string())
}

/// Whole milliseconds, truncated. Used for instants already reached.
pub(crate) fn to_millis(instant: DateTime<Utc>) -> i64 {
    instant.timestamp_millis()
}

/// Whole milliseconds, rounded up. Used for eligibility times so a stored
/// deadline is never earlier than the computed one.
pub(crate) fn to_millis_ceil(instant: DateTime<Utc>) -> i64 {
    let millis = instant.timestamp_millis();
    if instant.timestamp_subsec_nanos() % 1_000_000 == 0 {
        millis
    } else {
        millis + 1
    }
}

pub(crate) fn from_millis(millis: i64) -> Result<DateTime<Utc>, DomainError> {
    DateTime::from_timestamp_millis(millis)
        .ok_or_else(|| DomainError::Storage(format!("timestamp out of range: {millis}")))
}

pub(crate) fn parse_uuid(raw: &str) -> Result<Uuid, DomainError> {
    Uuid::parse_str(raw).map_err(|e| DomainError::Storage(format!("invalid uuid {raw}: {e}")))
}

pub(crate) fn parse_json(raw: &str) -> Result<serde_json::Value, DomainError> {
    serde_json::from_str(raw).map_err(|e| DomainError::Storage(format!("invalid json: {e}")))
}

#[cfg(test)]
mod tests {
    use chrono::{TimeDelta, TimeZone};

    use super::*;

    #[test]
    fn test_ceil_rounds_partial_milliseconds_up() {
        let whole = Utc.with_ymd_and_hms(2026, 1, 15, 10, 0, 1).unwrap();
        let partial = whole + TimeDelta::microseconds(500);

        assert_eq!(to_millis_ceil(whole), to_millis(whole));
        assert_eq!(to_millis_ceil(partial), to_millis(whole) + 1);
        assert_eq!(to_millis(partial), to_millis(whole));
    }
}

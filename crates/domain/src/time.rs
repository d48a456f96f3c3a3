//! Time and timestamp helpers.

use chrono::{DateTime, NaiveTime, Utc};

use crate::error::ValidationError;

/// UTC timestamp used for `last_changed`, `last_updated`, event times, etc.
pub type Timestamp = DateTime<Utc>;

/// Return the current UTC time.
#[must_use]
pub fn now() -> Timestamp {
    Utc::now()
}

/// Parse a wall-clock time of day written as `HH:MM` (or `HH:MM:SS`).
///
/// # Errors
///
/// Returns [`ValidationError::InvalidTimeOfDay`] when `raw` is not a valid time.
pub fn parse_time_of_day(raw: &str) -> Result<NaiveTime, ValidationError> {
    let raw = raw.trim();
    NaiveTime::parse_from_str(raw, "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(raw, "%H:%M:%S"))
        .map_err(|_| ValidationError::InvalidTimeOfDay(raw.to_string()))
}

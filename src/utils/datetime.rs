//! Date/time utilities for stowage
//!
//! Access-token expiries are computed with chrono and handed to the Azure SDK
//! as `time::OffsetDateTime`, so this module owns the conversions between the two.

use crate::error::{Result, StowageError};
use chrono::{DateTime, Duration, SubsecRound, Utc};
use time::OffsetDateTime;

/// Absolute expiry `hours` after `now`, truncated to whole seconds.
///
/// Signed tokens carry second precision, so truncating here keeps the
/// issued expiry equal to the one parsed back from the token.
pub fn expiry_after_hours(now: DateTime<Utc>, hours: u32) -> DateTime<Utc> {
    now.trunc_subsecs(0) + Duration::hours(i64::from(hours))
}

/// Convert chrono's UTC timestamp into the `time` representation used by the Azure SDK
pub fn to_offset_datetime(dt: DateTime<Utc>) -> Result<OffsetDateTime> {
    OffsetDateTime::from_unix_timestamp(dt.timestamp()).map_err(|e| {
        StowageError::invalid_argument(format!("Timestamp {dt} out of range: {e}"))
    })
}

/// Format a timestamp the way shared access signatures expect it
pub fn format_sas_timestamp(dt: DateTime<Utc>) -> String {
    dt.format("%Y-%m-%dT%H:%M:%SZ").to_string()
}

/// Parse an RFC 3339 timestamp as found in signed tokens
pub fn parse_sas_timestamp(input: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(input.trim())
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            StowageError::invalid_argument(format!("Invalid token timestamp '{input}': {e}"))
        })
}

//! Stored timestamp handling.
//!
//! Rows carry their creation and modification times as fixed-format text
//! (`YYYY-MM-DD HH:MM:SS`, implicitly UTC). [`epoch_seconds`] is the one
//! conversion used everywhere a numeric value is needed.

use chrono::{DateTime, NaiveDateTime, Utc};

use crate::error::TypeError;

/// Text layout of stored timestamps.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Convert stored timestamp text to seconds since the UNIX epoch.
///
/// A fractional-seconds suffix (`.123456`) is accepted and truncated, so the
/// result is exact to the second.
pub fn epoch_seconds(stored: &str) -> Result<i64, TypeError> {
    let trimmed = stored.trim();
    let whole = trimmed.split_once('.').map_or(trimmed, |(secs, _)| secs);
    let naive = NaiveDateTime::parse_from_str(whole, TIMESTAMP_FORMAT).map_err(|e| {
        TypeError::InvalidTimestamp {
            value: stored.to_string(),
            reason: e.to_string(),
        }
    })?;
    Ok(naive.and_utc().timestamp())
}

/// Render a UTC instant in the stored layout.
pub fn format_timestamp(at: DateTime<Utc>) -> String {
    at.format(TIMESTAMP_FORMAT).to_string()
}

/// The current time in the stored layout.
pub fn now_timestamp() -> String {
    format_timestamp(Utc::now())
}

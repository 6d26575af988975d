//! Timestamp encoding for TEXT columns.
//!
//! All timestamps are fixed-width RFC 3339 UTC strings with microsecond
//! precision, so SQL string comparison orders them chronologically.

use std::time::Duration;

use cf_core::{Error, Result};
use chrono::{DateTime, SecondsFormat, Utc};

/// Encode a timestamp for storage.
pub fn format(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// The current time, encoded for storage.
pub fn now() -> String {
    format(Utc::now())
}

/// The encoded time `d` from now.
///
/// Fails with `Validation` when the result is past the representable range.
pub fn after(d: Duration) -> Result<String> {
    chrono::Duration::from_std(d)
        .ok()
        .and_then(|delta| Utc::now().checked_add_signed(delta))
        .map(format)
        .ok_or_else(|| Error::Validation(format!("duration of {}s is out of range", d.as_secs())))
}

/// Decode a stored timestamp.
pub fn parse(s: &str) -> std::result::Result<DateTime<Utc>, chrono::ParseError> {
    DateTime::parse_from_rfc3339(s).map(|dt| dt.with_timezone(&Utc))
}

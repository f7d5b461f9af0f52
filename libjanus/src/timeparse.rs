//! Time window parsing
//!
//! Turns user-supplied `since`/`until` strings into UTC timestamps.

use chrono::{DateTime, Duration, NaiveDate, Utc};

use crate::{JanusError, Result};

/// Parse a time bound relative to `now`
///
/// Accepted, in order of precedence:
/// - Unix timestamps: "1483221370"
/// - RFC 3339: "2017-01-01T12:00:00Z"
/// - Dates: "2017-01-01" (midnight UTC)
/// - Durations, meaning that long ago: "2d", "36h"
/// - Natural language: "yesterday", "last monday"
pub fn parse_time_bound(input: &str, now: DateTime<Utc>) -> Result<DateTime<Utc>> {
    let input = input.trim();
    if input.is_empty() {
        return Err(JanusError::InvalidInput(
            "Time bound cannot be empty".to_string(),
        ));
    }

    if let Ok(timestamp) = input.parse::<i64>() {
        return DateTime::from_timestamp(timestamp, 0).ok_or_else(|| {
            JanusError::InvalidInput(format!("Timestamp out of range: {}", input))
        });
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(input) {
        return Ok(dt.with_timezone(&Utc));
    }

    if let Ok(date) = NaiveDate::parse_from_str(input, "%Y-%m-%d") {
        if let Some(midnight) = date.and_hms_opt(0, 0, 0) {
            return Ok(midnight.and_utc());
        }
    }

    if let Ok(ago) = parse_duration(input) {
        return Ok(now - ago);
    }

    chrono_english::parse_date_string(input, now, chrono_english::Dialect::Uk).map_err(|e| {
        JanusError::InvalidInput(format!(
            "Could not parse time '{}': {}. Use a Unix timestamp, YYYY-MM-DD, RFC 3339, a duration like 2d, or words like 'yesterday'",
            input, e
        ))
    })
}

fn parse_duration(input: &str) -> Result<Duration> {
    let std_duration = humantime::parse_duration(input)
        .map_err(|e| JanusError::InvalidInput(format!("Could not parse duration: {}", e)))?;
    Duration::from_std(std_duration)
        .map_err(|_| JanusError::InvalidInput("Duration out of range".to_string()))
}

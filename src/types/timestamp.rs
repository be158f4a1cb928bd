/*!
 * Designated-timestamp parsing
 *
 * Raw field bytes are converted to microseconds since the Unix epoch.
 * Accepted shapes: RFC 3339 with zone designator, zone-less ISO date-time
 * (interpreted as UTC), and plain date (midnight UTC).
 */

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TimestampError {
    #[error("not valid UTF-8")]
    NotUtf8,
    #[error("unrecognized timestamp '{0}'")]
    Unrecognized(String),
}

/// Parser for the designated timestamp column.
///
/// Stateless; one instance is shared per task. Kept as a struct so a
/// caller-supplied pattern can be added without touching call sites.
#[derive(Debug, Clone, Default)]
pub struct TimestampParser;

impl TimestampParser {
    pub fn new() -> Self {
        Self
    }

    /// Parse raw field bytes into microseconds since the epoch.
    pub fn parse_micros(&self, bytes: &[u8]) -> Result<i64, TimestampError> {
        let text = std::str::from_utf8(bytes).map_err(|_| TimestampError::NotUtf8)?;
        let text = text.trim();

        if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
            return Ok(dt.timestamp_micros());
        }
        if let Ok(naive) = NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S%.f") {
            return Ok(naive.and_utc().timestamp_micros());
        }
        if let Ok(naive) = NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S%.f") {
            return Ok(naive.and_utc().timestamp_micros());
        }
        if let Ok(date) = NaiveDate::parse_from_str(text, "%Y-%m-%d") {
            let midnight = date.and_hms_opt(0, 0, 0).expect("midnight is valid");
            return Ok(midnight.and_utc().timestamp_micros());
        }

        Err(TimestampError::Unrecognized(text.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_rfc3339_with_micros() {
        let p = TimestampParser::new();
        assert_eq!(
            p.parse_micros(b"1970-01-01T00:00:36.000000Z").unwrap(),
            36_000_000
        );
        assert_eq!(
            p.parse_micros(b"1970-01-01T00:01:12.000000Z").unwrap(),
            72_000_000
        );
    }

    #[test]
    fn parses_zone_less_and_space_separated() {
        let p = TimestampParser::new();
        assert_eq!(p.parse_micros(b"1970-01-01T00:00:01").unwrap(), 1_000_000);
        assert_eq!(
            p.parse_micros(b"1970-01-01 00:00:01.5").unwrap(),
            1_500_000
        );
    }

    #[test]
    fn parses_plain_date_as_midnight() {
        let p = TimestampParser::new();
        assert_eq!(p.parse_micros(b"1970-01-02").unwrap(), 86_400_000_000);
    }

    #[test]
    fn respects_offsets() {
        let p = TimestampParser::new();
        assert_eq!(
            p.parse_micros(b"1970-01-01T01:00:00+01:00").unwrap(),
            0
        );
    }

    #[test]
    fn rejects_garbage() {
        let p = TimestampParser::new();
        assert_eq!(
            p.parse_micros(b"not-a-date"),
            Err(TimestampError::Unrecognized("not-a-date".to_string()))
        );
        assert_eq!(p.parse_micros(&[0xff, 0xfe]), Err(TimestampError::NotUtf8));
    }
}

use std::convert::TryFrom;

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};

/// Wall-clock format used by the testbed nodes in their payloads.
pub const NODE_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

pub fn to_i64(value: u64) -> Result<i64> {
    i64::try_from(value).map_err(|_| anyhow!("value {value} exceeds SQLite INTEGER range"))
}

pub fn to_u64(value: i64, field: &str) -> Result<u64> {
    u64::try_from(value).map_err(|_| anyhow!("{field} contains negative value {value}"))
}

/// Fixed-width RFC 3339 so stored timestamps also sort lexicographically.
pub fn format_datetime(value: &DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn parse_datetime(value: &str, field: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .with_context(|| format!("failed to parse {field}"))
}

pub fn parse_naive(value: &str, field: &str) -> Result<NaiveDateTime> {
    NaiveDateTime::parse_from_str(value, NODE_TIME_FORMAT)
        .with_context(|| format!("failed to parse {field}"))
}

/// Lift an `anyhow` error raised inside a row mapper into the rusqlite error type.
pub fn conversion_error(err: anyhow::Error) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        0,
        rusqlite::types::Type::Text,
        Box::new(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            err.to_string(),
        )),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn stored_timestamps_round_trip_and_sort() {
        let early = Utc.with_ymd_and_hms(2024, 8, 26, 9, 5, 0).unwrap();
        let late = Utc.with_ymd_and_hms(2024, 8, 26, 14, 0, 0).unwrap();

        let early_text = format_datetime(&early);
        let late_text = format_datetime(&late);

        assert_eq!(parse_datetime(&early_text, "t").unwrap(), early);
        assert!(early_text < late_text);
    }

    #[test]
    fn node_time_requires_node_format() {
        assert!(parse_naive("2024-08-26 14:00:00", "time").is_ok());
        assert!(parse_naive("26/08/2024 14:00", "time").is_err());
    }

    #[test]
    fn negative_counts_are_rejected() {
        assert!(to_u64(-1, "total_runs").is_err());
        assert_eq!(to_u64(7, "total_runs").unwrap(), 7);
    }
}

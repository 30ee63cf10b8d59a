/// Persistence plumbing shared by the storage layers
///
/// Timestamps are stored as fixed-width RFC 3339 UTC strings so that string
/// comparison in SQL (`scheduled_for <= ?`) matches time order.

pub mod database;

pub use database::Database;

use crate::error::StorageError;
use chrono::{DateTime, SecondsFormat, Utc};
use uuid::Uuid;

/// Format a timestamp for storage
pub fn format_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Parse a stored timestamp
pub fn parse_ts(table: &'static str, raw: &str) -> Result<DateTime<Utc>, StorageError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| StorageError::CorruptRow {
            table,
            reason: format!("invalid timestamp '{raw}': {e}"),
        })
}

/// Parse an optional stored timestamp
pub fn parse_opt_ts(
    table: &'static str,
    raw: Option<String>,
) -> Result<Option<DateTime<Utc>>, StorageError> {
    raw.map(|r| parse_ts(table, &r)).transpose()
}

/// Parse a stored UUID
pub fn parse_id(table: &'static str, raw: &str) -> Result<Uuid, StorageError> {
    Uuid::parse_str(raw).map_err(|e| StorageError::CorruptRow {
        table,
        reason: format!("invalid id '{raw}': {e}"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    #[test]
    fn formatted_timestamps_sort_like_time() {
        let early = Utc.with_ymd_and_hms(2026, 1, 9, 23, 59, 59).unwrap();
        let late = early + Duration::milliseconds(1);
        let much_later = early + Duration::days(400);

        assert!(format_ts(early) < format_ts(late));
        assert!(format_ts(late) < format_ts(much_later));
        assert_eq!(format_ts(early).len(), format_ts(much_later).len());
    }

    #[test]
    fn timestamp_survives_storage_format() {
        let now = Utc::now();
        let parsed = parse_ts("t", &format_ts(now)).unwrap();
        assert_eq!(parsed.timestamp_micros(), now.timestamp_micros());
    }

    #[test]
    fn corrupt_values_are_reported_with_table() {
        let err = parse_id("executions", "nope").unwrap_err();
        assert!(err.to_string().contains("executions"));
        assert!(parse_ts("deferred_jobs", "yesterday").is_err());
    }
}

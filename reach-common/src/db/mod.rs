//! Database initialization and shared column helpers

pub mod init;

pub use init::*;

use crate::{Error, Result};
use chrono::{DateTime, SecondsFormat, Utc};

/// Canonical TEXT encoding for timestamps
///
/// Fixed-width UTC with microseconds, so lexical order equals time order and
/// `last_sync_at < updated_at` can be compared inside SQL.
pub fn format_timestamp(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Parse a timestamp written by [`format_timestamp`] (any RFC 3339 is accepted)
pub fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| Error::Internal(format!("Failed to parse timestamp '{}': {}", raw, e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_timestamp_order_is_lexical() {
        let earlier = Utc.with_ymd_and_hms(2026, 1, 2, 3, 4, 5).unwrap();
        let later = earlier + chrono::Duration::milliseconds(1);
        assert!(format_timestamp(&earlier) < format_timestamp(&later));
        assert_eq!(parse_timestamp(&format_timestamp(&later)).unwrap(), later);
    }
}

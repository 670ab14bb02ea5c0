//! Timestamp handling for the store.
//!
//! New rows are written as RFC3339 UTC text. Legacy rows exist both as
//! `YYYY-MM-DD HH:MM:SS` text and as integer Unix epochs, so every reader
//! goes through the flexible parser here.

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use super::{Error, Result};

const LEGACY_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Canonical textual form written to the store.
pub fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339()
}

/// Parse a stored timestamp in any of the accepted textual forms.
pub fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Ok(ts.with_timezone(&Utc));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(raw, LEGACY_FORMAT) {
        return Ok(Utc.from_utc_datetime(&naive));
    }
    Err(Error::InvalidInput(format!("unparseable timestamp {raw:?}")))
}

/// Read a non-null timestamp column, accepting text and native epoch values.
pub fn read_timestamp(row: &SqliteRow, column: &str) -> Result<DateTime<Utc>> {
    if let Ok(raw) = row.try_get::<String, _>(column) {
        return parse_timestamp(&raw);
    }
    let epoch: i64 = row
        .try_get(column)
        .map_err(Error::db(format!("read timestamp column {column}")))?;
    Utc.timestamp_opt(epoch, 0)
        .single()
        .ok_or_else(|| Error::InvalidInput(format!("epoch {epoch} out of range in {column}")))
}

/// Read a nullable timestamp column.
pub fn read_timestamp_opt(row: &SqliteRow, column: &str) -> Result<Option<DateTime<Utc>>> {
    if let Ok(raw) = row.try_get::<Option<String>, _>(column) {
        return raw.as_deref().map(parse_timestamp).transpose();
    }
    let epoch: Option<i64> = row
        .try_get(column)
        .map_err(Error::db(format!("read timestamp column {column}")))?;
    epoch
        .map(|epoch| {
            Utc.timestamp_opt(epoch, 0)
                .single()
                .ok_or_else(|| Error::InvalidInput(format!("epoch {epoch} out of range in {column}")))
        })
        .transpose()
}

pub mod project;
pub mod document;
pub mod snapshot;
pub mod job;
pub mod stage;
pub mod scene;
pub mod style;
pub mod chunk;
pub mod claim;
pub mod continuity;
pub mod audit;

use std::str::FromStr;

use chrono::NaiveDateTime;
use uuid::Uuid;

use crate::db::DatabaseError;

pub(crate) const TS_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";

/// Parse a uuid column inside a row mapper. A corrupt id is an
/// infrastructure error and must surface, not default.
pub(crate) fn col_uuid(idx: usize, value: &str) -> rusqlite::Result<Uuid> {
    Uuid::parse_str(value).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}

/// Parse a string-enum column inside a row mapper. An unrecognized value
/// surfaces as `InvalidEnum` instead of being coerced to some variant.
pub(crate) fn col_enum<T>(idx: usize, value: &str) -> rusqlite::Result<T>
where
    T: FromStr<Err = DatabaseError>,
{
    T::from_str(value).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}

pub(crate) fn now_ts() -> NaiveDateTime {
    chrono::Utc::now().naive_utc()
}

pub(crate) fn fmt_ts(ts: &NaiveDateTime) -> String {
    ts.format(TS_FORMAT).to_string()
}

pub(crate) fn parse_ts(s: &str) -> NaiveDateTime {
    NaiveDateTime::parse_from_str(s, TS_FORMAT)
        .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S"))
        .unwrap_or_default()
}

/// Current wall clock as epoch milliseconds (queue timing columns).
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

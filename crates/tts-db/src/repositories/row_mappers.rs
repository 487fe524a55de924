//! Shared row-decoding helpers used by every repository in this crate.

use chrono::{DateTime, Utc};

use crate::error::{DbError, DbResult};

/// Parse an RFC3339 timestamp column, mapping a failure to [`DbError::Storage`].
pub fn parse_timestamp(value: &str) -> DbResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| DbError::storage(&sqlx::Error::Decode(Box::new(e))))
}

/// Parse an optional RFC3339 timestamp column.
pub fn parse_optional_timestamp(value: Option<String>) -> DbResult<Option<DateTime<Utc>>> {
    value.map(|v| parse_timestamp(&v)).transpose()
}

/// Decode a JSON-valued column into `T`.
pub fn parse_json<T: serde::de::DeserializeOwned>(value: &str) -> DbResult<T> {
    serde_json::from_str(value).map_err(|e| DbError::serialization(e.to_string()))
}

/// Decode an optional JSON-valued column into `T`.
pub fn parse_optional_json<T: serde::de::DeserializeOwned>(value: Option<String>) -> DbResult<Option<T>> {
    value.map(|v| parse_json(&v)).transpose()
}

/// Encode `value` as a JSON column, mapping a failure to [`DbError::Serialization`].
pub fn to_json<T: serde::Serialize>(value: &T) -> DbResult<String> {
    serde_json::to_string(value).map_err(|e| DbError::serialization(e.to_string()))
}

//! Backend-agnostic value model for metasync rows.
//!
//! A [`Value`] is the in-memory representation of one cell, independent of
//! the dialect it will be written to. Dialects convert `Value` to and from
//! their native representations; the shared coercion rules live here so
//! every dialect enforces the same contract:
//!
//! - null never enters a non-nullable column
//! - FLOAT never silently truncates into INTEGER
//! - DATETIME is normalized to UTC before it reaches any backend

use crate::error::{Result, SyncError};
use crate::schema::Column;
use crate::types::LogicalType;
use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, SecondsFormat, Utc};
use std::collections::HashMap;

/// A single cell value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// UTF-8 text
    String(String),

    /// 64-bit signed integer
    Integer(i64),

    /// 64-bit floating point
    Float(f64),

    /// Boolean
    Boolean(bool),

    /// Point in time, normalized to UTC at construction
    Datetime(DateTime<Utc>),

    /// Calendar date
    Date(NaiveDate),

    /// JSON document
    Json(serde_json::Value),

    /// Absent value
    Null,
}

impl Value {
    /// Check if this value is null.
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Name of the value's runtime type, for error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::String(_) => "string",
            Value::Integer(_) => "integer",
            Value::Float(_) => "float",
            Value::Boolean(_) => "boolean",
            Value::Datetime(_) => "datetime",
            Value::Date(_) => "date",
            Value::Json(_) => "json",
            Value::Null => "null",
        }
    }

    /// Try to get this value as a string reference.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Try to get this value as an i64.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Integer(i) => Some(*i),
            _ => None,
        }
    }

    /// Try to get this value as an f64.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            Value::Integer(i) => Some(*i as f64),
            _ => None,
        }
    }

    /// Try to get this value as a boolean.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    /// Try to get this value as a DateTime.
    pub fn as_datetime(&self) -> Option<&DateTime<Utc>> {
        match self {
            Value::Datetime(dt) => Some(dt),
            _ => None,
        }
    }

    /// Try to get this value as a date.
    pub fn as_date(&self) -> Option<&NaiveDate> {
        match self {
            Value::Date(d) => Some(d),
            _ => None,
        }
    }

    /// Try to get this value as a JSON document.
    pub fn as_json(&self) -> Option<&serde_json::Value> {
        match self {
            Value::Json(j) => Some(j),
            _ => None,
        }
    }

    /// Render this value as the text form used by file-based dialects.
    ///
    /// Null renders as the empty cell. Datetimes render as RFC 3339 in UTC,
    /// dates as `YYYY-MM-DD`, JSON as its compact serialization.
    pub fn to_text(&self) -> String {
        match self {
            Value::String(s) => s.clone(),
            Value::Integer(i) => i.to_string(),
            Value::Float(f) => f.to_string(),
            Value::Boolean(b) => b.to_string(),
            Value::Datetime(dt) => dt.to_rfc3339_opts(SecondsFormat::AutoSi, true),
            Value::Date(d) => d.format("%Y-%m-%d").to_string(),
            Value::Json(j) => j.to_string(),
            Value::Null => String::new(),
        }
    }

    /// Parse the text form of a cell back into a typed value.
    ///
    /// This is the read path for file-based dialects, where every cell is
    /// untyped text. An empty cell is null for every type except STRING,
    /// which cannot distinguish an empty string from an absent value.
    pub fn from_text(text: &str, logical_type: &LogicalType) -> Result<Value> {
        if text.is_empty() && *logical_type != LogicalType::String {
            return Ok(Value::Null);
        }
        match logical_type {
            LogicalType::String => Ok(Value::String(text.to_string())),
            LogicalType::Integer => text.parse::<i64>().map(Value::Integer).map_err(|e| {
                SyncError::TypeCoercion {
                    column: String::new(),
                    detail: format!("'{text}' is not an integer: {e}"),
                }
            }),
            LogicalType::Float => text.parse::<f64>().map(Value::Float).map_err(|e| {
                SyncError::TypeCoercion {
                    column: String::new(),
                    detail: format!("'{text}' is not a float: {e}"),
                }
            }),
            LogicalType::Boolean => match text.to_ascii_lowercase().as_str() {
                "true" | "1" => Ok(Value::Boolean(true)),
                "false" | "0" => Ok(Value::Boolean(false)),
                _ => Err(SyncError::TypeCoercion {
                    column: String::new(),
                    detail: format!("'{text}' is not a boolean"),
                }),
            },
            LogicalType::Datetime => parse_datetime_utc(text).map(Value::Datetime),
            LogicalType::Date => NaiveDate::parse_from_str(text, "%Y-%m-%d")
                .map(Value::Date)
                .map_err(|e| SyncError::TypeCoercion {
                    column: String::new(),
                    detail: format!("'{text}' is not a date: {e}"),
                }),
            LogicalType::Json => serde_json::from_str(text).map(Value::Json).map_err(|e| {
                SyncError::TypeCoercion {
                    column: String::new(),
                    detail: format!("'{text}' is not valid JSON: {e}"),
                }
            }),
        }
    }
}

/// Parse a datetime string, normalizing any offset to UTC.
///
/// Accepts RFC 3339 with offset, and naive `YYYY-MM-DD HH:MM:SS[.f]` or
/// `YYYY-MM-DDTHH:MM:SS[.f]` forms which are taken as already-UTC.
pub fn parse_datetime_utc(text: &str) -> Result<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Ok(dt.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(text, format) {
            return Ok(naive.and_utc());
        }
    }
    Err(SyncError::TypeCoercion {
        column: String::new(),
        detail: format!("'{text}' is not a datetime"),
    })
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Integer(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Integer(v as i64)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Boolean(v)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(v: DateTime<Utc>) -> Self {
        Value::Datetime(v)
    }
}

// Offset-bearing datetimes are normalized at the boundary, never stored.
impl From<DateTime<FixedOffset>> for Value {
    fn from(v: DateTime<FixedOffset>) -> Self {
        Value::Datetime(v.with_timezone(&Utc))
    }
}

impl From<NaiveDate> for Value {
    fn from(v: NaiveDate) -> Self {
        Value::Date(v)
    }
}

impl From<serde_json::Value> for Value {
    fn from(v: serde_json::Value) -> Self {
        Value::Json(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        match v {
            Some(inner) => inner.into(),
            None => Value::Null,
        }
    }
}

/// Coerce a value into the declared column, applying the shared rules.
///
/// INTEGER widens into a FLOAT column (exact for magnitudes below 2^53).
/// FLOAT into INTEGER always fails: a backend must never receive a rounded
/// value the caller did not produce. STRING input is re-parsed for the
/// temporal and JSON types so REST payloads can carry them as text.
pub fn coerce(value: Value, column: &Column) -> Result<Value> {
    if value.is_null() {
        if column.nullable {
            return Ok(Value::Null);
        }
        return Err(SyncError::TypeCoercion {
            column: column.name.clone(),
            detail: "null value in non-nullable column".to_string(),
        });
    }
    let mismatch = |value: &Value| SyncError::TypeCoercion {
        column: column.name.clone(),
        detail: format!(
            "cannot store a {} value in a {} column",
            value.type_name(),
            column.logical_type
        ),
    };
    match (column.logical_type, value) {
        (LogicalType::String, v @ Value::String(_)) => Ok(v),
        (LogicalType::Integer, v @ Value::Integer(_)) => Ok(v),
        (LogicalType::Float, v @ Value::Float(_)) => Ok(v),
        (LogicalType::Float, Value::Integer(i)) => Ok(Value::Float(i as f64)),
        (LogicalType::Boolean, v @ Value::Boolean(_)) => Ok(v),
        (LogicalType::Datetime, v @ Value::Datetime(_)) => Ok(v),
        (LogicalType::Datetime, Value::String(s)) => {
            parse_datetime_utc(&s)
                .map(Value::Datetime)
                .map_err(|_| SyncError::TypeCoercion {
                    column: column.name.clone(),
                    detail: format!("'{s}' is not a datetime"),
                })
        }
        (LogicalType::Date, v @ Value::Date(_)) => Ok(v),
        (LogicalType::Date, Value::String(s)) => NaiveDate::parse_from_str(&s, "%Y-%m-%d")
            .map(Value::Date)
            .map_err(|_| SyncError::TypeCoercion {
                column: column.name.clone(),
                detail: format!("'{s}' is not a date"),
            }),
        (LogicalType::Json, v @ Value::Json(_)) => Ok(v),
        (LogicalType::Json, Value::String(s)) => {
            serde_json::from_str(&s)
                .map(Value::Json)
                .map_err(|e| SyncError::TypeCoercion {
                    column: column.name.clone(),
                    detail: format!("'{s}' is not valid JSON: {e}"),
                })
        }
        (LogicalType::Integer, v @ Value::Float(_)) => Err(SyncError::TypeCoercion {
            column: column.name.clone(),
            detail: format!(
                "refusing to round float {} into an integer column",
                v.as_f64().unwrap_or_default()
            ),
        }),
        (_, v) => Err(mismatch(&v)),
    }
}

/// One row of data: a mapping from column name to [`Value`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Row {
    values: HashMap<String, Value>,
}

impl Row {
    /// Create an empty row.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert, for constructing rows inline.
    pub fn with(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.values.insert(column.into(), value.into());
        self
    }

    /// Insert or replace a cell.
    pub fn insert(&mut self, column: impl Into<String>, value: impl Into<Value>) {
        self.values.insert(column.into(), value.into());
    }

    /// Get a cell by column name.
    pub fn get(&self, column: &str) -> Option<&Value> {
        self.values.get(column)
    }

    /// Remove and return a cell by column name.
    pub fn take(&mut self, column: &str) -> Option<Value> {
        self.values.remove(column)
    }

    /// Number of cells in the row.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether the row has no cells.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Iterate over (column, value) pairs in unspecified order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.values.iter()
    }

    /// Column names present in the row, in unspecified order.
    pub fn columns(&self) -> impl Iterator<Item = &String> {
        self.values.keys()
    }
}

impl FromIterator<(String, Value)> for Row {
    fn from_iter<T: IntoIterator<Item = (String, Value)>>(iter: T) -> Self {
        Row {
            values: iter.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::Column;
    use chrono::TimeZone;

    fn column(name: &str, logical_type: LogicalType, nullable: bool) -> Column {
        Column {
            name: name.to_string(),
            logical_type,
            nullable,
            key: false,
        }
    }

    #[test]
    fn null_into_non_nullable_fails() {
        let col = column("id", LogicalType::Integer, false);
        let err = coerce(Value::Null, &col).unwrap_err();
        assert!(matches!(err, SyncError::TypeCoercion { .. }));
    }

    #[test]
    fn null_into_nullable_passes_through() {
        let col = column("note", LogicalType::String, true);
        assert_eq!(coerce(Value::Null, &col).unwrap(), Value::Null);
    }

    #[test]
    fn float_never_rounds_into_integer() {
        let col = column("views", LogicalType::Integer, false);
        assert!(coerce(Value::Float(1.5), &col).is_err());
        // Integral floats are refused too; the caller must convert explicitly.
        assert!(coerce(Value::Float(2.0), &col).is_err());
    }

    #[test]
    fn integer_widens_into_float() {
        let col = column("score", LogicalType::Float, false);
        assert_eq!(coerce(Value::Integer(7), &col).unwrap(), Value::Float(7.0));
    }

    #[test]
    fn datetime_strings_normalize_to_utc() {
        let col = column("modified", LogicalType::Datetime, false);
        let coerced = coerce(Value::String("2024-06-01T12:00:00+05:00".into()), &col).unwrap();
        let expected = Utc.with_ymd_and_hms(2024, 6, 1, 7, 0, 0).unwrap();
        assert_eq!(coerced, Value::Datetime(expected));
    }

    #[test]
    fn offset_datetime_normalizes_at_construction() {
        let fixed = DateTime::parse_from_rfc3339("2024-06-01T00:00:00-03:00").unwrap();
        let v: Value = fixed.into();
        assert_eq!(
            v.as_datetime().unwrap(),
            &Utc.with_ymd_and_hms(2024, 6, 1, 3, 0, 0).unwrap()
        );
    }

    #[test]
    fn text_round_trip_per_type() {
        let cases = [
            (Value::Integer(42), LogicalType::Integer),
            (Value::Float(2.5), LogicalType::Float),
            (Value::Boolean(true), LogicalType::Boolean),
            (Value::String("hello".into()), LogicalType::String),
            (
                Value::Date(NaiveDate::from_ymd_opt(2024, 1, 31).unwrap()),
                LogicalType::Date,
            ),
            (
                Value::Json(serde_json::json!({"a": [1, 2]})),
                LogicalType::Json,
            ),
        ];
        for (value, ty) in cases {
            let text = value.to_text();
            assert_eq!(Value::from_text(&text, &ty).unwrap(), value);
        }
    }

    #[test]
    fn empty_text_is_null_for_non_string_types() {
        assert_eq!(
            Value::from_text("", &LogicalType::Integer).unwrap(),
            Value::Null
        );
        assert_eq!(
            Value::from_text("", &LogicalType::String).unwrap(),
            Value::String(String::new())
        );
    }
}

// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

//! Attribute values shared by the vector and external stores.
//!
//! Semantic types are expressed as Arrow `DataType`s so that any reader's
//! output can be collected into a `RecordBatch`. The set of value shapes
//! is deliberately small: everything read from either store is normalized
//! into one of the `Value` variants below.

use crate::error::{DsgError, Result};
use arrow_array::builder::{
    BooleanBuilder, Float64Builder, Int64Builder, StringBuilder, TimestampMillisecondBuilder,
};
use arrow_array::cast::AsArray;
use arrow_array::types::{Float64Type, Int64Type, TimestampMillisecondType};
use arrow_array::{Array, ArrayRef};
use arrow_cast::cast::cast;
use arrow_schema::{DataType, TimeUnit};
use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, Utc};
use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

/// Timezone label used for every timestamp column we produce
pub const UTC_TIMEZONE: &str = "UTC";

/// The Arrow type bound to timestamp attributes
#[must_use]
pub fn timestamp_type() -> DataType {
    DataType::Timestamp(TimeUnit::Millisecond, Some(Arc::from(UTC_TIMEZONE)))
}

/// Map an arbitrary Arrow type onto the handful of types `Value` can carry
#[must_use]
pub fn normalize_type(data_type: &DataType) -> DataType {
    match data_type {
        DataType::Boolean => DataType::Boolean,
        dt if dt.is_integer() => DataType::Int64,
        dt if dt.is_floating() => DataType::Float64,
        DataType::Decimal128(..) | DataType::Decimal256(..) => DataType::Float64,
        DataType::Timestamp(..) | DataType::Date32 | DataType::Date64 => timestamp_type(),
        _ => DataType::Utf8,
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    #[default]
    Null,
    Boolean(bool),
    Int64(i64),
    Float64(f64),
    Utf8(String),
    Timestamp(DateTime<Utc>),
}

impl Value {
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Coerce to an instant.
    ///
    /// Strings are parsed as RFC 3339, then as naive `YYYY-MM-DD[ T]HH:MM:SS`
    /// (taken as UTC), then as a bare date at midnight. Integers are epoch
    /// milliseconds.
    #[must_use]
    pub fn to_timestamp(&self) -> Option<DateTime<Utc>> {
        match self {
            Value::Timestamp(t) => Some(*t),
            Value::Int64(ms) => DateTime::from_timestamp_millis(*ms),
            Value::Utf8(s) => parse_timestamp(s),
            _ => None,
        }
    }

    /// Render as a station key, or `None` for null.
    ///
    /// Vector stores often hold numeric station ids as floating point columns,
    /// so integral floats drop their fractional part.
    #[must_use]
    pub fn key_string(&self) -> Option<String> {
        match self {
            Value::Null => None,
            Value::Utf8(s) => Some(s.trim().to_string()),
            Value::Float64(f) if f.fract() == 0.0 && f.is_finite() => Some(format!("{}", *f as i64)),
            other => Some(other.to_string()),
        }
    }

    /// Ordering used by filter evaluation. Mixed numeric types compare as
    /// floats; timestamps coerce the other side.
    #[must_use]
    pub fn compare(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Value::Null, _) | (_, Value::Null) => None,
            (Value::Boolean(a), Value::Boolean(b)) => Some(a.cmp(b)),
            (Value::Int64(a), Value::Int64(b)) => Some(a.cmp(b)),
            (Value::Int64(a), Value::Float64(b)) => (*a as f64).partial_cmp(b),
            (Value::Float64(a), Value::Int64(b)) => a.partial_cmp(&(*b as f64)),
            (Value::Float64(a), Value::Float64(b)) => a.partial_cmp(b),
            (Value::Utf8(a), Value::Utf8(b)) => Some(a.cmp(b)),
            (Value::Timestamp(a), rhs) => rhs.to_timestamp().map(|b| a.cmp(&b)),
            (lhs, Value::Timestamp(b)) => lhs.to_timestamp().map(|a| a.cmp(b)),
            _ => None,
        }
    }
}

fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, format) {
            return Some(naive.and_utc());
        }
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Boolean(b) => write!(f, "{b}"),
            Value::Int64(i) => write!(f, "{i}"),
            Value::Float64(x) => write!(f, "{x}"),
            Value::Utf8(s) => write!(f, "{s}"),
            Value::Timestamp(t) => write!(f, "{}", t.to_rfc3339_opts(SecondsFormat::Secs, true)),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Utf8(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Utf8(s)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int64(i)
    }
}

impl From<f64> for Value {
    fn from(x: f64) -> Self {
        Value::Float64(x)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Boolean(b)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(t: DateTime<Utc>) -> Self {
        Value::Timestamp(t)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Value::Null, Into::into)
    }
}

/// Read every row of an Arrow column as `Value`s
pub fn column_values(array: &ArrayRef) -> Result<Vec<Value>> {
    let len = array.len();
    let values = match array.data_type() {
        DataType::Null => vec![Value::Null; len],
        DataType::Boolean => {
            let a = array.as_boolean();
            (0..len)
                .map(|i| if a.is_null(i) { Value::Null } else { Value::Boolean(a.value(i)) })
                .collect()
        }
        dt if dt.is_integer() => {
            let converted = cast(array, &DataType::Int64)?;
            let a = converted.as_primitive::<Int64Type>();
            (0..len)
                .map(|i| if a.is_null(i) { Value::Null } else { Value::Int64(a.value(i)) })
                .collect()
        }
        dt if dt.is_floating() || matches!(dt, DataType::Decimal128(..) | DataType::Decimal256(..)) => {
            let converted = cast(array, &DataType::Float64)?;
            let a = converted.as_primitive::<Float64Type>();
            (0..len)
                .map(|i| if a.is_null(i) { Value::Null } else { Value::Float64(a.value(i)) })
                .collect()
        }
        DataType::Timestamp(..) | DataType::Date32 | DataType::Date64 => {
            let converted = cast(array, &DataType::Timestamp(TimeUnit::Millisecond, None))?;
            let a = converted.as_primitive::<TimestampMillisecondType>();
            (0..len)
                .map(|i| {
                    if a.is_null(i) {
                        Value::Null
                    } else {
                        DateTime::from_timestamp_millis(a.value(i)).into()
                    }
                })
                .collect()
        }
        DataType::Utf8 | DataType::LargeUtf8 | DataType::Utf8View => {
            let converted = cast(array, &DataType::Utf8)?;
            let a = converted.as_string::<i32>();
            (0..len)
                .map(|i| if a.is_null(i) { Value::Null } else { Value::from(a.value(i)) })
                .collect()
        }
        other => {
            return Err(DsgError::schema(format!(
                "Unsupported column type {other:?}"
            )));
        }
    };
    Ok(values)
}

/// Build an Arrow column of `data_type` from a sequence of values.
///
/// Values that do not fit the column type become nulls, except for string
/// columns which render anything non-null with `Display`.
pub fn build_array<'a>(
    data_type: &DataType,
    values: impl IntoIterator<Item = &'a Value>,
) -> Result<ArrayRef> {
    let array: ArrayRef = match data_type {
        DataType::Boolean => {
            let mut builder = BooleanBuilder::new();
            for value in values {
                match value {
                    Value::Boolean(b) => builder.append_value(*b),
                    _ => builder.append_null(),
                }
            }
            Arc::new(builder.finish())
        }
        DataType::Int64 => {
            let mut builder = Int64Builder::new();
            for value in values {
                match value {
                    Value::Int64(i) => builder.append_value(*i),
                    _ => builder.append_null(),
                }
            }
            Arc::new(builder.finish())
        }
        DataType::Float64 => {
            let mut builder = Float64Builder::new();
            for value in values {
                match value {
                    Value::Float64(x) => builder.append_value(*x),
                    Value::Int64(i) => builder.append_value(*i as f64),
                    _ => builder.append_null(),
                }
            }
            Arc::new(builder.finish())
        }
        DataType::Timestamp(..) => {
            let mut builder = TimestampMillisecondBuilder::new().with_timezone(UTC_TIMEZONE);
            for value in values {
                builder.append_option(value.to_timestamp().map(|t| t.timestamp_millis()));
            }
            let array: ArrayRef = Arc::new(builder.finish());
            if *data_type == timestamp_type() {
                array
            } else {
                cast(&array, data_type)?
            }
        }
        other => {
            let mut builder = StringBuilder::new();
            for value in values {
                match value {
                    Value::Null => builder.append_null(),
                    Value::Utf8(s) => builder.append_value(s),
                    v => builder.append_value(v.to_string()),
                }
            }
            let array: ArrayRef = Arc::new(builder.finish());
            if *other == DataType::Utf8 {
                array
            } else {
                cast(&array, other)?
            }
        }
    };
    Ok(array)
}

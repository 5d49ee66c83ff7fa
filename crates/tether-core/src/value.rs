// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Scalar data types and values stored in data properties.
use std::fmt;
use std::fmt::Write as _;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use uuid::Uuid;

/// Declared type of a data property.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum DataType {
    /// UTF-8 text.
    String,
    /// 8-bit unsigned integer.
    Byte,
    /// 16-bit signed integer.
    Int16,
    /// 32-bit signed integer.
    Int32,
    /// 64-bit signed integer.
    Int64,
    /// Double precision float.
    Double,
    /// Single precision float (stored as `f64`).
    Single,
    /// Decimal (stored as `f64`).
    Decimal,
    /// Boolean.
    Boolean,
    /// UTC instant.
    DateTime,
    /// 128-bit GUID.
    Guid,
    /// Opaque bytes.
    Binary,
    /// Untyped; values pass through unchanged.
    Undefined,
}

impl DataType {
    /// True for the integral types.
    #[must_use]
    pub fn is_integer(self) -> bool {
        matches!(self, Self::Byte | Self::Int16 | Self::Int32 | Self::Int64)
    }

    /// True for integral and floating point types.
    #[must_use]
    pub fn is_numeric(self) -> bool {
        self.is_integer() || matches!(self, Self::Double | Self::Single | Self::Decimal)
    }

    /// Value used for non-nullable properties with no explicit default.
    #[must_use]
    pub fn default_value(self) -> DataValue {
        match self {
            Self::String => DataValue::String(String::new()),
            Self::Byte | Self::Int16 | Self::Int32 | Self::Int64 => DataValue::Int(0),
            Self::Double | Self::Single | Self::Decimal => DataValue::Double(0.0),
            Self::Boolean => DataValue::Bool(false),
            Self::DateTime => DataValue::DateTime(DateTime::<Utc>::default()),
            Self::Guid => DataValue::Guid(Uuid::nil()),
            Self::Binary | Self::Undefined => DataValue::Null,
        }
    }

    /// Inclusive integer range for the integral types.
    #[must_use]
    pub fn integer_range(self) -> Option<(i64, i64)> {
        match self {
            Self::Byte => Some((0, 255)),
            Self::Int16 => Some((i64::from(i16::MIN), i64::from(i16::MAX))),
            Self::Int32 => Some((i64::from(i32::MIN), i64::from(i32::MAX))),
            Self::Int64 => Some((i64::MIN, i64::MAX)),
            _ => None,
        }
    }

    /// Coerces `value` into this type's canonical representation.
    ///
    /// Returns `None` when the value cannot be represented; callers keep the
    /// raw value in that case.
    #[must_use]
    pub fn parse(self, value: &DataValue) -> Option<DataValue> {
        if value.is_null() {
            return Some(DataValue::Null);
        }
        match self {
            Self::Undefined => Some(value.clone()),
            Self::String => match value {
                DataValue::String(_) => Some(value.clone()),
                DataValue::Int(i) => Some(DataValue::String(i.to_string())),
                DataValue::Double(d) => Some(DataValue::String(d.to_string())),
                DataValue::Bool(b) => Some(DataValue::String(b.to_string())),
                DataValue::Guid(g) => Some(DataValue::String(g.to_string())),
                _ => None,
            },
            Self::Byte | Self::Int16 | Self::Int32 | Self::Int64 => {
                let raw = match value {
                    DataValue::Int(i) => Some(*i),
                    DataValue::Double(d) if d.fract() == 0.0 && d.is_finite() => {
                        Some(*d as i64)
                    }
                    DataValue::String(s) => s.trim().parse::<i64>().ok(),
                    _ => None,
                }?;
                let (lo, hi) = self.integer_range()?;
                (lo..=hi).contains(&raw).then_some(DataValue::Int(raw))
            }
            Self::Double | Self::Single | Self::Decimal => match value {
                DataValue::Double(_) => Some(value.clone()),
                #[allow(clippy::cast_precision_loss)]
                DataValue::Int(i) => Some(DataValue::Double(*i as f64)),
                DataValue::String(s) => s.trim().parse::<f64>().ok().map(DataValue::Double),
                _ => None,
            },
            Self::Boolean => match value {
                DataValue::Bool(_) => Some(value.clone()),
                DataValue::String(s) => match s.trim().to_ascii_lowercase().as_str() {
                    "true" => Some(DataValue::Bool(true)),
                    "false" => Some(DataValue::Bool(false)),
                    _ => None,
                },
                _ => None,
            },
            Self::DateTime => match value {
                DataValue::DateTime(_) => Some(value.clone()),
                DataValue::String(s) => parse_date_time(s).map(DataValue::DateTime),
                _ => None,
            },
            Self::Guid => match value {
                DataValue::Guid(_) => Some(value.clone()),
                DataValue::String(s) => Uuid::parse_str(s.trim()).ok().map(DataValue::Guid),
                _ => None,
            },
            Self::Binary => match value {
                DataValue::Binary(_) => Some(value.clone()),
                _ => None,
            },
        }
    }
}

impl std::str::FromStr for DataType {
    type Err = crate::error::CacheError;

    /// Accepts the type names as written in metadata (`"Int32"`, `"Edm.Int32"`).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let name = s.strip_prefix("Edm.").unwrap_or(s);
        Ok(match name {
            "String" => Self::String,
            "Byte" => Self::Byte,
            "Int16" => Self::Int16,
            "Int32" => Self::Int32,
            "Int64" => Self::Int64,
            "Double" => Self::Double,
            "Single" => Self::Single,
            "Decimal" => Self::Decimal,
            "Boolean" => Self::Boolean,
            "DateTime" | "DateTimeOffset" => Self::DateTime,
            "Guid" => Self::Guid,
            "Binary" => Self::Binary,
            "Undefined" => Self::Undefined,
            other => {
                return Err(crate::error::CacheError::InvalidArgument(format!(
                    "unknown data type '{other}'"
                )))
            }
        })
    }
}

fn parse_date_time(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f") {
        return Some(naive.and_utc());
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

/// A scalar property value.
#[derive(Clone, PartialEq, Debug, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum DataValue {
    /// Absent value.
    #[default]
    Null,
    /// Boolean.
    Bool(bool),
    /// Any integral type.
    Int(i64),
    /// Any floating point or decimal type.
    Double(f64),
    /// Text.
    String(String),
    /// UTC instant.
    DateTime(DateTime<Utc>),
    /// GUID.
    Guid(Uuid),
    /// Opaque bytes.
    Binary(Vec<u8>),
}

impl DataValue {
    /// True when the value is [`DataValue::Null`].
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Text content, if this is a string.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// Integral content, if this is an integer.
    #[must_use]
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Numeric content, widening integers.
    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            #[allow(clippy::cast_precision_loss)]
            Self::Int(i) => Some(*i as f64),
            Self::Double(d) => Some(*d),
            _ => None,
        }
    }

    /// Boolean content.
    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Equality used by the property interceptor's no-op check.
    ///
    /// Instants compare by millisecond timestamp; everything else compares
    /// structurally.
    #[must_use]
    pub fn behaviorally_eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::DateTime(a), Self::DateTime(b)) => {
                a.timestamp_millis() == b.timestamp_millis()
            }
            _ => self == other,
        }
    }

    /// True for the "empty" key component values: null and the empty string.
    #[must_use]
    pub fn is_empty_key_part(&self) -> bool {
        match self {
            Self::Null => true,
            Self::String(s) => s.is_empty(),
            _ => false,
        }
    }

    /// True when the value equals the type default a freshly created entity
    /// would carry (used to decide whether a key needs generating).
    #[must_use]
    pub fn is_default_key_value(&self) -> bool {
        match self {
            Self::Null => true,
            Self::Int(i) => *i == 0,
            Self::String(s) => s.is_empty(),
            Self::Guid(g) => g.is_nil(),
            _ => false,
        }
    }

    /// Canonical text used when composing key strings. Instants keep full
    /// nanosecond precision so distinct keys never share a key string.
    #[must_use]
    pub fn key_fragment(&self) -> String {
        match self {
            Self::Null => String::new(),
            Self::Bool(b) => b.to_string(),
            Self::Int(i) => i.to_string(),
            // -0.0 equals 0.0 and must hash alike.
            Self::Double(d) if *d == 0.0 => "0".to_owned(),
            Self::Double(d) => d.to_string(),
            Self::String(s) => s.clone(),
            Self::DateTime(dt) => format!("{}.{:09}", dt.timestamp(), dt.timestamp_subsec_nanos()),
            Self::Guid(g) => g.hyphenated().to_string(),
            Self::Binary(bytes) => bytes.iter().fold(String::new(), |mut acc, b| {
                let _ = write!(acc, "{b:02x}");
                acc
            }),
        }
    }

    /// Converts a JSON scalar into a value of `data_type`.
    ///
    /// Unparseable scalars are kept in their raw JSON shape; objects become
    /// null.
    #[must_use]
    pub fn from_json(value: &serde_json::Value, data_type: DataType) -> Self {
        use serde_json::Value;
        let raw = match value {
            Value::Null | Value::Object(_) => Self::Null,
            Value::Bool(b) => Self::Bool(*b),
            Value::Number(n) => n
                .as_i64()
                .map(Self::Int)
                .or_else(|| n.as_f64().map(Self::Double))
                .unwrap_or(Self::Null),
            Value::String(s) => Self::String(s.clone()),
            Value::Array(items) => items
                .iter()
                .map(|v| v.as_u64().and_then(|b| u8::try_from(b).ok()))
                .collect::<Option<Vec<u8>>>()
                .map_or(Self::Null, Self::Binary),
        };
        data_type.parse(&raw).unwrap_or(raw)
    }

    /// Converts the value back into JSON (instants as RFC 3339 strings).
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        use serde_json::Value;
        match self {
            Self::Null => Value::Null,
            Self::Bool(b) => Value::Bool(*b),
            Self::Int(i) => Value::from(*i),
            Self::Double(d) => Value::from(*d),
            Self::String(s) => Value::String(s.clone()),
            Self::DateTime(dt) => Value::String(dt.to_rfc3339()),
            Self::Guid(g) => Value::String(g.to_string()),
            Self::Binary(bytes) => Value::Array(bytes.iter().map(|b| Value::from(*b)).collect()),
        }
    }
}

impl fmt::Display for DataValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str("null"),
            Self::DateTime(dt) => f.write_str(&dt.to_rfc3339()),
            other => f.write_str(&other.key_fragment()),
        }
    }
}

impl From<bool> for DataValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i32> for DataValue {
    fn from(value: i32) -> Self {
        Self::Int(i64::from(value))
    }
}

impl From<i64> for DataValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<f64> for DataValue {
    fn from(value: f64) -> Self {
        Self::Double(value)
    }
}

impl From<&str> for DataValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_owned())
    }
}

impl From<String> for DataValue {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<Uuid> for DataValue {
    fn from(value: Uuid) -> Self {
        Self::Guid(value)
    }
}

impl From<DateTime<Utc>> for DataValue {
    fn from(value: DateTime<Utc>) -> Self {
        Self::DateTime(value)
    }
}

impl<T: Into<DataValue>> From<Option<T>> for DataValue {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Null, Into::into)
    }
}

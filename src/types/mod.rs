//! Scalar field types.
//!
//! Every type converts loosely-typed JSON input into a [`Value`] (`cast`),
//! checks an already cast value (`is_valid`), compares two values with its
//! own notion of equality (`is_equal`) and names the Postgres column type
//! it is stored in (`column_definition`).

use std::fmt;

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use serde_json::Value as JsonValue;

use crate::core::Value;

pub const DEFAULT_STRING_SIZE: usize = 255;

#[derive(Debug, Clone, PartialEq)]
pub enum FieldType {
    /// Auto-generated integer primary key.
    Id,
    Boolean,
    Integer,
    Float,
    /// Bounded string stored as `varchar(size)`.
    String { size: usize },
    Text,
    Date,
    /// JSON array whose elements are cast through an optional element type.
    JsonArray(Option<Box<FieldType>>),
}

impl FieldType {
    pub fn string() -> Self {
        Self::String { size: DEFAULT_STRING_SIZE }
    }

    pub fn string_sized(size: usize) -> Self {
        Self::String { size }
    }

    pub fn json_array_of(element: FieldType) -> Self {
        Self::JsonArray(Some(Box::new(element)))
    }

    /// Converts raw input; `None` means the input carries no usable value.
    pub fn cast(&self, raw: &JsonValue) -> Option<Value> {
        if raw.is_null() {
            return None;
        }
        match self {
            Self::Id | Self::Integer => cast_integer(raw),
            Self::Boolean => cast_boolean(raw),
            Self::Float => cast_float(raw),
            Self::String { .. } | Self::Text => Some(Value::Text(match raw {
                JsonValue::String(s) => s.clone(),
                other => other.to_string(),
            })),
            Self::Date => cast_date(raw),
            Self::JsonArray(element) => {
                let items = raw.as_array()?;
                let cast = items
                    .iter()
                    .map(|item| match element {
                        Some(ty) => ty.cast(item).map(|v| v.to_json()).unwrap_or(JsonValue::Null),
                        None => item.clone(),
                    })
                    .collect();
                Some(Value::Json(JsonValue::Array(cast)))
            }
        }
    }

    pub fn is_valid(&self, value: &Value) -> bool {
        match (self, value) {
            (Self::Id | Self::Integer, Value::Integer(n)) => i32::try_from(*n).is_ok(),
            (Self::Boolean, Value::Boolean(_)) => true,
            (Self::Float, Value::Float(f)) => f.is_finite(),
            (Self::Float, Value::Integer(_)) => true,
            (Self::String { size }, Value::Text(s)) => s.chars().count() <= *size,
            (Self::Text, Value::Text(_)) => true,
            (Self::Date, Value::Date(_)) => true,
            (Self::JsonArray(_), Value::Json(j)) => j.is_array(),
            _ => false,
        }
    }

    /// Normalizes a value read back from a column; `Null` yields `None`.
    pub fn decode(&self, stored: Value) -> Option<Value> {
        if stored.is_null() {
            return None;
        }
        if self.is_valid(&stored) {
            return Some(stored);
        }
        self.cast(&stored.to_json())
    }

    pub fn is_equal(&self, a: &Value, b: &Value) -> bool {
        match (self, a, b) {
            (Self::Date, Value::Date(x), Value::Date(y)) => x.timestamp_millis() == y.timestamp_millis(),
            _ => a == b,
        }
    }

    /// Postgres column type used when creating the column.
    pub fn column_definition(&self) -> String {
        match self {
            Self::Id => "serial".to_string(),
            Self::Boolean => "boolean".to_string(),
            Self::Integer => "integer".to_string(),
            Self::Float => "double precision".to_string(),
            Self::String { size } => format!("varchar({})", size),
            Self::Text => "text".to_string(),
            Self::Date => "timestamptz".to_string(),
            Self::JsonArray(_) => "jsonb".to_string(),
        }
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Id => write!(f, "Id"),
            Self::Boolean => write!(f, "Boolean"),
            Self::Integer => write!(f, "Integer"),
            Self::Float => write!(f, "Float"),
            Self::String { size } => write!(f, "String({})", size),
            Self::Text => write!(f, "Text"),
            Self::Date => write!(f, "Date"),
            Self::JsonArray(_) => write!(f, "JsonArray"),
        }
    }
}

fn cast_integer(raw: &JsonValue) -> Option<Value> {
    match raw {
        JsonValue::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.is_finite()).map(|f| f.trunc() as i64))
            .map(Value::Integer),
        JsonValue::String(s) => {
            let s = s.trim();
            s.parse::<i64>()
                .ok()
                .or_else(|| {
                    s.parse::<f64>()
                        .ok()
                        .filter(|f| f.is_finite())
                        .map(|f| f.trunc() as i64)
                })
                .map(Value::Integer)
        }
        _ => None,
    }
}

fn cast_float(raw: &JsonValue) -> Option<Value> {
    let parsed = match raw {
        JsonValue::Number(n) => n.as_f64(),
        JsonValue::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    parsed.filter(|f| f.is_finite()).map(Value::Float)
}

fn cast_boolean(raw: &JsonValue) -> Option<Value> {
    match raw {
        JsonValue::Bool(b) => Some(Value::Boolean(*b)),
        JsonValue::Number(n) => n.as_f64().map(|f| Value::Boolean(f != 0.0)),
        JsonValue::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "t" | "1" | "yes" | "on" => Some(Value::Boolean(true)),
            "false" | "f" | "0" | "no" | "off" | "" => Some(Value::Boolean(false)),
            _ => None,
        },
        _ => None,
    }
}

fn cast_date(raw: &JsonValue) -> Option<Value> {
    let parsed = match raw {
        JsonValue::Number(n) => n.as_i64().and_then(from_epoch_millis),
        JsonValue::String(s) => parse_date(s.trim()),
        _ => None,
    };
    parsed.map(Value::Date)
}

fn from_epoch_millis(ms: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_millis_opt(ms).single()
}

fn parse_date(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(d) = DateTime::parse_from_rfc3339(s) {
        return Some(d.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, format) {
            return Some(Utc.from_utc_datetime(&naive));
        }
    }
    if let Ok(day) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        return day.and_hms_opt(0, 0, 0).map(|naive| Utc.from_utc_datetime(&naive));
    }
    s.parse::<i64>().ok().and_then(from_epoch_millis)
}

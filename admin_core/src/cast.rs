//! Coercion of untrusted input into typed bind values, per field kind.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde_json::Value;

use crate::field::{FieldKind, RelationKind};
use crate::sql::{BindValue, SqlValue};

/// Why a value could not be coerced; renders as the tail of a validation message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CastError {
    Integer,
    Number,
    Boolean,
    Date,
    String,
    Json,
    File,
    Ids,
}

impl CastError {
    pub fn message(self, label: &str) -> String {
        match self {
            Self::Integer => format!("The {label} must be an integer."),
            Self::Number => format!("The {label} must be a number."),
            Self::Boolean => format!("The {label} field must be true or false."),
            Self::Date => format!("The {label} is not a valid date."),
            Self::String => format!("The {label} must be a string."),
            Self::Json => format!("The {label} must be a valid JSON string."),
            Self::File => format!("The {label} must be a file."),
            Self::Ids => format!("The {label} must be a list of identifiers."),
        }
    }
}

/// Empty strings count as absent values.
pub fn is_blank(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        _ => false,
    }
}

/// Coerce a single value for a column of `kind`. Blank input yields `NULL`.
pub fn to_sql_value(kind: &FieldKind, value: &Value) -> Result<SqlValue, CastError> {
    if is_blank(value) {
        return Ok(None);
    }
    let bind = match kind {
        FieldKind::Text => BindValue::Text(match value {
            Value::String(s) => s.clone(),
            Value::Number(n) => n.to_string(),
            Value::Bool(b) => b.to_string(),
            _ => return Err(CastError::String),
        }),
        FieldKind::Integer => BindValue::BigInt(to_i64(value).ok_or(CastError::Integer)?),
        FieldKind::Float => BindValue::Double(to_f64(value).ok_or(CastError::Number)?),
        FieldKind::Decimal => {
            let text = match value {
                Value::Number(n) => n.to_string(),
                Value::String(s) => s.trim().to_string(),
                _ => return Err(CastError::Number),
            };
            if !text.parse::<f64>().is_ok_and(f64::is_finite) {
                return Err(CastError::Number);
            }
            BindValue::Numeric(text)
        }
        FieldKind::Boolean => BindValue::Bool(to_bool(value).ok_or(CastError::Boolean)?),
        FieldKind::Date => BindValue::Date(to_date(value).ok_or(CastError::Date)?),
        FieldKind::DateTime => BindValue::Timestamp(to_datetime(value).ok_or(CastError::Date)?),
        FieldKind::Json => match value {
            Value::String(s) => {
                BindValue::Json(serde_json::from_str(s).map_err(|_| CastError::Json)?)
            }
            other => BindValue::Json(other.clone()),
        },
        FieldKind::File => return Err(CastError::File),
        FieldKind::Relation(rel) => match rel.kind {
            RelationKind::BelongsTo => BindValue::BigInt(parse_id(value).ok_or(CastError::Integer)?),
            RelationKind::HasMany | RelationKind::BelongsToMany => return Err(CastError::Ids),
        },
    };
    Ok(Some(bind))
}

pub fn to_i64(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| {
            n.as_f64()
                .filter(|f| f.fract() == 0.0 && f.abs() < 9.0e15)
                .map(|f| f as i64)
        }),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

pub fn to_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok().filter(|f| f.is_finite()),
        _ => None,
    }
}

pub fn to_bool(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::Number(n) => match n.as_i64() {
            Some(0) => Some(false),
            Some(1) => Some(true),
            _ => None,
        },
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "on" | "yes" => Some(true),
            "0" | "false" | "off" | "no" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

pub fn to_date(value: &Value) -> Option<NaiveDate> {
    let s = value.as_str()?.trim();
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .or_else(|| to_datetime(value).map(|dt| dt.date_naive()))
}

pub fn to_datetime(value: &Value) -> Option<DateTime<Utc>> {
    let s = value.as_str()?.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M", "%Y-%m-%dT%H:%M"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, format) {
            return Some(naive.and_utc());
        }
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

/// An identifier given as a number, numeric string, or `{"id": …}` object.
pub fn parse_id(value: &Value) -> Option<i64> {
    match value {
        Value::Object(map) => map.get("id").and_then(parse_id),
        other => to_i64(other),
    }
}

/// A list of identifiers: JSON array, JSON-encoded string, or comma separated string.
pub fn parse_id_list(value: &Value) -> Result<Vec<i64>, CastError> {
    let items = match value {
        Value::Null => return Ok(Vec::new()),
        Value::Array(items) => items.clone(),
        Value::String(s) => {
            let s = s.trim();
            if s.is_empty() {
                return Ok(Vec::new());
            }
            if s.starts_with('[') {
                match serde_json::from_str::<Value>(s) {
                    Ok(Value::Array(items)) => items,
                    _ => return Err(CastError::Ids),
                }
            } else {
                s.split(',').map(|p| Value::String(p.to_string())).collect()
            }
        }
        other => vec![other.clone()],
    };

    let mut ids = Vec::with_capacity(items.len());
    for item in &items {
        let id = parse_id(item).ok_or(CastError::Ids)?;
        if !ids.contains(&id) {
            ids.push(id);
        }
    }
    Ok(ids)
}

/// Child rows for a HasMany field: a JSON array of objects, possibly JSON-encoded.
pub fn parse_children(value: &Value) -> Result<Vec<serde_json::Map<String, Value>>, CastError> {
    let items = match value {
        Value::Null => return Ok(Vec::new()),
        Value::Array(items) => items.clone(),
        Value::String(s) if s.trim().is_empty() => return Ok(Vec::new()),
        Value::String(s) => match serde_json::from_str::<Value>(s) {
            Ok(Value::Array(items)) => items,
            _ => return Err(CastError::Json),
        },
        _ => return Err(CastError::Json),
    };
    items
        .into_iter()
        .map(|item| match item {
            Value::Object(map) => Ok(map),
            _ => Err(CastError::Json),
        })
        .collect()
}

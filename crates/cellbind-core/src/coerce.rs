//! Host value coercion.
//!
//! One policy shared by the scalar conversion rules and the array shim:
//! blank inputs become the target's zero value, host errors propagate, and
//! text is parsed with the host's invariant conventions.

use crate::callable::CallError;
use crate::serial;
use crate::types::Type;
use crate::value::{Block, Value};
use chrono::{NaiveDate, NaiveDateTime};

const DATE_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
    "%m/%d/%Y %H:%M:%S",
];

/// Coerce a host value to `target`.
pub fn coerce(value: Value, target: &Type) -> Result<Value, CallError> {
    if let Value::Error(e) = value {
        return Err(e.into());
    }
    match target {
        Type::Any => Ok(value),
        Type::Optional(inner) => match value {
            Value::Missing | Value::Empty | Value::Null => Ok(Value::Null),
            other => coerce(other, inner),
        },
        _ if matches!(value, Value::Missing | Value::Empty | Value::Null) => {
            Ok(target.default_value())
        }
        Type::Number => to_number(value).map(Value::Number),
        Type::Int => to_integer(value, i32::MIN as f64, i32::MAX as f64, "Int32").map(Value::Int),
        Type::Long => to_integer(value, i64::MIN as f64, i64::MAX as f64, "Int64").map(Value::Int),
        Type::Bool => to_bool(value).map(Value::Bool),
        Type::Text => Ok(Value::Text(to_text(value)?)),
        Type::DateTime => to_datetime(value).map(Value::DateTime),
        Type::Block => match value {
            Value::Block(b) => Ok(Value::Block(b)),
            other => Ok(Value::Block(Block::column(vec![other]))),
        },
        Type::Sequence(element) => {
            let items = match value {
                Value::List(items) => items,
                Value::Block(b) => b.into_cells(),
                other => vec![other],
            };
            items
                .into_iter()
                .map(|item| coerce(item, element))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::List)
        }
        Type::Enum(e) => match value {
            Value::Enum(v) if v.type_name == e.name => Ok(Value::Enum(v)),
            Value::Text(s) => e.parse(&s).map(Value::Enum),
            Value::Int(i) => usize::try_from(i)
                .ok()
                .and_then(|i| e.nth(i))
                .map(Value::Enum)
                .ok_or_else(|| CallError::value(format!("{i} is not a valid value for {}", e.name))),
            other => Err(invalid_cast(&other, target)),
        },
        Type::Object(o) => {
            let accepted = match &value {
                Value::Record(r) => o.is_named(&r.type_name),
                Value::Handle(h) => o.is_named(h.type_name()),
                _ => false,
            };
            if accepted {
                Ok(value)
            } else {
                Err(invalid_cast(&value, target))
            }
        }
    }
}

fn invalid_cast(value: &Value, target: &Type) -> CallError {
    CallError::value(format!("Invalid cast from '{}' to '{}'.", value.kind(), target))
}

fn to_number(value: Value) -> Result<f64, CallError> {
    match value {
        Value::Number(n) => Ok(n),
        Value::Int(i) => Ok(i as f64),
        Value::Bool(b) => Ok(if b { 1.0 } else { 0.0 }),
        Value::Text(s) => s
            .trim()
            .parse::<f64>()
            .map_err(|_| CallError::value("Input string was not in a correct format.")),
        Value::DateTime(dt) => Ok(serial::to_serial(dt)),
        other => Err(invalid_cast(&other, &Type::Number)),
    }
}

fn to_integer(value: Value, min: f64, max: f64, name: &str) -> Result<i64, CallError> {
    let overflow = || CallError::value(format!("Value was either too large or too small for an {name}."));
    let n = match value {
        Value::Int(i) if (i as f64) >= min && (i as f64) <= max => return Ok(i),
        Value::Int(_) => return Err(overflow()),
        Value::Bool(b) => return Ok(b as i64),
        Value::Text(s) => {
            return s
                .trim()
                .parse::<i64>()
                .ok()
                .filter(|i| (*i as f64) >= min && (*i as f64) <= max)
                .ok_or_else(|| CallError::value("Input string was not in a correct format."));
        }
        Value::Number(n) => n,
        other => return Err(invalid_cast(&other, &Type::Int)),
    };
    let rounded = n.round_ties_even();
    if rounded.is_nan() || rounded < min || rounded > max {
        return Err(overflow());
    }
    Ok(rounded as i64)
}

fn to_bool(value: Value) -> Result<bool, CallError> {
    match value {
        Value::Bool(b) => Ok(b),
        Value::Number(n) => Ok(n != 0.0),
        Value::Int(i) => Ok(i != 0),
        Value::Text(s) => {
            let s = s.trim();
            if s.eq_ignore_ascii_case("true") {
                Ok(true)
            } else if s.eq_ignore_ascii_case("false") {
                Ok(false)
            } else {
                Err(CallError::value("String was not recognized as a valid Boolean."))
            }
        }
        other => Err(invalid_cast(&other, &Type::Bool)),
    }
}

fn to_text(value: Value) -> Result<String, CallError> {
    match value {
        Value::Text(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        Value::Int(i) => Ok(i.to_string()),
        Value::Bool(true) => Ok("True".to_string()),
        Value::Bool(false) => Ok("False".to_string()),
        Value::DateTime(dt) => Ok(dt.format("%Y-%m-%d %H:%M:%S").to_string()),
        Value::Enum(e) => Ok(e.variant),
        other => Err(invalid_cast(&other, &Type::Text)),
    }
}

fn to_datetime(value: Value) -> Result<NaiveDateTime, CallError> {
    let from_serial = |n: f64| serial::from_serial(n).map_err(|e| CallError::value(e.to_string()));
    match value {
        Value::DateTime(dt) => Ok(dt),
        Value::Number(n) => from_serial(n),
        Value::Int(i) => from_serial(i as f64),
        Value::Text(s) => parse_datetime(s.trim())
            .ok_or_else(|| CallError::value("String was not recognized as a valid DateTime.")),
        other => Err(invalid_cast(&other, &Type::DateTime)),
    }
}

/// Parse ISO-like date/time text, or a bare date at midnight.
pub fn parse_datetime(s: &str) -> Option<NaiveDateTime> {
    DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
        .or_else(|| {
            ["%Y-%m-%d", "%m/%d/%Y"]
                .iter()
                .find_map(|fmt| NaiveDate::parse_from_str(s, fmt).ok())
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
}

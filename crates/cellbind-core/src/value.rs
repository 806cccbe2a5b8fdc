//! Host values: what crosses the boundary between the host and adapted functions.

use chrono::NaiveDateTime;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::fmt;
use std::sync::Arc;

/// Host error kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorCode {
    #[serde(rename = "#VALUE!")]
    Value,
    #[serde(rename = "#N/A")]
    NotAvailable,
    #[serde(rename = "#NUM!")]
    Num,
    #[serde(rename = "#REF!")]
    Ref,
    #[serde(rename = "#NAME?")]
    Name,
    #[serde(rename = "#DIV/0!")]
    Div0,
    #[serde(rename = "#NULL!")]
    Null,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::Value => "#VALUE!",
            ErrorCode::NotAvailable => "#N/A",
            ErrorCode::Num => "#NUM!",
            ErrorCode::Ref => "#REF!",
            ErrorCode::Name => "#NAME?",
            ErrorCode::Div0 => "#DIV/0!",
            ErrorCode::Null => "#NULL!",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        [
            ErrorCode::Value,
            ErrorCode::NotAvailable,
            ErrorCode::Num,
            ErrorCode::Ref,
            ErrorCode::Name,
            ErrorCode::Div0,
            ErrorCode::Null,
        ]
        .into_iter()
        .find(|code| code.as_str().eq_ignore_ascii_case(s))
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An error value as seen by the host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostError {
    pub code: ErrorCode,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,
}

impl HostError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

/// A value of an enumeration type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnumValue {
    pub type_name: String,
    pub variant: String,
}

impl EnumValue {
    pub fn new(type_name: &str, variant: &str) -> Self {
        Self {
            type_name: type_name.to_string(),
            variant: variant.to_string(),
        }
    }
}

/// An instance of a record type: named fields in declaration order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub type_name: String,
    pub fields: IndexMap<String, Value>,
}

impl Record {
    pub fn new(type_name: &str) -> Self {
        Self {
            type_name: type_name.to_string(),
            fields: IndexMap::new(),
        }
    }

    pub fn with(mut self, name: &str, value: Value) -> Self {
        self.set(name, value);
        self
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    pub fn set(&mut self, name: &str, value: Value) {
        self.fields.insert(name.to_string(), value);
    }
}

/// A rectangular block of values, stored row-major.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawBlock")]
pub struct Block {
    rows: usize,
    columns: usize,
    cells: Vec<Value>,
}

/// Unchecked wire form of [`Block`].
#[derive(Deserialize)]
struct RawBlock {
    rows: usize,
    columns: usize,
    cells: Vec<Value>,
}

impl TryFrom<RawBlock> for Block {
    type Error = String;

    fn try_from(raw: RawBlock) -> Result<Self, Self::Error> {
        if raw.rows.checked_mul(raw.columns) != Some(raw.cells.len()) {
            return Err(format!(
                "block of {}x{} cannot hold {} cells",
                raw.rows,
                raw.columns,
                raw.cells.len()
            ));
        }
        Ok(Self {
            rows: raw.rows,
            columns: raw.columns,
            cells: raw.cells,
        })
    }
}

impl Block {
    /// Build a block from rows; all rows must have the same width.
    pub fn from_rows(rows: Vec<Vec<Value>>) -> Option<Self> {
        let columns = rows.first().map(Vec::len).unwrap_or(0);
        if rows.iter().any(|r| r.len() != columns) {
            return None;
        }
        let row_count = rows.len();
        Some(Self {
            rows: row_count,
            columns,
            cells: rows.into_iter().flatten().collect(),
        })
    }

    /// A single-column block.
    pub fn column(values: Vec<Value>) -> Self {
        Self {
            rows: values.len(),
            columns: 1,
            cells: values,
        }
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn columns(&self) -> usize {
        self.columns
    }

    pub fn get(&self, row: usize, column: usize) -> Option<&Value> {
        if row >= self.rows || column >= self.columns {
            return None;
        }
        self.cells.get(row * self.columns + column)
    }

    pub fn row(&self, row: usize) -> &[Value] {
        let start = row * self.columns;
        self.cells.get(start..start + self.columns).unwrap_or(&[])
    }

    /// Cells in row-major order.
    pub fn cells(&self) -> &[Value] {
        &self.cells
    }

    pub fn into_cells(self) -> Vec<Value> {
        self.cells
    }
}

/// An opaque object owned by the adapted code.
#[derive(Clone)]
pub struct Handle {
    type_name: Arc<str>,
    inner: Arc<dyn Any + Send + Sync>,
}

impl Handle {
    pub fn new<T: Any + Send + Sync>(type_name: &str, value: T) -> Self {
        Self {
            type_name: Arc::from(type_name),
            inner: Arc::new(value),
        }
    }

    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.inner.downcast_ref::<T>()
    }
}

impl PartialEq for Handle {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Handle({})", self.type_name)
    }
}

/// A value flowing through an adapted call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Value {
    /// Argument omitted by the caller.
    Missing,
    /// Reference to an empty cell.
    Empty,
    Null,
    Bool(bool),
    Int(i64),
    Number(f64),
    Text(String),
    DateTime(NaiveDateTime),
    Error(HostError),
    Enum(EnumValue),
    Record(Record),
    List(Vec<Value>),
    Block(Block),
    #[serde(skip)]
    Handle(Handle),
}

impl Value {
    pub fn text(s: impl Into<String>) -> Self {
        Value::Text(s.into())
    }

    pub fn error(code: ErrorCode, message: impl Into<String>) -> Self {
        Value::Error(HostError::new(code, message))
    }

    /// Missing or empty: the host passed nothing meaningful.
    pub fn is_blank(&self) -> bool {
        matches!(self, Value::Missing | Value::Empty)
    }

    /// Short description of the value's kind, used in error messages.
    pub fn kind(&self) -> &str {
        match self {
            Value::Missing => "missing",
            Value::Empty => "empty",
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Number(_) => "number",
            Value::Text(_) => "text",
            Value::DateTime(_) => "datetime",
            Value::Error(_) => "error",
            Value::Enum(e) => &e.type_name,
            Value::Record(r) => &r.type_name,
            Value::List(_) => "sequence",
            Value::Block(_) => "block",
            Value::Handle(h) => h.type_name(),
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            Value::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Missing | Value::Empty | Value::Null => Ok(()),
            Value::Bool(true) => write!(f, "TRUE"),
            Value::Bool(false) => write!(f, "FALSE"),
            Value::Int(i) => write!(f, "{i}"),
            Value::Number(n) => write!(f, "{n}"),
            Value::Text(s) => write!(f, "{s}"),
            Value::DateTime(dt) => write!(f, "{}", dt.format("%Y-%m-%dT%H:%M:%S")),
            Value::Error(e) => write!(f, "{}", e.code),
            Value::Enum(e) => write!(f, "{}", e.variant),
            Value::Record(r) => {
                write!(f, "{} {{", r.type_name)?;
                for (i, (name, value)) in r.fields.iter().enumerate() {
                    if i > 0 {
                        write!(f, ",")?;
                    }
                    write!(f, " {name}: {value}")?;
                }
                write!(f, " }}")
            }
            Value::List(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, "]")
            }
            Value::Block(block) => {
                for r in 0..block.rows() {
                    if r > 0 {
                        writeln!(f)?;
                    }
                    let cells: Vec<String> = block.row(r).iter().map(|c| c.to_string()).collect();
                    write!(f, "{}", cells.join("\t"))?;
                }
                Ok(())
            }
            Value::Handle(h) => write!(f, "<{}>", h.type_name()),
        }
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl From<HostError> for Value {
    fn from(e: HostError) -> Self {
        Value::Error(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_block_rejects_ragged_rows() {
        let rows = vec![vec![Value::Int(1), Value::Int(2)], vec![Value::Int(3)]];
        assert!(Block::from_rows(rows).is_none());
    }

    #[test]
    fn test_block_deserialize_checks_shape() {
        let bad = r#"{"kind":"block","value":{"rows":2,"columns":3,"cells":[{"kind":"number","value":1.0}]}}"#;
        assert!(serde_json::from_str::<Value>(bad).is_err());

        let block = Block::from_rows(vec![vec![Value::Int(1), Value::Int(2)]]).unwrap();
        let json = serde_json::to_string(&Value::Block(block.clone())).unwrap();
        assert_eq!(serde_json::from_str::<Value>(&json).unwrap(), Value::Block(block));
    }

    #[test]
    fn test_block_indexing() {
        let block = Block::from_rows(vec![
            vec![Value::from("a"), Value::from("b")],
            vec![Value::Int(1), Value::Int(2)],
        ])
        .unwrap();
        assert_eq!(block.rows(), 2);
        assert_eq!(block.columns(), 2);
        assert_eq!(block.get(1, 0), Some(&Value::Int(1)));
        assert_eq!(block.get(2, 0), None);
        assert_eq!(block.row(0), &[Value::from("a"), Value::from("b")]);
    }

    #[test]
    fn test_handles_compare_by_identity() {
        let a = Handle::new("Calc", 1.0_f64);
        let b = Handle::new("Calc", 1.0_f64);
        assert_eq!(a, a.clone());
        assert_ne!(a, b);
        assert_eq!(a.downcast_ref::<f64>(), Some(&1.0));
    }

    #[test]
    fn test_error_code_roundtrip() {
        assert_eq!(ErrorCode::parse("#n/a"), Some(ErrorCode::NotAvailable));
        assert_eq!(ErrorCode::Div0.to_string(), "#DIV/0!");
        assert_eq!(ErrorCode::parse("#BOGUS"), None);
    }

    #[test]
    fn test_value_json_shape() {
        let json = serde_json::to_string(&Value::Number(1.5)).unwrap();
        assert_eq!(json, r#"{"kind":"number","value":1.5}"#);
        let back: Value = serde_json::from_str(r#"{"kind":"missing"}"#).unwrap();
        assert_eq!(back, Value::Missing);
    }
}

//! Array/record shim.
//!
//! Functions that take or return sequences of records are exposed to the
//! host as functions over blocks. A record sequence travels as a block whose
//! first row holds property names and whose remaining rows hold one record
//! each. Sequences of scalars travel as a flat list in, a single column out.
//!
//! Shimmed functions never fail across the boundary: any error becomes a
//! two-row block holding the error value and its message.

use crate::callable::{CallError, Callable};
use crate::coerce::coerce;
use crate::descriptor::{FunctionDescriptor, Marker};
use crate::types::{ObjectType, Type};
use crate::value::{Block, HostError, Value};
use std::iter;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error, PartialEq)]
pub enum ShimError {
    #[error("{0} has no properties to map")]
    NoProperties(String),
    #[error("sequences of {0} cannot be mapped")]
    Unsupported(String),
    #[error("invalid descriptor: {0}")]
    Descriptor(String),
}

/// How one slot crosses the boundary.
#[derive(Debug, Clone)]
enum Slot {
    /// Header-row block of records.
    Records(Arc<ObjectType>),
    /// Sequence of scalars.
    Scalars(Type),
    /// Single value, coerced on the way in.
    Value(Type),
}

impl Slot {
    fn classify(ty: &Type) -> Result<Self, ShimError> {
        let Type::Sequence(element) = ty else {
            return Ok(Slot::Value(ty.clone()));
        };
        match element.as_ref() {
            Type::Object(o) if o.properties.is_empty() => Err(ShimError::NoProperties(o.name.clone())),
            Type::Object(o) => Ok(Slot::Records(Arc::clone(o))),
            e if e.is_scalar() => Ok(Slot::Scalars(e.clone())),
            e => Err(ShimError::Unsupported(e.to_string())),
        }
    }

    fn help(&self) -> String {
        match self {
            Slot::Records(o) => {
                let names: Vec<&str> = o.properties.iter().map(|p| p.name.as_str()).collect();
                format!("array, with header row containing: {}", names.join(","))
            }
            Slot::Scalars(element) => format!("value, of type {}", Type::sequence(element.clone())),
            Slot::Value(ty) => format!("value, of type {ty}"),
        }
    }

    fn decode(&self, value: Value) -> Result<Value, CallError> {
        match self {
            Slot::Value(ty) => coerce(value, ty),
            Slot::Scalars(element) => sequence_items(value)?
                .into_iter()
                .map(|item| coerce(item, element))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::List),
            Slot::Records(ty) => decode_records(ty, value),
        }
    }

    fn encode(&self, value: Value) -> Result<Value, CallError> {
        match self {
            Slot::Value(_) => Ok(host_cell(value)),
            Slot::Scalars(_) => {
                let items = sequence_items(value)?.into_iter().map(host_cell).collect();
                Ok(Value::Block(Block::column(items)))
            }
            Slot::Records(ty) => encode_records(ty, value),
        }
    }
}

/// Resolved slot handling for a qualifying function.
#[derive(Debug, Clone)]
pub struct ShimPlan {
    params: Vec<Slot>,
    returns: Slot,
}

fn is_record_sequence(ty: &Type) -> bool {
    matches!(ty.element(), Some(Type::Object(o)) if !o.properties.is_empty())
}

/// Plan the shim for `descriptor`.
///
/// Returns `Ok(None)` when the function neither carries the map-array
/// marker nor has a record-sequence slot.
pub fn plan(descriptor: &FunctionDescriptor) -> Result<Option<ShimPlan>, ShimError> {
    let callable = &descriptor.callable;
    let marked = descriptor.markers.has(|m| matches!(m, Marker::MapArray));
    let qualifies = marked
        || callable
            .params()
            .iter()
            .chain(iter::once(callable.returns()))
            .any(is_record_sequence);
    if !qualifies {
        return Ok(None);
    }
    descriptor
        .validate()
        .map_err(|e| ShimError::Descriptor(e.to_string()))?;
    let params = callable
        .params()
        .iter()
        .map(Slot::classify)
        .collect::<Result<Vec<_>, _>>()?;
    let returns = Slot::classify(callable.returns())?;
    Ok(Some(ShimPlan { params, returns }))
}

/// Shim `descriptor` in place if it qualifies.
///
/// Planning failures are logged and leave the descriptor untouched.
pub fn try_shim(descriptor: &mut FunctionDescriptor) -> bool {
    match plan(descriptor) {
        Ok(Some(plan)) => {
            apply(descriptor, plan);
            true
        }
        Ok(None) => false,
        Err(e) => {
            warn!(function = %descriptor.name, "not shimming: {e}");
            false
        }
    }
}

fn apply(descriptor: &mut FunctionDescriptor, plan: ShimPlan) {
    for (param, slot) in descriptor.parameters.iter_mut().zip(&plan.params) {
        if param.description.is_empty() {
            param.description = slot.help();
        }
    }
    if descriptor.returns.description.is_empty() {
        descriptor.returns.description = plan.returns.help();
    }

    let target = descriptor.callable.clone();
    let arity = target.arity();
    debug!(function = %descriptor.name, arity, "shimmed array function");
    descriptor.callable = Callable::new(vec![Type::Any; arity], Type::Any, move |args| {
        Ok(invoke(&plan, &target, args).unwrap_or_else(error_block))
    });
}

fn invoke(plan: &ShimPlan, target: &Callable, args: Vec<Value>) -> Result<Value, CallError> {
    let inputs = args
        .into_iter()
        .zip(&plan.params)
        .enumerate()
        .map(|(i, (arg, slot))| {
            slot.decode(arg)
                .map_err(|e| e.context(format!("Failed to convert parameter {}", i + 1)))
        })
        .collect::<Result<Vec<_>, _>>()?;
    let result = target.call(inputs)?;
    plan.returns
        .encode(result)
        .map_err(|e| e.context("Failed to convert result"))
}

/// Two-row block: the error value, then its message.
pub fn error_block(error: CallError) -> Value {
    let message = error.message.clone();
    Value::Block(Block::column(vec![
        Value::Error(HostError::new(error.code, error.message)),
        Value::Text(message),
    ]))
}

fn host_cell(value: Value) -> Value {
    match value {
        Value::Null | Value::Missing => Value::Empty,
        other => other,
    }
}

fn sequence_items(value: Value) -> Result<Vec<Value>, CallError> {
    match value {
        Value::List(items) => Ok(items),
        Value::Block(b) => Ok(b.into_cells()),
        Value::Null => Ok(Vec::new()),
        Value::Error(e) => Err(e.into()),
        other => Ok(vec![other]),
    }
}

fn decode_records(ty: &ObjectType, value: Value) -> Result<Value, CallError> {
    let block = match value {
        Value::Block(b) => b,
        Value::Error(e) => return Err(e.into()),
        other => {
            return Err(CallError::value(format!(
                "Expected an array with a header row, got {}",
                other.kind()
            )));
        }
    };
    if block.rows() == 0 {
        return Err(CallError::value("Expected an array with a header row"));
    }
    let header = block.row(0);
    let columns: Vec<Option<usize>> = ty
        .properties
        .iter()
        .map(|p| {
            header.iter().position(|cell| {
                matches!(cell, Value::Text(name) if name.trim().eq_ignore_ascii_case(&p.name))
            })
        })
        .collect();

    (1..block.rows())
        .map(|r| {
            let row = block.row(r);
            let values = ty
                .properties
                .iter()
                .zip(&columns)
                .map(|(prop, column)| match column {
                    Some(c) => match row.get(*c) {
                        Some(cell) => coerce(cell.clone(), &prop.ty),
                        None => Ok(prop.ty.default_value()),
                    },
                    None => Ok(prop.ty.default_value()),
                })
                .collect::<Result<Vec<_>, _>>()?;
            ty.construct(values)
        })
        .collect::<Result<Vec<_>, _>>()
        .map(Value::List)
}

fn encode_records(ty: &ObjectType, value: Value) -> Result<Value, CallError> {
    let items = sequence_items(value)?;
    let mut rows = Vec::with_capacity(items.len() + 1);
    rows.push(
        ty.properties
            .iter()
            .map(|p| Value::Text(p.name.clone()))
            .collect::<Vec<_>>(),
    );
    for item in items {
        let row = match item {
            Value::Record(record) => ty
                .properties
                .iter()
                .map(|p| host_cell(record.get(&p.name).cloned().unwrap_or(Value::Empty)))
                .collect(),
            Value::Null => vec![Value::Empty; ty.properties.len()],
            other => {
                return Err(CallError::value(format!(
                    "Expected {}, got {}",
                    ty.name,
                    other.kind()
                )));
            }
        };
        rows.push(row);
    }
    Block::from_rows(rows)
        .map(Value::Block)
        .ok_or_else(|| CallError::value("ragged result block"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Property;
    use crate::value::{ErrorCode, Record};

    fn point() -> ObjectType {
        ObjectType::new("Point")
            .property(Property::new("X", Type::Number))
            .property(Property::new("Y", Type::Number))
    }

    fn block(rows: Vec<Vec<Value>>) -> Value {
        Value::Block(Block::from_rows(rows).unwrap())
    }

    fn count_points() -> FunctionDescriptor {
        let callable = Callable::new(vec![Type::sequence(point().into_type())], Type::Int, |args| {
            match &args[0] {
                Value::List(items) => Ok(Value::Int(items.len() as i64)),
                other => Err(CallError::value(format!("unexpected {}", other.kind()))),
            }
        });
        FunctionDescriptor::new("CountPoints", callable)
    }

    #[test]
    fn test_plain_function_not_shimmed() {
        let callable = Callable::new(vec![Type::Number], Type::Number, |mut a| Ok(a.remove(0)));
        let mut desc = FunctionDescriptor::new("Id", callable);
        assert!(!try_shim(&mut desc));
        assert_eq!(desc.callable.params(), &[Type::Number]);
    }

    #[test]
    fn test_record_parameter_decoding() {
        let mut desc = count_points();
        assert!(try_shim(&mut desc));
        assert_eq!(desc.callable.params(), &[Type::Any]);
        assert_eq!(desc.parameters[0].description, "array, with header row containing: X,Y");

        let input = block(vec![
            vec![Value::text("y"), Value::text("Unknown"), Value::text("X")],
            vec![Value::Number(1.0), Value::Bool(true), Value::Number(2.0)],
            vec![Value::Number(3.0), Value::Empty, Value::Number(4.0)],
        ]);
        assert_eq!(desc.callable.call(vec![input]), Ok(Value::Int(2)));
    }

    #[test]
    fn test_header_only_block_is_empty_sequence() {
        let mut desc = count_points();
        try_shim(&mut desc);
        let input = block(vec![vec![Value::text("X"), Value::text("Y")]]);
        assert_eq!(desc.callable.call(vec![input]), Ok(Value::Int(0)));
    }

    #[test]
    fn test_block_without_header_row_is_an_error() {
        let mut desc = count_points();
        try_shim(&mut desc);
        let empty = Value::Block(Block::from_rows(vec![]).unwrap());
        assert_eq!(
            desc.callable.call(vec![empty]),
            Ok(error_block(CallError::value(
                "Failed to convert parameter 1: Expected an array with a header row"
            )))
        );
    }

    #[test]
    fn test_non_block_input_becomes_error_block() {
        let mut desc = count_points();
        try_shim(&mut desc);
        let Value::Block(out) = desc.callable.call(vec![Value::Number(1.0)]).unwrap() else {
            panic!("expected block");
        };
        assert_eq!(out.rows(), 2);
        assert!(matches!(out.get(0, 0), Some(Value::Error(e)) if e.code == ErrorCode::Value));
        assert_eq!(
            out.get(1, 0),
            Some(&Value::text(
                "Failed to convert parameter 1: Expected an array with a header row, got number"
            ))
        );
    }

    #[test]
    fn test_record_result_encoding() {
        let ty = point();
        let callable = Callable::new(vec![Type::Number], Type::sequence(ty.into_type()), |args| {
            let n = args[0].as_number().unwrap_or(0.0) as i64;
            Ok(Value::List(
                (0..n)
                    .map(|i| {
                        Value::Record(
                            Record::new("Point")
                                .with("X", Value::Number(i as f64))
                                .with("Y", Value::Null),
                        )
                    })
                    .collect(),
            ))
        });
        let mut desc = FunctionDescriptor::new("Points", callable);
        assert!(try_shim(&mut desc));
        assert!(desc.description.is_empty());
        assert_eq!(desc.returns.description, "array, with header row containing: X,Y");
        let out = desc.callable.call(vec![Value::Number(2.0)]).unwrap();
        assert_eq!(
            out,
            block(vec![
                vec![Value::text("X"), Value::text("Y")],
                vec![Value::Number(0.0), Value::Empty],
                vec![Value::Number(1.0), Value::Empty],
            ])
        );
    }

    #[test]
    fn test_scalar_sequences() {
        let callable = Callable::new(
            vec![Type::sequence(Type::Number)],
            Type::sequence(Type::Number),
            |args| match &args[0] {
                Value::List(items) => Ok(Value::List(items.iter().rev().cloned().collect())),
                _ => Ok(Value::Null),
            },
        );
        let mut desc = FunctionDescriptor::new("ReverseNumbers", callable).marker(Marker::MapArray);
        assert!(try_shim(&mut desc));
        let out = desc
            .callable
            .call(vec![block(vec![vec![Value::Number(1.0), Value::Number(2.0)]])])
            .unwrap();
        assert_eq!(
            out,
            Value::Block(Block::column(vec![Value::Number(2.0), Value::Number(1.0)]))
        );
        let single = desc.callable.call(vec![Value::Number(5.0)]).unwrap();
        assert_eq!(single, Value::Block(Block::column(vec![Value::Number(5.0)])));
    }

    #[test]
    fn test_propertyless_records_left_alone() {
        let empty = ObjectType::new("Opaque").into_type();
        let callable = Callable::new(vec![Type::sequence(empty.clone())], Type::Int, |_| {
            Ok(Value::Int(0))
        });
        let mut unmarked = FunctionDescriptor::new("Unmarked", callable.clone());
        let mut marked = FunctionDescriptor::new("Marked", callable).marker(Marker::MapArray);
        assert!(!try_shim(&mut unmarked));
        assert!(!try_shim(&mut marked));
        assert_eq!(marked.callable.params(), &[Type::sequence(empty)]);
        assert_eq!(
            plan(&marked).unwrap_err(),
            ShimError::NoProperties("Opaque".into())
        );
    }

    #[test]
    fn test_value_slot_help_text() {
        let callable = Callable::new(vec![Type::Bool], Type::Text, |_| Ok(Value::Null));
        let mut desc = FunctionDescriptor::new("Flag", callable)
            .marker(Marker::MapArray)
            .return_description("keeps its description");
        assert!(try_shim(&mut desc));
        assert_eq!(desc.returns.description, "keeps its description");
        assert_eq!(desc.parameters[0].description, "value, of type bool");
        assert_eq!(desc.callable.call(vec![Value::Bool(true)]), Ok(Value::Empty));
    }
}

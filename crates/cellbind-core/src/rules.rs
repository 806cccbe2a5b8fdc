//! Built-in conversion rules.
//!
//! The standard configuration installs, in order:
//!
//! - reference marshalling for objects passed by id
//! - nullable parameters (`T?`)
//! - optional parameters with defaults
//! - enumerations by name
//! - scalar coercion from host values
//!
//! and the matching return-side rules.

use crate::callable::CallError;
use crate::coerce::coerce;
use crate::descriptor::Marker;
use crate::marshal::{CallerScope, ReferenceMarshalCache, ThreadCaller};
use crate::resolver::{ConversionConfig, DEFAULT_MAX_DEPTH};
use crate::rule::{Adapter, ConversionRule};
use crate::types::{ObjectType, Type};
use crate::value::Value;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;

/// Options for the standard rule set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConversionOptions {
    /// Treat empty cells like omitted arguments for nullable and optional parameters.
    pub treat_empty_as_missing: bool,
    pub max_depth: usize,
    /// Object type names always passed by reference.
    pub marshal_by_ref: Vec<String>,
}

impl Default for ConversionOptions {
    fn default() -> Self {
        Self {
            treat_empty_as_missing: false,
            max_depth: DEFAULT_MAX_DEPTH,
            marshal_by_ref: Vec::new(),
        }
    }
}

/// Where by-reference objects live and who is asking for them.
#[derive(Clone)]
pub struct Marshalling {
    pub cache: Arc<ReferenceMarshalCache>,
    pub scope: Arc<dyn CallerScope>,
}

impl Marshalling {
    pub fn new(cache: Arc<ReferenceMarshalCache>, scope: Arc<dyn CallerScope>) -> Self {
        Self { cache, scope }
    }

    /// Marshalling keyed by the caller set with [`ThreadCaller::enter`].
    pub fn per_thread(cache: Arc<ReferenceMarshalCache>) -> Self {
        Self::new(cache, Arc::new(ThreadCaller))
    }
}

impl ConversionConfig {
    /// The built-in rules, with by-reference marshalling when `marshalling` is given.
    pub fn standard(options: &ConversionOptions, marshalling: Option<&Marshalling>) -> Self {
        let mut config = ConversionConfig::new().max_depth(options.max_depth);
        let by_ref: Arc<HashSet<String>> = Arc::new(options.marshal_by_ref.iter().cloned().collect());
        if let Some(m) = marshalling {
            config = config
                .parameter_rule(reference_parameter(m.clone(), Arc::clone(&by_ref)))
                .return_rule(reference_return(m.clone(), by_ref));
        }
        config
            .parameter_rule(nullable_parameter(options.treat_empty_as_missing))
            .parameter_rule(optional_parameter(options.treat_empty_as_missing))
            .parameter_rule(enum_parameter())
            .parameter_rule(scalar_parameter())
            .return_rule(optional_return())
            .return_rule(enum_return())
            .return_rule(scalar_return())
    }
}

fn is_absent(value: &Value, treat_empty_as_missing: bool) -> bool {
    match value {
        Value::Missing => true,
        Value::Empty => treat_empty_as_missing,
        _ => false,
    }
}

fn passes_by_ref(ty: &ObjectType, by_ref: &HashSet<String>, marker: bool) -> bool {
    marker
        || ty.marshal_by_ref
        || by_ref.contains(&ty.name)
        || ty.interop_id.as_ref().is_some_and(|id| by_ref.contains(id))
}

/// Object ids from the host are looked up in the marshal cache.
pub fn reference_parameter(marshalling: Marshalling, by_ref: Arc<HashSet<String>>) -> ConversionRule {
    ConversionRule::new("reference-parameter", move |ty, markers| {
        let object = ty.as_object()?;
        let marked = markers.has(|m| matches!(m, Marker::MarshalByRef));
        if !passes_by_ref(object, &by_ref, marked) {
            return None;
        }
        markers.claim(|m| matches!(m, Marker::MarshalByRef));
        let cache = Arc::clone(&marshalling.cache);
        let object = Arc::clone(object);
        Some(Adapter::new("reference-parameter", Type::Text, ty.clone(), move |v| {
            match v {
                Value::Text(id) => Ok(cache.lookup_as(&id, &object)?),
                Value::Error(e) => Err(e.into()),
                other => Err(CallError::value(format!(
                    "Expected an object id for {}, got {}",
                    object.name,
                    other.kind()
                ))),
            }
        })
        .terminal())
    })
}

/// Returned objects are stored under a fresh id owned by the calling context.
pub fn reference_return(marshalling: Marshalling, by_ref: Arc<HashSet<String>>) -> ConversionRule {
    ConversionRule::new("reference-return", move |ty, markers| {
        let object = ty.as_object()?;
        let marked = markers.has(|m| matches!(m, Marker::MarshalByRef));
        if !passes_by_ref(object, &by_ref, marked) {
            return None;
        }
        markers.claim(|m| matches!(m, Marker::MarshalByRef));
        let m = marshalling.clone();
        let declared = object.name.clone();
        Some(Adapter::new("reference-return", ty.clone(), Type::Text, move |v| {
            if matches!(v, Value::Null | Value::Missing | Value::Empty) {
                return Ok(Value::Empty);
            }
            if matches!(v, Value::Error(_)) {
                return Ok(v);
            }
            let type_name = match &v {
                Value::Record(r) => r.type_name.clone(),
                Value::Handle(h) => h.type_name().to_string(),
                _ => declared.clone(),
            };
            m.cache.enter_context(&m.scope.current());
            Ok(Value::Text(m.cache.store(&type_name, v)))
        })
        .terminal())
    })
}

/// `T?` parameters: an absent argument becomes null.
pub fn nullable_parameter(treat_empty_as_missing: bool) -> ConversionRule {
    ConversionRule::new("nullable-parameter", move |ty, _| {
        let Type::Optional(inner) = ty else {
            return None;
        };
        let inner = (**inner).clone();
        Some(Adapter::new("nullable-parameter", Type::Any, ty.clone(), move |v| {
            if is_absent(&v, treat_empty_as_missing) {
                Ok(Value::Null)
            } else {
                coerce(v, &inner)
            }
        }))
    })
}

/// Parameters marked optional: an absent argument takes the default.
///
/// Consumes the `Optional` and `DefaultValue` markers.
pub fn optional_parameter(treat_empty_as_missing: bool) -> ConversionRule {
    ConversionRule::new("optional-parameter", move |ty, markers| {
        if !markers.has(|m| matches!(m, Marker::Optional)) {
            return None;
        }
        let claimed = markers.claim(|m| matches!(m, Marker::Optional | Marker::DefaultValue(_)));
        let default = claimed
            .into_iter()
            .find_map(|m| match m {
                Marker::DefaultValue(v) => Some(v),
                _ => None,
            })
            .unwrap_or_else(|| ty.default_value());
        let target = ty.clone();
        Some(Adapter::new("optional-parameter", Type::Any, ty.clone(), move |v| {
            if is_absent(&v, treat_empty_as_missing) {
                coerce(default.clone(), &target)
            } else {
                coerce(v, &target)
            }
        }))
    })
}

/// Enumerations are passed as variant names.
pub fn enum_parameter() -> ConversionRule {
    ConversionRule::new("enum-parameter", |ty, _| {
        let Type::Enum(e) = ty else {
            return None;
        };
        let e = Arc::clone(e);
        Some(Adapter::new("enum-parameter", Type::Text, ty.clone(), move |v| match v {
            Value::Text(s) => e.parse(&s).map(Value::Enum),
            other => coerce(other, &Type::Enum(Arc::clone(&e))),
        }))
    })
}

/// Scalars not native to the host, and host scalars received as arbitrary values.
pub fn scalar_parameter() -> ConversionRule {
    ConversionRule::new("scalar-parameter", |ty, _| {
        if !matches!(
            ty,
            Type::Number | Type::Int | Type::Long | Type::Bool | Type::Text | Type::DateTime
        ) {
            return None;
        }
        let target = ty.clone();
        Some(Adapter::new("scalar-parameter", Type::Any, ty.clone(), move |v| {
            coerce(v, &target)
        }))
    })
}

/// `T?` results: null becomes an empty cell.
pub fn optional_return() -> ConversionRule {
    ConversionRule::new("optional-return", |ty, _| {
        let Type::Optional(inner) = ty else {
            return None;
        };
        Some(Adapter::new("optional-return", ty.clone(), (**inner).clone(), |v| {
            Ok(match v {
                Value::Null => Value::Empty,
                other => other,
            })
        }))
    })
}

/// Enumeration results are returned as variant names.
pub fn enum_return() -> ConversionRule {
    ConversionRule::new("enum-return", |ty, _| {
        let Type::Enum(_) = ty else {
            return None;
        };
        Some(Adapter::new("enum-return", ty.clone(), Type::Text, |v| {
            Ok(match v {
                Value::Enum(e) => Value::Text(e.variant),
                other => other,
            })
        }))
    })
}

/// Integer results widen to host numbers.
pub fn scalar_return() -> ConversionRule {
    ConversionRule::new("scalar-return", |ty, _| {
        if !matches!(ty, Type::Int | Type::Long) {
            return None;
        }
        Some(Adapter::new("scalar-return", ty.clone(), Type::Number, |v| {
            Ok(match v {
                Value::Int(i) => Value::Number(i as f64),
                other => other,
            })
        }))
    })
}

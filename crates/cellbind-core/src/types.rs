//! Type descriptors for adapted callables.
//!
//! A [`Type`] describes what a parameter or result slot holds. Host-facing
//! kinds (`Any`, `Number`, `Bool`, `Text`, `DateTime`, `Block`) can cross the
//! host boundary directly; everything else needs a conversion chain.

use crate::callable::CallError;
use crate::value::{EnumValue, Record, Value};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// The type of a parameter or return slot.
#[derive(Debug, Clone, PartialEq)]
pub enum Type {
    /// Any host value, passed through untouched.
    Any,
    /// Double-precision number.
    Number,
    /// 32-bit integer.
    Int,
    /// 64-bit integer.
    Long,
    Bool,
    Text,
    DateTime,
    /// Rectangular block of host values.
    Block,
    /// A value that may be absent.
    Optional(Box<Type>),
    /// An ordered sequence of elements.
    Sequence(Box<Type>),
    Enum(Arc<EnumType>),
    Object(Arc<ObjectType>),
}

impl Type {
    pub fn optional(inner: Type) -> Self {
        Type::Optional(Box::new(inner))
    }

    pub fn sequence(element: Type) -> Self {
        Type::Sequence(Box::new(element))
    }

    /// Whether the host can pass or accept this type without conversion.
    pub fn is_host_representable(&self) -> bool {
        matches!(
            self,
            Type::Any | Type::Number | Type::Bool | Type::Text | Type::DateTime | Type::Block
        )
    }

    /// Whether this is a single scalar kind (no sequences, blocks or objects).
    pub fn is_scalar(&self) -> bool {
        match self {
            Type::Any
            | Type::Number
            | Type::Int
            | Type::Long
            | Type::Bool
            | Type::Text
            | Type::DateTime
            | Type::Enum(_) => true,
            Type::Optional(inner) => inner.is_scalar(),
            Type::Block | Type::Sequence(_) | Type::Object(_) => false,
        }
    }

    /// Type equivalence used for rule filters and chain contracts.
    ///
    /// Structural, except that object types also match when they share a
    /// name or an interop alias.
    pub fn equivalent(&self, other: &Type) -> bool {
        match (self, other) {
            (Type::Optional(a), Type::Optional(b)) => a.equivalent(b),
            (Type::Sequence(a), Type::Sequence(b)) => a.equivalent(b),
            (Type::Enum(a), Type::Enum(b)) => a.name == b.name,
            (Type::Object(a), Type::Object(b)) => a.same_identity(b),
            (a, b) => a == b,
        }
    }

    /// The zero value of this type, used for missing arguments and
    /// unmatched record fields.
    pub fn default_value(&self) -> Value {
        match self {
            Type::Number => Value::Number(0.0),
            Type::Int | Type::Long => Value::Int(0),
            Type::Bool => Value::Bool(false),
            Type::Text => Value::Text(String::new()),
            Type::DateTime => Value::DateTime(crate::serial::epoch()),
            Type::Sequence(_) => Value::List(Vec::new()),
            Type::Enum(e) => e
                .variants
                .first()
                .map(|v| Value::Enum(EnumValue::new(&e.name, v)))
                .unwrap_or(Value::Null),
            Type::Any | Type::Block | Type::Optional(_) | Type::Object(_) => Value::Null,
        }
    }

    /// The element type if this is a sequence.
    pub fn element(&self) -> Option<&Type> {
        match self {
            Type::Sequence(inner) => Some(inner),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&Arc<ObjectType>> {
        match self {
            Type::Object(o) => Some(o),
            _ => None,
        }
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Any => write!(f, "any"),
            Type::Number => write!(f, "number"),
            Type::Int => write!(f, "int"),
            Type::Long => write!(f, "long"),
            Type::Bool => write!(f, "bool"),
            Type::Text => write!(f, "text"),
            Type::DateTime => write!(f, "datetime"),
            Type::Block => write!(f, "block"),
            Type::Optional(inner) => write!(f, "{inner}?"),
            Type::Sequence(inner) => write!(f, "sequence<{inner}>"),
            Type::Enum(e) => write!(f, "{}", e.name),
            Type::Object(o) => write!(f, "{}", o.name),
        }
    }
}

/// A closed set of named variants.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EnumType {
    pub name: String,
    pub variants: Vec<String>,
}

impl EnumType {
    pub fn new(name: impl Into<String>, variants: &[&str]) -> Self {
        Self {
            name: name.into(),
            variants: variants.iter().map(|v| v.to_string()).collect(),
        }
    }

    /// Parse a variant name, ignoring surrounding whitespace and case.
    pub fn parse(&self, text: &str) -> Result<EnumValue, CallError> {
        let wanted = text.trim();
        self.variants
            .iter()
            .find(|v| v.eq_ignore_ascii_case(wanted))
            .map(|v| EnumValue::new(&self.name, v))
            .ok_or_else(|| {
                CallError::value(format!(
                    "'{}' is not a valid value for {}. Valid values are: {}",
                    text,
                    self.name,
                    self.variants.join(", ")
                ))
            })
    }

    /// Variant by ordinal position.
    pub fn nth(&self, index: usize) -> Option<EnumValue> {
        self.variants.get(index).map(|v| EnumValue::new(&self.name, v))
    }
}

/// A named, settable attribute of an object type.
#[derive(Debug, Clone, PartialEq)]
pub struct Property {
    pub name: String,
    pub ty: Type,
    /// Whether the property can be assigned after default construction.
    pub settable: bool,
}

impl Property {
    pub fn new(name: impl Into<String>, ty: Type) -> Self {
        Self {
            name: name.into(),
            ty,
            settable: true,
        }
    }

    pub fn read_only(mut self) -> Self {
        self.settable = false;
        self
    }
}

type BuildFn = dyn Fn(Vec<Value>) -> Result<Value, CallError> + Send + Sync;

/// Positional constructor for an object type.
#[derive(Clone)]
pub struct Constructor {
    pub params: Vec<Type>,
    build: Arc<BuildFn>,
}

impl Constructor {
    pub fn new(
        params: Vec<Type>,
        build: impl Fn(Vec<Value>) -> Result<Value, CallError> + Send + Sync + 'static,
    ) -> Self {
        Self {
            params,
            build: Arc::new(build),
        }
    }

    pub fn call(&self, args: Vec<Value>) -> Result<Value, CallError> {
        (self.build)(args)
    }
}

impl fmt::Debug for Constructor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Constructor")
            .field("params", &self.params)
            .finish_non_exhaustive()
    }
}

/// An object (record or opaque reference) type.
#[derive(Debug, Clone)]
pub struct ObjectType {
    pub name: String,
    /// Alternate identity; types sharing an alias are treated as the same.
    pub interop_id: Option<String>,
    pub properties: Vec<Property>,
    pub constructor: Option<Constructor>,
    /// Instances cross the host boundary as reference ids.
    pub marshal_by_ref: bool,
}

impl PartialEq for ObjectType {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
            && self.interop_id == other.interop_id
            && self.properties == other.properties
            && self.marshal_by_ref == other.marshal_by_ref
    }
}

impl ObjectType {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            interop_id: None,
            properties: Vec::new(),
            constructor: None,
            marshal_by_ref: false,
        }
    }

    pub fn property(mut self, property: Property) -> Self {
        self.properties.push(property);
        self
    }

    pub fn constructor(mut self, constructor: Constructor) -> Self {
        self.constructor = Some(constructor);
        self
    }

    pub fn interop_id(mut self, id: impl Into<String>) -> Self {
        self.interop_id = Some(id.into());
        self
    }

    pub fn by_ref(mut self) -> Self {
        self.marshal_by_ref = true;
        self
    }

    pub fn into_type(self) -> Type {
        Type::Object(Arc::new(self))
    }

    fn same_identity(&self, other: &ObjectType) -> bool {
        if self.name == other.name {
            return true;
        }
        matches!((&self.interop_id, &other.interop_id), (Some(a), Some(b)) if a == b)
    }

    /// Whether `name` refers to this type.
    pub fn is_named(&self, name: &str) -> bool {
        self.name == name || self.interop_id.as_deref() == Some(name)
    }

    /// Constructor whose parameter types match the properties in declaration order.
    pub fn positional_constructor(&self) -> Option<&Constructor> {
        self.constructor.as_ref().filter(|c| {
            c.params.len() == self.properties.len()
                && c.params
                    .iter()
                    .zip(&self.properties)
                    .all(|(param, prop)| param.equivalent(&prop.ty))
        })
    }

    /// A record with every property at its default value.
    pub fn default_record(&self) -> Record {
        let mut record = Record::new(&self.name);
        for prop in &self.properties {
            record.set(&prop.name, prop.ty.default_value());
        }
        record
    }

    /// Build an instance from property values given in declaration order.
    ///
    /// Tries the positional constructor first. When there is none, or it
    /// fails, starts from the default record and assigns each settable
    /// property.
    pub fn construct(&self, values: Vec<Value>) -> Result<Value, CallError> {
        if let Some(ctor) = self.positional_constructor() {
            match ctor.call(values.clone()) {
                Ok(value) => return Ok(value),
                Err(e) => debug!(ty = %self.name, "constructor failed, using setters: {e}"),
            }
        }
        let mut record = self.default_record();
        for (prop, value) in self.properties.iter().zip(values) {
            if prop.settable {
                record.set(&prop.name, value);
            }
        }
        Ok(Value::Record(record))
    }
}

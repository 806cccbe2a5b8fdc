//! Function descriptors: a callable plus the metadata the host registers.

use crate::callable::Callable;
use crate::value::Value;
use thiserror::Error;

/// Annotation on a function, parameter or return slot.
#[derive(Debug, Clone, PartialEq)]
pub enum Marker {
    /// The argument may be omitted.
    Optional,
    /// Value used when an optional argument is omitted.
    DefaultValue(Value),
    /// Pass instances across the host boundary as reference ids.
    MarshalByRef,
    /// Shim record sequences to and from header-row blocks.
    MapArray,
    /// Free-form tag read by handler selectors.
    Custom(String),
}

/// Ordered marker list.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Markers(Vec<Marker>);

impl Markers {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    pub fn push(&mut self, marker: Marker) {
        self.0.push(marker);
    }

    pub fn iter(&self) -> impl Iterator<Item = &Marker> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn has(&self, pred: impl Fn(&Marker) -> bool) -> bool {
        self.0.iter().any(pred)
    }

    pub fn has_custom(&self, tag: &str) -> bool {
        self.has(|m| matches!(m, Marker::Custom(t) if t == tag))
    }

    /// Remove and return every marker matching `pred`.
    pub fn claim(&mut self, pred: impl Fn(&Marker) -> bool) -> Vec<Marker> {
        let (claimed, kept): (Vec<Marker>, Vec<Marker>) =
            std::mem::take(&mut self.0).into_iter().partition(|m| pred(m));
        self.0 = kept;
        claimed
    }
}

impl FromIterator<Marker> for Markers {
    fn from_iter<I: IntoIterator<Item = Marker>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

#[derive(Debug, Clone, Default)]
pub struct ParameterDescriptor {
    pub name: String,
    pub description: String,
    pub markers: Markers,
}

impl ParameterDescriptor {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn marker(mut self, marker: Marker) -> Self {
        self.markers.push(marker);
        self
    }
}

#[derive(Debug, Clone, Default)]
pub struct ReturnDescriptor {
    pub description: String,
    pub markers: Markers,
}

#[derive(Debug, Error, PartialEq)]
pub enum DescriptorError {
    #[error("function '{name}' declares {declared} parameters but its callable takes {arity}")]
    ArityMismatch {
        name: String,
        declared: usize,
        arity: usize,
    },
    #[error("function has no name")]
    Unnamed,
}

/// A function as registered with the host.
#[derive(Debug, Clone)]
pub struct FunctionDescriptor {
    pub name: String,
    pub description: String,
    pub category: Option<String>,
    pub callable: Callable,
    pub parameters: Vec<ParameterDescriptor>,
    pub returns: ReturnDescriptor,
    pub markers: Markers,
}

impl FunctionDescriptor {
    /// Describe `callable` with default parameter names `arg1`, `arg2`, ...
    pub fn new(name: impl Into<String>, callable: Callable) -> Self {
        let parameters = (1..=callable.arity())
            .map(|i| ParameterDescriptor::new(format!("arg{i}")))
            .collect();
        Self {
            name: name.into(),
            description: String::new(),
            category: None,
            callable,
            parameters,
            returns: ReturnDescriptor::default(),
            markers: Markers::new(),
        }
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    pub fn marker(mut self, marker: Marker) -> Self {
        self.markers.push(marker);
        self
    }

    /// Replace the descriptor of parameter `index`.
    pub fn param(mut self, index: usize, param: ParameterDescriptor) -> Self {
        if let Some(slot) = self.parameters.get_mut(index) {
            *slot = param;
        }
        self
    }

    pub fn param_marker(mut self, index: usize, marker: Marker) -> Self {
        if let Some(slot) = self.parameters.get_mut(index) {
            slot.markers.push(marker);
        }
        self
    }

    pub fn return_marker(mut self, marker: Marker) -> Self {
        self.returns.markers.push(marker);
        self
    }

    pub fn return_description(mut self, description: impl Into<String>) -> Self {
        self.returns.description = description.into();
        self
    }

    /// Check that parameter metadata lines up with the callable.
    pub fn validate(&self) -> Result<(), DescriptorError> {
        if self.name.trim().is_empty() {
            return Err(DescriptorError::Unnamed);
        }
        if self.parameters.len() != self.callable.arity() {
            return Err(DescriptorError::ArityMismatch {
                name: self.name.clone(),
                declared: self.parameters.len(),
                arity: self.callable.arity(),
            });
        }
        Ok(())
    }
}

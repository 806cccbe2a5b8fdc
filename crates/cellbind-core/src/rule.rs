//! Conversion rules and the adapters they produce.

use crate::callable::CallError;
use crate::descriptor::Markers;
use crate::types::Type;
use crate::value::Value;
use std::fmt;
use std::sync::Arc;

type AdaptFn = dyn Fn(Value) -> Result<Value, CallError> + Send + Sync;

/// A single conversion step from `input` to `output`.
#[derive(Clone)]
pub struct Adapter {
    pub name: String,
    pub input: Type,
    pub output: Type,
    /// Ends the chain: no further rules run past this adapter.
    pub terminal: bool,
    apply: Arc<AdaptFn>,
}

impl Adapter {
    pub fn new(
        name: impl Into<String>,
        input: Type,
        output: Type,
        apply: impl Fn(Value) -> Result<Value, CallError> + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            input,
            output,
            terminal: false,
            apply: Arc::new(apply),
        }
    }

    /// Mark this adapter as the last step of its chain.
    pub fn terminal(mut self) -> Self {
        self.terminal = true;
        self
    }

    pub fn apply(&self, value: Value) -> Result<Value, CallError> {
        (self.apply)(value)
    }
}

impl fmt::Debug for Adapter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Adapter({}: {} -> {})", self.name, self.input, self.output)
    }
}

type RuleFn = dyn Fn(&Type, &mut Markers) -> Option<Adapter> + Send + Sync;

/// Produces an adapter for a type, or declines.
///
/// Rules may consume markers from the slot they are resolving, so that a
/// marker is only acted on once per chain.
#[derive(Clone)]
pub struct ConversionRule {
    pub name: String,
    /// Only consulted for types equivalent to this one.
    pub filter: Option<Type>,
    rule: Arc<RuleFn>,
}

impl ConversionRule {
    /// A rule consulted for every type.
    pub fn new(
        name: impl Into<String>,
        rule: impl Fn(&Type, &mut Markers) -> Option<Adapter> + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            filter: None,
            rule: Arc::new(rule),
        }
    }

    /// A rule consulted only for types equivalent to `ty`.
    pub fn for_type(
        name: impl Into<String>,
        ty: Type,
        rule: impl Fn(&Type, &mut Markers) -> Option<Adapter> + Send + Sync + 'static,
    ) -> Self {
        Self {
            filter: Some(ty),
            ..Self::new(name, rule)
        }
    }

    /// Parameter rule: accept `from` from the host and produce `to`.
    pub fn parameter(
        name: impl Into<String>,
        from: Type,
        to: Type,
        convert: impl Fn(Value) -> Result<Value, CallError> + Send + Sync + 'static,
    ) -> Self {
        let name = name.into();
        let adapter = Adapter::new(name.clone(), from, to.clone(), convert);
        Self::for_type(name, to, move |_, _| Some(adapter.clone()))
    }

    /// Return rule: accept `from` from the function and produce `to`.
    pub fn returning(
        name: impl Into<String>,
        from: Type,
        to: Type,
        convert: impl Fn(Value) -> Result<Value, CallError> + Send + Sync + 'static,
    ) -> Self {
        let name = name.into();
        let adapter = Adapter::new(name.clone(), from.clone(), to, convert);
        Self::for_type(name, from, move |_, _| Some(adapter.clone()))
    }

    pub fn matches(&self, ty: &Type) -> bool {
        self.filter.as_ref().is_none_or(|f| f.equivalent(ty))
    }

    pub fn apply(&self, ty: &Type, markers: &mut Markers) -> Option<Adapter> {
        (self.rule)(ty, markers)
    }
}

impl fmt::Debug for ConversionRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.filter {
            Some(ty) => write!(f, "ConversionRule({} for {ty})", self.name),
            None => write!(f, "ConversionRule({})", self.name),
        }
    }
}

/// Ordered collection of rules for one direction.
#[derive(Debug, Clone, Default)]
pub struct RuleSet {
    rules: Vec<ConversionRule>,
}

impl RuleSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, rule: ConversionRule) {
        self.rules.push(rule);
    }

    pub fn with(mut self, rule: ConversionRule) -> Self {
        self.push(rule);
        self
    }

    pub fn iter(&self) -> impl Iterator<Item = &ConversionRule> {
        self.rules.iter()
    }

    pub fn get(&self, index: usize) -> Option<&ConversionRule> {
        self.rules.get(index)
    }

    /// Rules to try for `ty`: filtered matches first, then unfiltered rules,
    /// each group in registration order. Yields rule indices.
    pub fn candidates<'a>(&'a self, ty: &'a Type) -> impl Iterator<Item = usize> + 'a {
        let filtered = self
            .rules
            .iter()
            .enumerate()
            .filter(move |(_, r)| r.filter.is_some() && r.matches(ty));
        let unfiltered = self.rules.iter().enumerate().filter(|(_, r)| r.filter.is_none());
        filtered.chain(unfiltered).map(|(i, _)| i)
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

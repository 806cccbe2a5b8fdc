//! Conversion resolution: build adapter chains for parameter and return slots.
//!
//! Starting from a slot's declared type, the resolver repeatedly asks the
//! rule set for an adapter that bridges one step closer to the host. Each
//! rule contributes at most once per chain, which keeps resolution finite
//! even when rules could otherwise cycle.

use crate::callable::{CallError, Callable};
use crate::descriptor::{FunctionDescriptor, Markers};
use crate::rule::{Adapter, ConversionRule, RuleSet};
use crate::types::Type;
use crate::value::Value;
use thiserror::Error;
use tracing::{debug, trace};

/// Default bound on chain length.
pub const DEFAULT_MAX_DEPTH: usize = 16;

/// Which side of the call a chain adapts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Host value in, declared parameter type out.
    Parameter,
    /// Declared return type in, host value out.
    Return,
}

#[derive(Debug, Error, PartialEq)]
pub enum ResolveError {
    #[error("rule '{rule}' does not fit the chain: expected {expected}, got {found}")]
    ContractViolation {
        rule: String,
        expected: Type,
        found: Type,
    },
    #[error("conversion chain for {ty} exceeds {limit} steps")]
    DepthExceeded { ty: Type, limit: usize },
}

/// A resolved, non-empty sequence of adapters.
#[derive(Debug, Clone)]
pub struct ConversionChain {
    direction: Direction,
    /// Adapters in discovery order, starting at the declared type.
    adapters: Vec<Adapter>,
    outer: Type,
}

impl ConversionChain {
    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn adapters(&self) -> &[Adapter] {
        &self.adapters
    }

    /// The host-facing end of the chain.
    pub fn outer(&self) -> &Type {
        &self.outer
    }

    pub fn len(&self) -> usize {
        self.adapters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.adapters.is_empty()
    }

    /// Run a value through the chain.
    ///
    /// Parameter chains are composed outside-in: the last adapter found
    /// receives the host value. Return chains run in discovery order.
    pub fn apply(&self, value: Value) -> Result<Value, CallError> {
        match self.direction {
            Direction::Parameter => self.adapters.iter().rev().try_fold(value, |v, a| a.apply(v)),
            Direction::Return => self.adapters.iter().try_fold(value, |v, a| a.apply(v)),
        }
    }
}

/// Rules for both directions plus the chain length bound.
#[derive(Debug, Clone)]
pub struct ConversionConfig {
    pub parameters: RuleSet,
    pub returns: RuleSet,
    pub max_depth: usize,
}

impl Default for ConversionConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl ConversionConfig {
    /// Empty configuration: no rules, default depth.
    pub fn new() -> Self {
        Self {
            parameters: RuleSet::new(),
            returns: RuleSet::new(),
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }

    pub fn max_depth(mut self, depth: usize) -> Self {
        self.max_depth = depth;
        self
    }

    pub fn parameter_rule(mut self, rule: ConversionRule) -> Self {
        self.parameters.push(rule);
        self
    }

    pub fn return_rule(mut self, rule: ConversionRule) -> Self {
        self.returns.push(rule);
        self
    }

    /// Resolve the chain for one slot.
    ///
    /// Returns `Ok(None)` when no rule applies and the slot passes through
    /// unchanged. Rules may consume `markers`.
    pub fn resolve(
        &self,
        direction: Direction,
        ty: &Type,
        markers: &mut Markers,
    ) -> Result<Option<ConversionChain>, ResolveError> {
        let rules = match direction {
            Direction::Parameter => &self.parameters,
            Direction::Return => &self.returns,
        };
        let mut used = vec![false; rules.len()];
        let mut adapters: Vec<Adapter> = Vec::new();
        let mut current = ty.clone();

        loop {
            let found = rules
                .candidates(&current)
                .filter(|&i| !used[i])
                .find_map(|i| {
                    let rule = rules.get(i)?;
                    rule.apply(&current, markers).map(|a| (i, rule, a))
                });
            let Some((index, rule, adapter)) = found else {
                break;
            };
            if adapters.len() == self.max_depth {
                return Err(ResolveError::DepthExceeded {
                    ty: ty.clone(),
                    limit: self.max_depth,
                });
            }
            let (contract, next) = match direction {
                Direction::Parameter => (&adapter.output, &adapter.input),
                Direction::Return => (&adapter.input, &adapter.output),
            };
            if !contract.equivalent(&current) {
                return Err(ResolveError::ContractViolation {
                    rule: rule.name.clone(),
                    expected: current,
                    found: contract.clone(),
                });
            }
            trace!(rule = %rule.name, from = %current, to = %next, "conversion step");
            current = next.clone();
            used[index] = true;
            let terminal = adapter.terminal;
            adapters.push(adapter);
            if terminal {
                break;
            }
        }

        if adapters.is_empty() {
            return Ok(None);
        }
        Ok(Some(ConversionChain {
            direction,
            adapters,
            outer: current,
        }))
    }
}

/// Rewrite a descriptor so every slot is converted by its resolved chain.
///
/// Returns `false` when no slot needed conversion. Parameter and return
/// markers may be consumed by the rules that acted on them.
pub fn convert_function(
    config: &ConversionConfig,
    descriptor: &mut FunctionDescriptor,
) -> Result<bool, ResolveError> {
    let target = descriptor.callable.clone();
    let mut param_chains = Vec::with_capacity(target.arity());
    for (ty, param) in target.params().iter().zip(descriptor.parameters.iter_mut()) {
        param_chains.push(config.resolve(Direction::Parameter, ty, &mut param.markers)?);
    }
    let return_chain = config.resolve(
        Direction::Return,
        target.returns(),
        &mut descriptor.returns.markers,
    )?;

    if return_chain.is_none() && param_chains.iter().all(Option::is_none) {
        return Ok(false);
    }

    let params: Vec<Type> = param_chains
        .iter()
        .zip(target.params())
        .map(|(chain, ty)| chain.as_ref().map_or_else(|| ty.clone(), |c| c.outer().clone()))
        .collect();
    let returns = return_chain
        .as_ref()
        .map_or_else(|| target.returns().clone(), |c| c.outer().clone());
    debug!(
        function = %descriptor.name,
        converted = param_chains.iter().filter(|c| c.is_some()).count(),
        returns = %returns,
        "applied parameter conversions"
    );

    descriptor.callable = Callable::new(params, returns, move |args| {
        let args = args
            .into_iter()
            .zip(&param_chains)
            .map(|(arg, chain)| match chain {
                Some(chain) => chain.apply(arg),
                None => Ok(arg),
            })
            .collect::<Result<Vec<_>, _>>()?;
        let result = target.call(args)?;
        match &return_chain {
            Some(chain) => chain.apply(result),
            None => Ok(result),
        }
    });
    Ok(true)
}

//! Registry of adapted functions.

use crate::callable::CallError;
use crate::descriptor::FunctionDescriptor;
use crate::marshal::{ContextKey, ThreadCaller};
use crate::pipeline::{Pipeline, PipelineError};
use crate::value::Value;
use indexmap::IndexMap;
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum RegistryError {
    #[error("unknown function: {0}")]
    NotFound(String),

    #[error(transparent)]
    Call(#[from] CallError),
}

/// One invocation in a batch.
#[derive(Debug, Clone)]
pub struct Invocation {
    pub function: String,
    pub caller: ContextKey,
    pub args: Vec<Value>,
}

impl Invocation {
    pub fn new(function: impl Into<String>, caller: ContextKey, args: Vec<Value>) -> Self {
        Self {
            function: function.into(),
            caller,
            args,
        }
    }
}

/// Registered functions, looked up by name without regard to case.
///
/// Registration order is preserved.
#[derive(Debug, Clone, Default)]
pub struct FunctionRegistry {
    functions: IndexMap<String, FunctionDescriptor>,
}

impl FunctionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `descriptors` through `pipeline` and register the survivors.
    ///
    /// Returns the failures; they do not prevent other registrations.
    pub fn register_with(
        &mut self,
        pipeline: &Pipeline,
        descriptors: Vec<FunctionDescriptor>,
    ) -> Vec<PipelineError> {
        let mut failures = Vec::new();
        for result in pipeline.run(descriptors) {
            match result {
                Ok(descriptor) => self.register(descriptor),
                Err(e) => failures.push(e),
            }
        }
        failures
    }

    /// Register a descriptor, replacing any function with the same name.
    pub fn register(&mut self, descriptor: FunctionDescriptor) {
        self.functions
            .insert(descriptor.name.to_lowercase(), descriptor);
    }

    pub fn get(&self, name: &str) -> Option<&FunctionDescriptor> {
        self.functions.get(&name.to_lowercase())
    }

    pub fn functions(&self) -> impl Iterator<Item = &FunctionDescriptor> {
        self.functions.values()
    }

    pub fn len(&self) -> usize {
        self.functions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }

    /// Invoke a function as a detached caller.
    pub fn invoke(&self, name: &str, args: Vec<Value>) -> Result<Value, RegistryError> {
        self.invoke_as(ContextKey::Detached, name, args)
    }

    /// Invoke a function on behalf of `caller`.
    pub fn invoke_as(
        &self,
        caller: ContextKey,
        name: &str,
        args: Vec<Value>,
    ) -> Result<Value, RegistryError> {
        let descriptor = self
            .get(name)
            .ok_or_else(|| RegistryError::NotFound(name.to_string()))?;
        ThreadCaller::enter(caller, || descriptor.callable.call(args)).map_err(RegistryError::from)
    }

    /// Run a batch of invocations in order.
    pub fn invoke_batch(&self, batch: Vec<Invocation>) -> Vec<Result<Value, RegistryError>> {
        batch
            .into_iter()
            .map(|inv| self.invoke_as(inv.caller, &inv.function, inv.args))
            .collect()
    }

    /// Run a batch of invocations across the rayon pool.
    ///
    /// Results are returned in batch order.
    #[cfg(feature = "parallel")]
    pub fn invoke_parallel(&self, batch: Vec<Invocation>) -> Vec<Result<Value, RegistryError>> {
        use rayon::prelude::*;

        batch
            .into_par_iter()
            .map(|inv| self.invoke_as(inv.caller, &inv.function, inv.args))
            .collect()
    }
}

//! Type-erased callables with a declared signature.

use crate::types::Type;
use crate::value::{ErrorCode, HostError, Value};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Error raised by an invocation.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{message}")]
pub struct CallError {
    pub code: ErrorCode,
    pub message: String,
}

impl CallError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// A `#VALUE!` error: the most common failure for bad arguments.
    pub fn value(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Value, message)
    }

    pub fn into_host(self) -> HostError {
        HostError::new(self.code, self.message)
    }

    /// Prefix the message, keeping the code.
    pub fn context(self, prefix: impl fmt::Display) -> Self {
        Self {
            code: self.code,
            message: format!("{prefix}: {}", self.message),
        }
    }
}

impl From<HostError> for CallError {
    fn from(e: HostError) -> Self {
        Self::new(e.code, e.message)
    }
}

type InvokeFn = dyn Fn(Vec<Value>) -> Result<Value, CallError> + Send + Sync;

/// A function with a declared signature.
///
/// Cloning is cheap; the body is shared.
#[derive(Clone)]
pub struct Callable {
    params: Vec<Type>,
    returns: Type,
    invoke: Arc<InvokeFn>,
}

impl Callable {
    pub fn new(
        params: Vec<Type>,
        returns: Type,
        invoke: impl Fn(Vec<Value>) -> Result<Value, CallError> + Send + Sync + 'static,
    ) -> Self {
        Self {
            params,
            returns,
            invoke: Arc::new(invoke),
        }
    }

    pub fn params(&self) -> &[Type] {
        &self.params
    }

    pub fn returns(&self) -> &Type {
        &self.returns
    }

    pub fn arity(&self) -> usize {
        self.params.len()
    }

    /// Invoke with exactly `arity()` arguments.
    pub fn call(&self, args: Vec<Value>) -> Result<Value, CallError> {
        if args.len() != self.params.len() {
            return Err(CallError::value(format!(
                "expected {} arguments, received {}",
                self.params.len(),
                args.len()
            )));
        }
        (self.invoke)(args)
    }
}

impl fmt::Debug for Callable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let params: Vec<String> = self.params.iter().map(|p| p.to_string()).collect();
        write!(f, "Callable(({}) -> {})", params.join(", "), self.returns)
    }
}

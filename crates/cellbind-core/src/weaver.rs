//! Execution handlers woven around a callable.
//!
//! Each handler becomes one layer. A layer runs `on_entry`, the inner
//! callable and `on_success`; any failure goes to `on_exception`, whose
//! flow directive decides what escapes. `on_exit` always runs last, before
//! the layer's outcome reaches the next layer out.

use crate::callable::{CallError, Callable};
use crate::descriptor::FunctionDescriptor;
use crate::value::Value;
use std::any::Any;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// Per-layer scratch value set at weave time or by the handler itself.
pub type Tag = Arc<dyn Any + Send + Sync>;

/// What a layer does after a handler callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FlowDirective {
    /// Proceed normally; on failure, re-raise the original error.
    #[default]
    Default,
    /// Skip the inner call (from `on_entry`) or swallow the error (from
    /// `on_exception`) and return the current return value.
    Return,
    /// Raise the error in the context's exception slot.
    ThrowException,
    /// Re-raise the original error.
    RethrowException,
}

/// Mutable state shared by one layer's callbacks for a single invocation.
pub struct HandlerContext {
    arguments: Vec<Value>,
    pub return_value: Value,
    pub exception: Option<CallError>,
    pub flow: FlowDirective,
    pub tag: Option<Tag>,
}

impl HandlerContext {
    pub fn new(arguments: Vec<Value>, tag: Option<Tag>) -> Self {
        Self {
            arguments,
            return_value: Value::Null,
            exception: None,
            flow: FlowDirective::Default,
            tag,
        }
    }

    pub fn arguments(&self) -> &[Value] {
        &self.arguments
    }

    /// The tag downcast to `T`, if set and of that type.
    pub fn tag_as<T: Any>(&self) -> Option<&T> {
        self.tag.as_ref().and_then(|t| t.downcast_ref::<T>())
    }
}

impl fmt::Debug for HandlerContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerContext")
            .field("arguments", &self.arguments)
            .field("return_value", &self.return_value)
            .field("exception", &self.exception)
            .field("flow", &self.flow)
            .finish_non_exhaustive()
    }
}

/// Callbacks around an invocation. All have no-op defaults.
pub trait ExecutionHandler: Send + Sync {
    fn on_entry(&self, ctx: &mut HandlerContext) -> Result<(), CallError> {
        let _ = ctx;
        Ok(())
    }

    fn on_success(&self, ctx: &mut HandlerContext) -> Result<(), CallError> {
        let _ = ctx;
        Ok(())
    }

    fn on_exception(&self, ctx: &mut HandlerContext) {
        let _ = ctx;
    }

    fn on_exit(&self, ctx: &mut HandlerContext) {
        let _ = ctx;
    }

    /// Initial tag for each invocation's context.
    fn tag(&self) -> Option<Tag> {
        None
    }
}

/// Wrap `callable` in one layer per handler. The first handler is innermost.
pub fn weave(callable: Callable, handlers: Vec<Arc<dyn ExecutionHandler>>) -> Callable {
    handlers.into_iter().fold(callable, wrap)
}

fn wrap(inner: Callable, handler: Arc<dyn ExecutionHandler>) -> Callable {
    let params = inner.params().to_vec();
    let returns = inner.returns().clone();
    Callable::new(params, returns, move |args| {
        invoke_layer(handler.as_ref(), &inner, args)
    })
}

fn invoke_layer(
    handler: &dyn ExecutionHandler,
    inner: &Callable,
    args: Vec<Value>,
) -> Result<Value, CallError> {
    let mut ctx = HandlerContext::new(args.clone(), handler.tag());
    let outcome = match run(handler, inner, args, &mut ctx) {
        Ok(value) => Ok(value),
        Err(error) => recover(handler, &mut ctx, error),
    };
    handler.on_exit(&mut ctx);
    outcome
}

fn run(
    handler: &dyn ExecutionHandler,
    inner: &Callable,
    args: Vec<Value>,
    ctx: &mut HandlerContext,
) -> Result<Value, CallError> {
    handler.on_entry(ctx)?;
    if ctx.flow == FlowDirective::Return {
        return Ok(ctx.return_value.clone());
    }
    ctx.return_value = inner.call(args)?;
    handler.on_success(ctx)?;
    Ok(ctx.return_value.clone())
}

fn recover(
    handler: &dyn ExecutionHandler,
    ctx: &mut HandlerContext,
    error: CallError,
) -> Result<Value, CallError> {
    ctx.exception = Some(error.clone());
    handler.on_exception(ctx);
    match ctx.flow {
        FlowDirective::Return => {
            ctx.exception = None;
            Ok(ctx.return_value.clone())
        }
        FlowDirective::ThrowException => Err(ctx.exception.clone().unwrap_or(error)),
        FlowDirective::Default | FlowDirective::RethrowException => Err(error),
    }
}

type SelectFn = dyn Fn(&FunctionDescriptor) -> Option<Arc<dyn ExecutionHandler>> + Send + Sync;

/// Chooses zero or one handler for each function.
#[derive(Clone)]
pub struct HandlerSelector {
    pub name: String,
    select: Arc<SelectFn>,
}

impl HandlerSelector {
    pub fn new(
        name: impl Into<String>,
        select: impl Fn(&FunctionDescriptor) -> Option<Arc<dyn ExecutionHandler>> + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            select: Arc::new(select),
        }
    }

    pub fn select(&self, descriptor: &FunctionDescriptor) -> Option<Arc<dyn ExecutionHandler>> {
        (self.select)(descriptor)
    }
}

impl fmt::Debug for HandlerSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HandlerSelector({})", self.name)
    }
}

/// Ordered handler selectors. The first selector yields the innermost layer.
#[derive(Debug, Clone, Default)]
pub struct HandlerConfig {
    selectors: Vec<HandlerSelector>,
}

impl HandlerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn selector(mut self, selector: HandlerSelector) -> Self {
        self.selectors.push(selector);
        self
    }

    pub fn push(&mut self, selector: HandlerSelector) {
        self.selectors.push(selector);
    }

    pub fn len(&self) -> usize {
        self.selectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.selectors.is_empty()
    }

    /// Weave the selected handlers around the descriptor's callable.
    ///
    /// Returns the number of layers added.
    pub fn apply(&self, descriptor: &mut FunctionDescriptor) -> usize {
        let handlers: Vec<_> = self
            .selectors
            .iter()
            .filter_map(|s| s.select(descriptor))
            .collect();
        let layers = handlers.len();
        if layers > 0 {
            debug!(function = %descriptor.name, layers, "weaving execution handlers");
            descriptor.callable = weave(descriptor.callable.clone(), handlers);
        }
        layers
    }
}

//! Registration pipeline: ordered passes over function descriptors.
//!
//! Each pass rewrites a descriptor in place. Passes run in the order they
//! were added; a typical pipeline shims arrays first, then converts
//! parameters, weaves handlers and finally installs the error boundary.

use crate::boundary;
use crate::descriptor::FunctionDescriptor;
use crate::resolver::{ConversionConfig, ResolveError, convert_function};
use crate::shim;
use crate::weaver::HandlerConfig;
use thiserror::Error;
use tracing::{debug, error, warn};

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("function '{function}': {source}")]
    Conversion {
        function: String,
        #[source]
        source: ResolveError,
    },
}

/// One rewriting step.
pub trait Pass: Send + Sync {
    fn name(&self) -> &str;

    fn apply(&self, descriptor: &mut FunctionDescriptor) -> Result<(), PipelineError>;
}

// ============================================================================
// Built-in Passes
// ============================================================================

/// Resolves and applies parameter and return conversions.
#[derive(Debug, Clone)]
pub struct ConversionPass {
    config: ConversionConfig,
}

impl ConversionPass {
    pub fn new(config: ConversionConfig) -> Self {
        Self { config }
    }
}

impl Pass for ConversionPass {
    fn name(&self) -> &str {
        "parameter-conversions"
    }

    fn apply(&self, descriptor: &mut FunctionDescriptor) -> Result<(), PipelineError> {
        convert_function(&self.config, descriptor)
            .map(|_| ())
            .map_err(|source| PipelineError::Conversion {
                function: descriptor.name.clone(),
                source,
            })
    }
}

/// Shims record and scalar sequences to blocks.
#[derive(Debug, Clone, Copy, Default)]
pub struct MapArrayPass;

impl Pass for MapArrayPass {
    fn name(&self) -> &str {
        "map-arrays"
    }

    fn apply(&self, descriptor: &mut FunctionDescriptor) -> Result<(), PipelineError> {
        shim::try_shim(descriptor);
        Ok(())
    }
}

/// Weaves the selected execution handlers.
#[derive(Debug, Clone)]
pub struct HandlerPass {
    config: HandlerConfig,
}

impl HandlerPass {
    pub fn new(config: HandlerConfig) -> Self {
        Self { config }
    }
}

impl Pass for HandlerPass {
    fn name(&self) -> &str {
        "execution-handlers"
    }

    fn apply(&self, descriptor: &mut FunctionDescriptor) -> Result<(), PipelineError> {
        self.config.apply(descriptor);
        Ok(())
    }
}

/// Turns errors and panics into host error values.
#[derive(Debug, Clone, Copy, Default)]
pub struct ErrorBoundaryPass;

impl Pass for ErrorBoundaryPass {
    fn name(&self) -> &str {
        "error-boundary"
    }

    fn apply(&self, descriptor: &mut FunctionDescriptor) -> Result<(), PipelineError> {
        descriptor.callable = boundary::guard(&descriptor.name, descriptor.callable.clone());
        Ok(())
    }
}

// ============================================================================
// Pipeline
// ============================================================================

/// Ordered list of passes.
#[derive(Default)]
pub struct Pipeline {
    passes: Vec<Box<dyn Pass>>,
}

impl Pipeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a pass.
    pub fn pass(mut self, pass: impl Pass + 'static) -> Self {
        self.passes.push(Box::new(pass));
        self
    }

    pub fn push(&mut self, pass: Box<dyn Pass>) {
        self.passes.push(pass);
    }

    /// Names of the passes, in order.
    pub fn pass_names(&self) -> Vec<&str> {
        self.passes.iter().map(|p| p.name()).collect()
    }

    /// Run every pass over one descriptor.
    ///
    /// Structurally invalid descriptors are passed through untouched.
    pub fn run_one(&self, mut descriptor: FunctionDescriptor) -> Result<FunctionDescriptor, PipelineError> {
        if let Err(e) = descriptor.validate() {
            warn!(function = %descriptor.name, "skipping registration passes: {e}");
            return Ok(descriptor);
        }
        for pass in &self.passes {
            pass.apply(&mut descriptor)?;
            debug!(function = %descriptor.name, pass = pass.name(), "applied");
        }
        Ok(descriptor)
    }

    /// Run the pipeline over a batch. Failures affect only their own function.
    pub fn run(
        &self,
        descriptors: Vec<FunctionDescriptor>,
    ) -> Vec<Result<FunctionDescriptor, PipelineError>> {
        descriptors
            .into_iter()
            .map(|d| {
                let result = self.run_one(d);
                if let Err(e) = &result {
                    error!("registration failed: {e}");
                }
                result
            })
            .collect()
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("passes", &self.pass_names())
            .finish()
    }
}

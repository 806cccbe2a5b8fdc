//! Cellbind: type-directed function adaptation for spreadsheet-style hosts.
//!
//! Functions are described by a [`FunctionDescriptor`] and run through a
//! [`Pipeline`] of passes before registration. Passes shim record arrays to
//! header-row blocks, resolve parameter and return conversions, weave
//! execution handlers around the call and install an error boundary.

mod boundary;
mod callable;
mod coerce;
mod descriptor;
mod handlers;
mod marshal;
mod pipeline;
mod registry;
mod resolver;
mod rule;
mod rules;
mod serial;
mod shim;
mod spec;
mod types;
mod value;
mod weaver;

pub use boundary::guard;
pub use callable::{CallError, Callable};
pub use coerce::{coerce, parse_datetime};
pub use descriptor::{
    DescriptorError, FunctionDescriptor, Marker, Markers, ParameterDescriptor, ReturnDescriptor,
};
pub use handlers::{CACHE_TAG, CacheHandler, LoggingHandler, TimingHandler, TimingStats};
pub use marshal::{CallerScope, ContextKey, MarshalError, ReferenceMarshalCache, ThreadCaller};
pub use pipeline::{
    ConversionPass, ErrorBoundaryPass, HandlerPass, MapArrayPass, Pass, Pipeline, PipelineError,
};
pub use registry::{FunctionRegistry, Invocation, RegistryError};
pub use resolver::{
    ConversionChain, ConversionConfig, DEFAULT_MAX_DEPTH, Direction, ResolveError, convert_function,
};
pub use rule::{Adapter, ConversionRule, RuleSet};
pub use rules::{
    ConversionOptions, Marshalling, enum_parameter, enum_return, nullable_parameter,
    optional_parameter, optional_return, reference_parameter, reference_return, scalar_parameter,
    scalar_return,
};
pub use serial::{SerialError, epoch, from_serial, to_serial};
pub use shim::{ShimError, ShimPlan, error_block, plan as plan_shim, try_shim};
pub use spec::{DEFAULT_CACHE_CAPACITY, Extensions, HandlerKind, PassKind, PipelineSpec, SpecError};
pub use types::{Constructor, EnumType, ObjectType, Property, Type};
pub use value::{Block, EnumValue, ErrorCode, Handle, HostError, Record, Value};
pub use weaver::{
    ExecutionHandler, FlowDirective, HandlerConfig, HandlerContext, HandlerSelector, Tag, weave,
};

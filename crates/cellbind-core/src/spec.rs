//! Declarative pipeline configuration.
//!
//! A pipeline spec names the passes to run, the options for the standard
//! conversion rules and the stock handlers to weave. Specs load from JSON,
//! YAML or TOML:
//!
//! ```yaml
//! passes: [map-arrays, parameter-conversions, execution-handlers, error-boundary]
//! conversions:
//!   treat_empty_as_missing: true
//!   marshal_by_ref: [Calc]
//! handlers: [timing, cache]
//! ```

use crate::handlers::{CacheHandler, LoggingHandler, TimingHandler};
use crate::pipeline::{ConversionPass, ErrorBoundaryPass, HandlerPass, MapArrayPass, Pipeline};
use crate::resolver::ConversionConfig;
use crate::rule::ConversionRule;
use crate::rules::{ConversionOptions, Marshalling};
use crate::weaver::{HandlerConfig, HandlerSelector};
use serde::{Deserialize, Serialize};

/// Default capacity of each cache handler.
pub const DEFAULT_CACHE_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PassKind {
    ParameterConversions,
    MapArrays,
    ExecutionHandlers,
    ErrorBoundary,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum HandlerKind {
    Logging,
    Timing,
    Cache,
}

fn default_passes() -> Vec<PassKind> {
    vec![
        PassKind::MapArrays,
        PassKind::ParameterConversions,
        PassKind::ExecutionHandlers,
        PassKind::ErrorBoundary,
    ]
}

fn default_cache_capacity() -> usize {
    DEFAULT_CACHE_CAPACITY
}

/// A pipeline definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineSpec {
    /// Passes in execution order.
    #[serde(default = "default_passes")]
    pub passes: Vec<PassKind>,

    /// Stock handlers, innermost first.
    #[serde(default)]
    pub handlers: Vec<HandlerKind>,

    #[serde(default = "default_cache_capacity")]
    pub cache_capacity: usize,

    #[serde(default)]
    pub conversions: ConversionOptions,
}

impl Default for PipelineSpec {
    fn default() -> Self {
        Self {
            passes: default_passes(),
            handlers: Vec::new(),
            cache_capacity: DEFAULT_CACHE_CAPACITY,
            conversions: ConversionOptions::default(),
        }
    }
}

/// Code-level additions to a spec: marshalling, custom rules and selectors.
#[derive(Clone, Default)]
pub struct Extensions {
    pub marshalling: Option<Marshalling>,
    pub parameter_rules: Vec<ConversionRule>,
    pub return_rules: Vec<ConversionRule>,
    pub selectors: Vec<HandlerSelector>,
}

impl Extensions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn marshalling(mut self, marshalling: Marshalling) -> Self {
        self.marshalling = Some(marshalling);
        self
    }

    pub fn parameter_rule(mut self, rule: ConversionRule) -> Self {
        self.parameter_rules.push(rule);
        self
    }

    pub fn return_rule(mut self, rule: ConversionRule) -> Self {
        self.return_rules.push(rule);
        self
    }

    /// Add a handler selector, placed outside the spec's stock handlers.
    pub fn selector(mut self, selector: HandlerSelector) -> Self {
        self.selectors.push(selector);
        self
    }
}

impl PipelineSpec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn passes(mut self, passes: Vec<PassKind>) -> Self {
        self.passes = passes;
        self
    }

    pub fn handler(mut self, handler: HandlerKind) -> Self {
        self.handlers.push(handler);
        self
    }

    pub fn conversions(mut self, options: ConversionOptions) -> Self {
        self.conversions = options;
        self
    }

    /// Conversion rules for this spec: custom rules first, then the standard set.
    pub fn conversion_config(&self, extensions: &Extensions) -> ConversionConfig {
        let standard = ConversionConfig::standard(&self.conversions, extensions.marshalling.as_ref());
        let mut config = ConversionConfig::new().max_depth(self.conversions.max_depth);
        for rule in extensions.parameter_rules.iter().chain(standard.parameters.iter()) {
            config.parameters.push(rule.clone());
        }
        for rule in extensions.return_rules.iter().chain(standard.returns.iter()) {
            config.returns.push(rule.clone());
        }
        config
    }

    pub fn handler_config(&self, extensions: &Extensions) -> HandlerConfig {
        let mut config = HandlerConfig::new();
        for kind in &self.handlers {
            config.push(match kind {
                HandlerKind::Logging => LoggingHandler::selector(),
                HandlerKind::Timing => TimingHandler::selector(),
                HandlerKind::Cache => CacheHandler::selector(self.cache_capacity),
            });
        }
        for selector in &extensions.selectors {
            config.push(selector.clone());
        }
        config
    }

    /// Build the pipeline this spec describes.
    pub fn build(&self, extensions: &Extensions) -> Pipeline {
        let mut pipeline = Pipeline::new();
        for kind in &self.passes {
            match kind {
                PassKind::MapArrays => pipeline.push(Box::new(MapArrayPass)),
                PassKind::ParameterConversions => pipeline.push(Box::new(ConversionPass::new(
                    self.conversion_config(extensions),
                ))),
                PassKind::ExecutionHandlers => pipeline.push(Box::new(HandlerPass::new(
                    self.handler_config(extensions),
                ))),
                PassKind::ErrorBoundary => pipeline.push(Box::new(ErrorBoundaryPass)),
            }
        }
        pipeline
    }

    /// Parse a spec from bytes, detecting the format from `path`.
    pub fn from_bytes(data: &[u8], path: Option<&str>) -> Result<Self, SpecError> {
        let format = path
            .and_then(detect_format)
            .unwrap_or_else(|| "yaml".to_string());

        Self::from_bytes_format(data, &format)
    }

    /// Parse a spec from bytes with explicit format.
    pub fn from_bytes_format(data: &[u8], format: &str) -> Result<Self, SpecError> {
        match format {
            "json" => serde_json::from_slice(data).map_err(|e| SpecError::Parse(e.to_string())),
            "yaml" | "yml" => {
                serde_yaml::from_slice(data).map_err(|e| SpecError::Parse(e.to_string()))
            }
            "toml" => {
                let s = std::str::from_utf8(data)
                    .map_err(|e| SpecError::Parse(format!("Invalid UTF-8: {}", e)))?;
                toml::from_str(s).map_err(|e| SpecError::Parse(e.to_string()))
            }
            _ => Err(SpecError::UnsupportedFormat(format.to_string())),
        }
    }

    /// Serialize the spec.
    pub fn to_bytes(&self, format: &str) -> Result<Vec<u8>, SpecError> {
        match format {
            "json" => serde_json::to_vec_pretty(self).map_err(|e| SpecError::Parse(e.to_string())),
            "yaml" | "yml" => serde_yaml::to_string(self)
                .map(|s| s.into_bytes())
                .map_err(|e| SpecError::Parse(e.to_string())),
            "toml" => toml::to_string_pretty(self)
                .map(|s| s.into_bytes())
                .map_err(|e| SpecError::Parse(e.to_string())),
            _ => Err(SpecError::UnsupportedFormat(format.to_string())),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SpecError {
    #[error("failed to parse pipeline spec: {0}")]
    Parse(String),

    #[error("unsupported pipeline spec format: {0}")]
    UnsupportedFormat(String),
}

fn detect_format(path: &str) -> Option<String> {
    let ext = path.rsplit('.').next()?;
    match ext.to_lowercase().as_str() {
        "json" => Some("json".into()),
        "yaml" | "yml" => Some("yaml".into()),
        "toml" => Some("toml".into()),
        _ => None,
    }
}

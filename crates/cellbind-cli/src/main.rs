//! Cellbind CLI - exercise adapted spreadsheet functions from the shell

mod args;
mod catalog;
mod config;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use config::Config;
use indexmap::IndexMap;
use rhi_cellbind_core::{
    ConversionChain, ConversionConfig, ContextKey, Direction, Extensions, FunctionDescriptor,
    FunctionRegistry, HandlerKind, Marshalling, PipelineSpec, ReferenceMarshalCache, Value,
};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::warn;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "cellbind")]
#[command(about = "Adapt and call spreadsheet functions", long_about = None)]
struct Cli {
    /// Pipeline spec file (YAML, TOML, or JSON)
    #[arg(long, global = true)]
    pipeline: Option<PathBuf>,

    /// Log registration and calls
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List registered functions
    List,

    /// Show a function's parameters and host-facing signature
    Describe {
        /// Function name (case-insensitive)
        name: String,
    },

    /// Call a function once
    Call {
        /// Function name (case-insensitive)
        name: String,
        /// Arguments; omitted trailing arguments are passed as missing
        #[arg(allow_hyphen_values = true)]
        args: Vec<String>,
        /// Calling cell, e.g. R1C1
        #[arg(long)]
        caller: Option<String>,
        /// Print the result as JSON
        #[arg(long)]
        json: bool,
    },

    /// Run a script of calls, one per line
    Run {
        /// Script file; lines look like `R1C1: CalcCreate 1 2`
        script: PathBuf,
        /// Run all calls across the thread pool (no cell references allowed)
        #[cfg(feature = "parallel")]
        #[arg(long)]
        parallel: bool,
    },

    /// Print the effective pipeline spec
    Spec {
        /// Output format: yaml, json, or toml
        #[arg(long, default_value = "yaml")]
        format: String,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::load();

    init_logging(cli.verbose || config.defaults.verbose);

    let spec = resolve_spec(
        cli.pipeline.as_deref().or(config.defaults.pipeline.as_deref()),
        config.pipeline,
    )?;

    match cli.command {
        Commands::List => cmd_list(&build_registry(&spec)),
        Commands::Describe { name } => {
            let conversions = spec.conversion_config(&extensions());
            cmd_describe(&build_registry(&spec), &conversions, &name)
        }
        Commands::Call {
            name,
            args,
            caller,
            json,
        } => cmd_call(&build_registry(&spec), &name, &args, caller.as_deref(), json),
        #[cfg(feature = "parallel")]
        Commands::Run { script, parallel } => {
            if parallel {
                cmd_run_parallel(&build_registry(&spec), &script)
            } else {
                cmd_run(&build_registry(&spec), &script)
            }
        }
        #[cfg(not(feature = "parallel"))]
        Commands::Run { script } => cmd_run(&build_registry(&spec), &script),
        Commands::Spec { format } => cmd_spec(&spec, &format),
    }
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

/// Pick the pipeline spec: an explicit file, then the config's inline
/// pipeline, then the built-in default.
fn resolve_spec(path: Option<&Path>, inline: Option<PipelineSpec>) -> Result<PipelineSpec> {
    if let Some(path) = path {
        let data = std::fs::read(path)
            .with_context(|| format!("Failed to read pipeline spec: {}", path.display()))?;
        return PipelineSpec::from_bytes(&data, path.to_str())
            .with_context(|| format!("Invalid pipeline spec: {}", path.display()));
    }
    Ok(inline.unwrap_or_else(|| PipelineSpec::new().handler(HandlerKind::Cache)))
}

fn extensions() -> Extensions {
    let cache = Arc::new(ReferenceMarshalCache::new());
    catalog::extensions(Marshalling::per_thread(cache))
}

fn build_registry(spec: &PipelineSpec) -> FunctionRegistry {
    let pipeline = spec.build(&extensions());

    let mut registry = FunctionRegistry::new();
    for failure in registry.register_with(&pipeline, catalog::descriptors()) {
        warn!("{failure}");
    }
    registry
}

/// Declared signatures, before adaptation.
fn declared() -> IndexMap<String, FunctionDescriptor> {
    catalog::descriptors()
        .into_iter()
        .map(|d| (d.name.to_lowercase(), d))
        .collect()
}

fn signature(descriptor: &FunctionDescriptor) -> String {
    let params: Vec<String> = descriptor
        .parameters
        .iter()
        .zip(descriptor.callable.params())
        .map(|(p, ty)| format!("{}: {ty}", p.name))
        .collect();
    format!(
        "{}({}) -> {}",
        descriptor.name,
        params.join(", "),
        descriptor.callable.returns()
    )
}

fn cmd_list(registry: &FunctionRegistry) -> Result<()> {
    println!("Available functions:\n");

    let declared = declared();
    for descriptor in registry.functions() {
        let shown = declared
            .get(&descriptor.name.to_lowercase())
            .unwrap_or(descriptor);
        match &descriptor.category {
            Some(category) => println!("  {}  [{category}]", signature(shown)),
            None => println!("  {}", signature(shown)),
        }
        if !descriptor.description.is_empty() {
            println!("    {}", descriptor.description);
        }
    }

    println!();
    println!("Total: {} functions", registry.len());
    Ok(())
}

/// Adapter names in the order they run.
fn chain_names(direction: Direction, chain: Option<ConversionChain>) -> String {
    let Some(chain) = chain else {
        return "unchanged".to_string();
    };
    let mut names: Vec<&str> = chain.adapters().iter().map(|a| a.name.as_str()).collect();
    if direction == Direction::Parameter {
        names.reverse();
    }
    names.join(" -> ")
}

fn cmd_describe(
    registry: &FunctionRegistry,
    conversions: &ConversionConfig,
    name: &str,
) -> Result<()> {
    let adapted = registry
        .get(name)
        .with_context(|| format!("Unknown function: {name}"))?;
    let declared = declared();
    let original = declared.get(&name.to_lowercase()).unwrap_or(adapted);

    println!("{}", adapted.name);
    if let Some(category) = &adapted.category {
        println!("  category: {category}");
    }
    if !adapted.description.is_empty() {
        println!("  {}", adapted.description);
    }

    println!();
    println!("Parameters:");
    if adapted.parameters.is_empty() {
        println!("  (none)");
    }
    for (i, param) in adapted.parameters.iter().enumerate() {
        let show = |d: &FunctionDescriptor| {
            d.callable
                .params()
                .get(i)
                .map_or_else(|| "?".to_string(), |t| t.to_string())
        };
        println!(
            "  {}: {} (host: {})",
            param.name,
            show(original),
            show(adapted)
        );
        if let (Some(ty), Some(slot)) =
            (original.callable.params().get(i), original.parameters.get(i))
        {
            let mut markers = slot.markers.clone();
            let chain = conversions.resolve(Direction::Parameter, ty, &mut markers)?;
            println!("      via {}", chain_names(Direction::Parameter, chain));
        }
        if !param.description.is_empty() {
            println!("      {}", param.description);
        }
    }

    println!();
    println!(
        "Returns: {} (host: {})",
        original.callable.returns(),
        adapted.callable.returns()
    );
    let mut markers = original.returns.markers.clone();
    let chain = conversions.resolve(Direction::Return, original.callable.returns(), &mut markers)?;
    println!("  via {}", chain_names(Direction::Return, chain));
    if !adapted.returns.description.is_empty() {
        println!("  {}", adapted.returns.description);
    }
    Ok(())
}

/// Parse arguments and pad omitted trailing ones with `Missing`.
fn call_args(registry: &FunctionRegistry, name: &str, raw: &[String]) -> Result<Vec<Value>> {
    let descriptor = registry
        .get(name)
        .with_context(|| format!("Unknown function: {name}"))?;
    let arity = descriptor.callable.arity();
    if raw.len() > arity {
        bail!(
            "{} takes {} arguments, {} given",
            descriptor.name,
            arity,
            raw.len()
        );
    }
    let mut values: Vec<Value> = raw.iter().map(|a| args::parse_value(a)).collect();
    values.resize(arity, Value::Missing);
    Ok(values)
}

fn cmd_call(
    registry: &FunctionRegistry,
    name: &str,
    raw: &[String],
    caller: Option<&str>,
    json: bool,
) -> Result<()> {
    let values = call_args(registry, name, raw)?;
    let caller = caller.map(args::parse_caller).unwrap_or(ContextKey::Detached);
    let result = registry.invoke_as(caller, name, values)?;
    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        println!("{result}");
    }
    Ok(())
}

/// One parsed script line.
struct ScriptCall {
    line: usize,
    caller: ContextKey,
    name: String,
    args: Vec<String>,
}

fn parse_script(path: &Path) -> Result<Vec<ScriptCall>> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read script: {}", path.display()))?;

    let mut calls = Vec::new();
    for (i, line) in contents.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let mut tokens = args::tokenize(line).into_iter().peekable();
        let caller = match tokens.next_if(|t| t.ends_with(':')) {
            Some(address) => args::parse_caller(address.trim_end_matches(':')),
            None => ContextKey::Detached,
        };
        let name = tokens
            .next()
            .with_context(|| format!("line {}: missing function name", i + 1))?;
        calls.push(ScriptCall {
            line: i + 1,
            caller,
            name,
            args: tokens.collect(),
        });
    }
    Ok(calls)
}

/// Run a script in order. An argument `=R1C1` refers to the result last
/// produced by that caller.
fn cmd_run(registry: &FunctionRegistry, script: &Path) -> Result<()> {
    let mut results: HashMap<ContextKey, Value> = HashMap::new();

    for call in parse_script(script)? {
        let mut values = Vec::with_capacity(call.args.len());
        for arg in &call.args {
            match arg.strip_prefix('=') {
                Some(address) => {
                    let key = args::parse_caller(address);
                    let value = results.get(&key).cloned().with_context(|| {
                        format!("line {}: no result at {key}", call.line)
                    })?;
                    values.push(value);
                }
                None => values.push(args::parse_value(arg)),
            }
        }
        let arity = registry
            .get(&call.name)
            .map(|d| d.callable.arity())
            .unwrap_or(values.len());
        values.resize(arity.max(values.len()), Value::Missing);

        let result = registry
            .invoke_as(call.caller.clone(), &call.name, values)
            .with_context(|| format!("line {}", call.line))?;
        println!("{}: {result}", call.caller);
        results.insert(call.caller, result);
    }
    Ok(())
}

#[cfg(feature = "parallel")]
fn cmd_run_parallel(registry: &FunctionRegistry, script: &Path) -> Result<()> {
    use rhi_cellbind_core::Invocation;

    let calls = parse_script(script)?;
    let mut batch = Vec::with_capacity(calls.len());
    for call in &calls {
        if let Some(arg) = call.args.iter().find(|a| a.starts_with('=')) {
            bail!("line {}: cell reference {arg} needs sequential run", call.line);
        }
        let values = call_args(registry, &call.name, &call.args)
            .with_context(|| format!("line {}", call.line))?;
        batch.push(Invocation::new(&call.name, call.caller.clone(), values));
    }

    for (call, result) in calls.iter().zip(registry.invoke_parallel(batch)) {
        let result = result.with_context(|| format!("line {}", call.line))?;
        println!("{}: {result}", call.caller);
    }
    Ok(())
}

fn cmd_spec(spec: &PipelineSpec, format: &str) -> Result<()> {
    let bytes = spec.to_bytes(format)?;
    print!("{}", String::from_utf8_lossy(&bytes));
    Ok(())
}

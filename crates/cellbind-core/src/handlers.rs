//! Stock execution handlers.

use crate::callable::CallError;
use crate::descriptor::FunctionDescriptor;
use crate::value::Value;
use crate::weaver::{ExecutionHandler, FlowDirective, HandlerContext, HandlerSelector, Tag};
use indexmap::IndexMap;
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Marker tag that opts a function into result caching.
pub const CACHE_TAG: &str = "cache";

/// Logs every invocation of one function.
#[derive(Debug)]
pub struct LoggingHandler {
    function: String,
    index: usize,
}

impl LoggingHandler {
    pub fn new(function: impl Into<String>, index: usize) -> Self {
        Self {
            function: function.into(),
            index,
        }
    }

    /// Selector that logs every function, numbering them in selection order.
    pub fn selector() -> HandlerSelector {
        let counter = AtomicUsize::new(0);
        HandlerSelector::new("logging", move |d| {
            let index = counter.fetch_add(1, Ordering::Relaxed);
            Some(Arc::new(LoggingHandler::new(&d.name, index)) as Arc<dyn ExecutionHandler>)
        })
    }
}

impl ExecutionHandler for LoggingHandler {
    fn on_entry(&self, ctx: &mut HandlerContext) -> Result<(), CallError> {
        debug!(function = %self.function, index = self.index, args = ?ctx.arguments(), "call");
        Ok(())
    }

    fn on_success(&self, ctx: &mut HandlerContext) -> Result<(), CallError> {
        debug!(function = %self.function, result = %ctx.return_value, "returned");
        Ok(())
    }

    fn on_exception(&self, ctx: &mut HandlerContext) {
        if let Some(error) = &ctx.exception {
            warn!(function = %self.function, code = %error.code, "{}", error.message);
        }
    }
}

/// Running totals for a [`TimingHandler`].
#[derive(Debug, Default)]
pub struct TimingStats {
    calls: AtomicU64,
    nanos: AtomicU64,
}

impl TimingStats {
    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::Relaxed)
    }

    pub fn total(&self) -> Duration {
        Duration::from_nanos(self.nanos.load(Ordering::Relaxed))
    }
}

/// Measures wall time per invocation.
#[derive(Debug)]
pub struct TimingHandler {
    function: String,
    stats: Arc<TimingStats>,
}

impl TimingHandler {
    pub fn new(function: impl Into<String>) -> Self {
        Self {
            function: function.into(),
            stats: Arc::default(),
        }
    }

    pub fn stats(&self) -> Arc<TimingStats> {
        Arc::clone(&self.stats)
    }

    pub fn selector() -> HandlerSelector {
        HandlerSelector::new("timing", |d| {
            Some(Arc::new(TimingHandler::new(&d.name)) as Arc<dyn ExecutionHandler>)
        })
    }
}

impl ExecutionHandler for TimingHandler {
    fn on_entry(&self, ctx: &mut HandlerContext) -> Result<(), CallError> {
        ctx.tag = Some(Arc::new(Instant::now()) as Tag);
        Ok(())
    }

    fn on_exit(&self, ctx: &mut HandlerContext) {
        let Some(start) = ctx.tag_as::<Instant>() else {
            return;
        };
        let elapsed = start.elapsed();
        self.stats.calls.fetch_add(1, Ordering::Relaxed);
        self.stats
            .nanos
            .fetch_add(u64::try_from(elapsed.as_nanos()).unwrap_or(u64::MAX), Ordering::Relaxed);
        debug!(function = %self.function, elapsed_us = elapsed.as_micros() as u64, "timed");
    }
}

/// Memoizes results by argument list.
///
/// Hits short-circuit the inner call. Error results are not cached.
#[derive(Debug)]
pub struct CacheHandler {
    capacity: usize,
    entries: Mutex<IndexMap<String, Value>>,
}

impl CacheHandler {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: Mutex::new(IndexMap::new()),
        }
    }

    /// Selector for functions carrying the `cache` custom marker.
    pub fn selector(capacity: usize) -> HandlerSelector {
        HandlerSelector::new("cache", move |d: &FunctionDescriptor| {
            d.markers
                .has_custom(CACHE_TAG)
                .then(|| Arc::new(CacheHandler::new(capacity)) as Arc<dyn ExecutionHandler>)
        })
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn key(args: &[Value]) -> Option<String> {
        serde_json::to_string(args).ok()
    }
}

impl ExecutionHandler for CacheHandler {
    fn on_entry(&self, ctx: &mut HandlerContext) -> Result<(), CallError> {
        let Some(key) = Self::key(ctx.arguments()) else {
            return Ok(());
        };
        if let Some(hit) = self.entries.lock().get(&key) {
            ctx.return_value = hit.clone();
            ctx.flow = FlowDirective::Return;
        }
        ctx.tag = Some(Arc::new(key) as Tag);
        Ok(())
    }

    fn on_success(&self, ctx: &mut HandlerContext) -> Result<(), CallError> {
        if matches!(ctx.return_value, Value::Error(_)) {
            return Ok(());
        }
        let Some(key) = ctx.tag_as::<String>() else {
            return Ok(());
        };
        let mut entries = self.entries.lock();
        if entries.len() >= self.capacity && !entries.contains_key(key) {
            entries.shift_remove_index(0);
        }
        entries.insert(key.clone(), ctx.return_value.clone());
        Ok(())
    }
}

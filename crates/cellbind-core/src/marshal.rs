//! Reference marshalling: opaque objects cross the host boundary as ids.
//!
//! Every object returned by reference is stored under an id string of the
//! form `"{TypeName}@{n}"` and is owned by the calling context (typically a
//! cell) that produced it. Re-entering a context discards the objects it
//! produced last time, so each context keeps only its latest results alive.
//!
//! Objects produced during the current invocation are also kept in the
//! worker's temporary set, so lookups made while that invocation is still
//! running succeed even after the context's generation has been replaced.
//! A worker's temporaries go away with its thread.

use crate::callable::CallError;
use crate::types::ObjectType;
use crate::value::Value;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::collections::hash_map::Entry as Slot;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, ThreadId};
use thiserror::Error;
use tracing::trace;

/// Identifies the caller that owns stored objects.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ContextKey {
    /// No caller information; objects are shared by all detached calls.
    Detached,
    Cell { row: u32, column: u32 },
    Named(String),
}

impl fmt::Display for ContextKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContextKey::Detached => write!(f, "detached"),
            ContextKey::Cell { row, column } => write!(f, "R{row}C{column}"),
            ContextKey::Named(name) => write!(f, "{name}"),
        }
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum MarshalError {
    #[error("'{0}' is not a valid object id")]
    Malformed(String),
    #[error("Object '{0}' not found")]
    NotFound(String),
    #[error("Object '{id}' is not of type {expected}, it is of type {found}")]
    WrongType {
        id: String,
        expected: String,
        found: String,
    },
}

impl From<MarshalError> for CallError {
    fn from(e: MarshalError) -> Self {
        CallError::value(e.to_string())
    }
}

/// Tells the marshalling rules who is calling.
pub trait CallerScope: Send + Sync {
    fn current(&self) -> ContextKey;
}

thread_local! {
    static CALLER: RefCell<Option<ContextKey>> = const { RefCell::new(None) };
    static RETIRE: RefCell<Retire> = RefCell::new(Retire::default());
}

/// Caller identity carried on the invoking thread.
///
/// Hosts set it with [`ThreadCaller::enter`] around each invocation.
#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadCaller;

impl ThreadCaller {
    /// Run `f` with `key` as the current caller on this thread.
    pub fn enter<R>(key: ContextKey, f: impl FnOnce() -> R) -> R {
        let previous = CALLER.with(|c| c.replace(Some(key)));
        let _restore = Restore(previous);
        f()
    }
}

struct Restore(Option<ContextKey>);

impl Drop for Restore {
    fn drop(&mut self) {
        let previous = self.0.take();
        CALLER.with(|c| *c.borrow_mut() = previous);
    }
}

impl CallerScope for ThreadCaller {
    fn current(&self) -> ContextKey {
        CALLER.with(|c| c.borrow().clone()).unwrap_or(ContextKey::Detached)
    }
}

struct Entry {
    value: Value,
    type_name: String,
}

/// Drops this thread's worker state from every cache it touched when the
/// thread exits.
#[derive(Default)]
struct Retire {
    worker: Option<ThreadId>,
    caches: Vec<Weak<Mutex<CacheState>>>,
}

impl Retire {
    fn register(state: &Arc<Mutex<CacheState>>, worker: ThreadId) {
        // Already tearing down: nothing left to register with.
        let _ = RETIRE.try_with(|r| {
            let mut r = r.borrow_mut();
            r.worker = Some(worker);
            r.caches.retain(|w| w.strong_count() > 0);
            r.caches.push(Arc::downgrade(state));
        });
    }
}

impl Drop for Retire {
    fn drop(&mut self) {
        let Some(worker) = self.worker else {
            return;
        };
        for state in self.caches.drain(..).filter_map(|w| w.upgrade()) {
            if let Some(retired) = state.lock().workers.remove(&worker) {
                trace!(temps = retired.temps.len(), "retired marshal worker");
            }
        }
    }
}

#[derive(Default)]
struct Worker {
    current: Option<ContextKey>,
    temps: HashMap<u64, Entry>,
}

#[derive(Default)]
struct CacheState {
    entries: HashMap<u64, Entry>,
    /// Ids produced by the live generation of each context.
    births: HashMap<ContextKey, HashSet<u64>>,
    workers: HashMap<ThreadId, Worker>,
}

/// Context-scoped object store.
pub struct ReferenceMarshalCache {
    next_id: AtomicU64,
    state: Arc<Mutex<CacheState>>,
}

impl Default for ReferenceMarshalCache {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ReferenceMarshalCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReferenceMarshalCache")
            .field("len", &self.len())
            .finish()
    }
}

impl ReferenceMarshalCache {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(0),
            state: Arc::new(Mutex::new(CacheState::default())),
        }
    }

    /// Begin producing objects for `key` on the current worker.
    ///
    /// When the worker switches context, its temporaries that the previous
    /// context does not own are evicted. The objects `key` produced in its
    /// previous generation are then discarded.
    pub fn enter_context(&self, key: &ContextKey) {
        let worker_id = thread::current().id();
        let mut state = self.state.lock();
        let CacheState {
            entries,
            births,
            workers,
        } = &mut *state;
        let worker = self.worker(workers, worker_id);

        if worker.current.as_ref() != Some(key) {
            let previous = worker.current.replace(key.clone());
            let owned = previous.as_ref().and_then(|p| births.get(p));
            for id in std::mem::take(&mut worker.temps).into_keys() {
                if !owned.is_some_and(|ids| ids.contains(&id)) {
                    entries.remove(&id);
                }
            }
        }

        let generation = births.entry(key.clone()).or_default();
        for id in generation.drain() {
            if entries.remove(&id).is_some() {
                trace!(id, context = %key, "evicted object");
            }
        }
        trace!(context = %key, "entered marshal context");
    }

    /// This thread's worker state, registering it for removal at thread exit.
    fn worker<'a>(&self, workers: &'a mut HashMap<ThreadId, Worker>, id: ThreadId) -> &'a mut Worker {
        match workers.entry(id) {
            Slot::Occupied(slot) => slot.into_mut(),
            Slot::Vacant(slot) => {
                Retire::register(&self.state, id);
                slot.insert(Worker::default())
            }
        }
    }

    /// Store `value` under a new id owned by the worker's current context.
    pub fn store(&self, type_name: &str, value: Value) -> String {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let worker_id = thread::current().id();
        let mut state = self.state.lock();
        let CacheState {
            entries,
            births,
            workers,
        } = &mut *state;
        let worker = self.worker(workers, worker_id);
        let owner = worker.current.clone().unwrap_or(ContextKey::Detached);

        worker.temps.insert(
            id,
            Entry {
                value: value.clone(),
                type_name: type_name.to_string(),
            },
        );
        trace!(id, context = %owner, type_name, "stored object");
        births.entry(owner).or_default().insert(id);
        entries.insert(
            id,
            Entry {
                value,
                type_name: type_name.to_string(),
            },
        );
        format!("{type_name}@{id}")
    }

    /// Look up an object by id, checking this worker's temporaries first.
    pub fn lookup(&self, id: &str) -> Result<Value, MarshalError> {
        self.lookup_entry(id).map(|(value, _)| value)
    }

    /// Look up an object and check that it belongs to `ty`.
    pub fn lookup_as(&self, id: &str, ty: &ObjectType) -> Result<Value, MarshalError> {
        let (value, type_name) = self.lookup_entry(id)?;
        if !ty.is_named(&type_name) {
            return Err(MarshalError::WrongType {
                id: id.to_string(),
                expected: ty.name.clone(),
                found: type_name,
            });
        }
        Ok(value)
    }

    fn lookup_entry(&self, id: &str) -> Result<(Value, String), MarshalError> {
        let number = parse_id(id)?;
        let worker_id = thread::current().id();
        let state = self.state.lock();
        let entry = state
            .workers
            .get(&worker_id)
            .and_then(|w| w.temps.get(&number))
            .or_else(|| state.entries.get(&number))
            .ok_or_else(|| MarshalError::NotFound(id.to_string()))?;
        Ok((entry.value.clone(), entry.type_name.clone()))
    }

    /// Number of objects reachable by any context.
    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn parse_id(id: &str) -> Result<u64, MarshalError> {
    id.rsplit_once('@')
        .and_then(|(_, n)| n.trim().parse().ok())
        .ok_or_else(|| MarshalError::Malformed(id.to_string()))
}

//! Process-wide function registry
//!
//! Jobs persist a `module.symbol` string; the registry maps that string
//! back to an invokable handler at execution time. Startup is responsible
//! for populating the registry, the store never serialises functions, and
//! an unknown reference at execution time becomes a FAILED execution.

use dashmap::DashMap;
use futures::future::BoxFuture;
use serde_json::{Map, Value};
use std::future::Future;
use std::sync::Arc;

/// Arguments handed to a job function
///
/// Handlers declare their own deserialisation contract; shape validation
/// failures are returned as errors and become FAILED executions.
#[derive(Debug, Clone, Default)]
pub struct JobInput {
    /// Positional arguments
    pub args: Vec<Value>,

    /// Named arguments
    pub kwargs: Map<String, Value>,
}

impl JobInput {
    /// Create an input from its parts
    pub fn new(args: Vec<Value>, kwargs: Map<String, Value>) -> Self {
        Self { args, kwargs }
    }

    /// Fetch and deserialise positional argument `index`
    pub fn arg<T: serde::de::DeserializeOwned>(&self, index: usize) -> anyhow::Result<T> {
        let value = self
            .args
            .get(index)
            .ok_or_else(|| anyhow::anyhow!("missing positional argument {index}"))?;
        Ok(serde_json::from_value(value.clone())?)
    }

    /// Fetch and deserialise named argument `key`
    pub fn kwarg<T: serde::de::DeserializeOwned>(&self, key: &str) -> anyhow::Result<T> {
        let value = self
            .kwargs
            .get(key)
            .ok_or_else(|| anyhow::anyhow!("missing keyword argument {key:?}"))?;
        Ok(serde_json::from_value(value.clone())?)
    }
}

/// A synchronous job function
pub type SyncFn = dyn Fn(JobInput) -> anyhow::Result<Value> + Send + Sync;

/// An asynchronous job function
pub type AsyncFn = dyn Fn(JobInput) -> BoxFuture<'static, anyhow::Result<Value>> + Send + Sync;

/// An invokable entry point
///
/// Sync handlers are plain blocking functions; async handlers suspend on
/// the cooperative scheduler. Executors decide where each flavour runs.
#[derive(Clone)]
pub enum Handler {
    /// Blocking function
    Sync(Arc<SyncFn>),

    /// Cooperative-aware function
    Async(Arc<AsyncFn>),
}

impl std::fmt::Debug for Handler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Handler::Sync(_) => f.write_str("Handler::Sync"),
            Handler::Async(_) => f.write_str("Handler::Async"),
        }
    }
}

/// Map from `module.symbol` strings to handlers
#[derive(Default)]
pub struct FunctionRegistry {
    handlers: DashMap<String, Handler>,
}

impl FunctionRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a synchronous function under `name`
    pub fn register_sync<F>(&self, name: impl Into<String>, func: F)
    where
        F: Fn(JobInput) -> anyhow::Result<Value> + Send + Sync + 'static,
    {
        self.handlers
            .insert(name.into(), Handler::Sync(Arc::new(func)));
    }

    /// Register an asynchronous function under `name`
    pub fn register_async<F, Fut>(&self, name: impl Into<String>, func: F)
    where
        F: Fn(JobInput) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
    {
        let boxed = move |input: JobInput| -> BoxFuture<'static, anyhow::Result<Value>> {
            Box::pin(func(input))
        };
        self.handlers
            .insert(name.into(), Handler::Async(Arc::new(boxed)));
    }

    /// Look up a handler
    pub fn get(&self, name: &str) -> Option<Handler> {
        self.handlers.get(name).map(|entry| entry.value().clone())
    }

    /// Check whether `name` is registered
    pub fn contains(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }

    /// Registered function references, for diagnostics
    pub fn names(&self) -> Vec<String> {
        self.handlers.iter().map(|e| e.key().clone()).collect()
    }
}

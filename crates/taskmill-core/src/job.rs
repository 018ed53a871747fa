//! Job types and definitions

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

use crate::error::Error;

/// Execution discipline for a job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobKind {
    /// Run on the calling task, blocking it
    Inline,

    /// Run on the cooperative (async) scheduler
    Cooperative,

    /// Run on a fixed pool of OS threads
    Thread,

    /// Run in a worker OS process
    Process,
}

impl Default for JobKind {
    fn default() -> Self {
        JobKind::Inline
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl JobKind {
    /// All kinds, in routing order
    pub const ALL: [JobKind; 4] = [
        JobKind::Inline,
        JobKind::Cooperative,
        JobKind::Thread,
        JobKind::Process,
    ];

    /// Stable string form stored in the database
    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::Inline => "inline",
            JobKind::Cooperative => "cooperative",
            JobKind::Thread => "thread",
            JobKind::Process => "process",
        }
    }
}

impl FromStr for JobKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "inline" => Ok(JobKind::Inline),
            "cooperative" => Ok(JobKind::Cooperative),
            "thread" => Ok(JobKind::Thread),
            "process" => Ok(JobKind::Process),
            other => Err(Error::UnknownJobKind(other.to_string())),
        }
    }
}

/// A persisted job definition
///
/// Jobs are immutable after creation except for `updated_at`. The function
/// itself is never stored; `function_ref` names an entry in the process's
/// [`FunctionRegistry`](crate::registry::FunctionRegistry).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    /// Unique job id (assigned by the store)
    pub id: i64,

    /// Unique human-readable name
    pub name: String,

    /// Registry key of the form `module.symbol`
    pub function_ref: String,

    /// Positional arguments, JSON-encoded in the store
    pub args: Vec<Value>,

    /// Named arguments, JSON-encoded in the store
    pub kwargs: Map<String, Value>,

    /// Execution discipline
    pub kind: JobKind,

    /// Retries after the first attempt; 0 means run once
    pub max_retries: u32,

    /// Per-execution deadline in seconds, if any
    pub timeout_seconds: Option<u64>,

    /// Optional key that short-circuits repeat executions
    pub idempotency_key: Option<String>,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,

    /// Last update timestamp
    pub updated_at: DateTime<Utc>,
}

impl Job {
    /// Total attempts this job may consume, counting the first one
    pub fn max_attempts(&self) -> u32 {
        self.max_retries + 1
    }
}

/// Parameters for creating a job
///
/// `max_retries` and `timeout_seconds` fall back to the configured defaults
/// when omitted.
#[derive(Debug, Clone, Default)]
pub struct NewJob {
    /// Unique human-readable name
    pub name: String,

    /// Registry key of the form `module.symbol`
    pub function_ref: String,

    /// Positional arguments
    pub args: Vec<Value>,

    /// Named arguments
    pub kwargs: Map<String, Value>,

    /// Execution discipline
    pub kind: JobKind,

    /// Retries after the first attempt
    pub max_retries: Option<u32>,

    /// Per-execution deadline in seconds
    pub timeout_seconds: Option<u64>,

    /// Optional idempotency key
    pub idempotency_key: Option<String>,
}

impl NewJob {
    /// Create a request with the mandatory fields
    pub fn new(name: impl Into<String>, function_ref: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            function_ref: function_ref.into(),
            ..Self::default()
        }
    }
}

//! taskmill: a persistent job orchestration engine
//!
//! Jobs are durable definitions in a file-backed SQLite store; every
//! execution attempt is persisted with its outcome. The engine provides:
//! - Four execution disciplines: inline, cooperative (async), OS-thread
//!   pool and OS-process pool, behind one executor contract
//! - Per-execution timeouts with best-effort cancellation
//! - Automatic retries with exponential backoff, one persisted row per
//!   attempt
//! - Idempotency keys that short-circuit repeat executions
//! - A cron-driven scheduler feeding a FIFO queue consumed by a
//!   dispatcher loop
//! - Crash recovery that fails orphaned RUNNING executions at startup
//! - In-process metrics and structured tracing
//!
//! ## Quick start
//!
//! ```no_run
//! use std::sync::Arc;
//! use serde_json::json;
//! use taskmill_core::{
//!     FunctionRegistry, JobBuilder, JobInput, Orchestrator, OrchestratorConfig,
//! };
//!
//! # async fn run() -> taskmill_core::Result<()> {
//! let registry = Arc::new(FunctionRegistry::new());
//! registry.register_sync("math.add", |input: JobInput| {
//!     let a: i64 = input.arg(0)?;
//!     let b: i64 = input.arg(1)?;
//!     Ok(json!(a + b))
//! });
//!
//! let orchestrator = Arc::new(
//!     Orchestrator::new(OrchestratorConfig::default(), registry).await?,
//! );
//! orchestrator.clone().start().await?;
//!
//! let job = orchestrator
//!     .add_job(
//!         JobBuilder::new("math.add")
//!             .named("add-2-3")
//!             .with_args(vec![json!(2), json!(3)])
//!             .build(),
//!     )
//!     .await?;
//! let execution = orchestrator.execute(&job).await?;
//! assert_eq!(execution.result, Some(json!(5)));
//!
//! orchestrator.stop().await?;
//! # Ok(())
//! # }
//! ```

pub mod builder;
pub mod config;
pub mod cron;
pub mod error;
pub mod execution;
pub mod executors;
pub mod idempotency;
pub mod job;
pub mod logging;
pub mod metrics;
pub mod orchestrator;
pub mod queue;
pub mod recovery;
pub mod registry;
pub mod retry;
pub mod scheduler;
pub mod store;

// Re-export main types
pub use builder::JobBuilder;
pub use config::{LogFormat, OrchestratorConfig};
pub use cron::CronSchedule;
pub use error::{Error, Result};
pub use execution::{Execution, ExecutionFilter, ExecutionResult, ExecutionStatus};
pub use executors::{run_worker, Executor, ExecutorRouter};
pub use idempotency::IdempotencyGuard;
pub use job::{Job, JobKind, NewJob};
pub use metrics::{MetricsSummary, OrchestratorMetrics};
pub use orchestrator::Orchestrator;
pub use queue::JobQueue;
pub use recovery::RecoverySweep;
pub use registry::{FunctionRegistry, Handler, JobInput};
pub use retry::RetryPolicy;
pub use scheduler::Scheduler;
pub use store::{Schedule, ScheduleFilter, Store};

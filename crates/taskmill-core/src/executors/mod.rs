//! Executor disciplines
//!
//! All four executors implement the same contract: run a job function and
//! encode every exit path of the user code into an [`ExecutionResult`].
//! User failures and panics become FAILED, expired deadlines become
//! TIMEOUT; only infrastructure problems (a closed executor) surface as
//! errors.

pub mod cooperative;
pub mod inline;
pub mod process;
pub mod thread;

pub use cooperative::CooperativeExecutor;
pub use inline::InlineExecutor;
pub use process::{run_worker, ProcessPoolExecutor};
pub use thread::ThreadPoolExecutor;

use async_trait::async_trait;
use futures::FutureExt;
use serde_json::Value;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use crate::config::OrchestratorConfig;
use crate::error::{Error, Result};
use crate::execution::ExecutionResult;
use crate::job::{Job, JobKind};
use crate::registry::{Handler, JobInput, SyncFn};

/// Common contract for the four execution disciplines
#[async_trait]
pub trait Executor: Send + Sync {
    /// Run the job's function and encode the outcome
    async fn execute(&self, job: &Job, handler: Handler) -> Result<ExecutionResult>;

    /// Release pool resources; later `execute` calls fail with
    /// [`Error::ExecutorClosed`]. Safe to call more than once.
    async fn shutdown(&self) -> Result<()>;

    /// Number of jobs currently in flight
    fn running_count(&self) -> usize;
}

/// Invoke a sync handler, converting panics into errors
pub(crate) fn call_sync_handler(func: &Arc<SyncFn>, input: JobInput) -> anyhow::Result<Value> {
    match std::panic::catch_unwind(AssertUnwindSafe(|| func(input))) {
        Ok(outcome) => outcome,
        Err(payload) => Err(anyhow::anyhow!("handler panicked: {}", panic_message(&payload))),
    }
}

/// Await an async handler, converting panics into errors
pub(crate) async fn call_async_handler(
    func: &Arc<crate::registry::AsyncFn>,
    input: JobInput,
) -> anyhow::Result<Value> {
    match AssertUnwindSafe(func(input)).catch_unwind().await {
        Ok(outcome) => outcome,
        Err(payload) => Err(anyhow::anyhow!("handler panicked: {}", panic_message(&payload))),
    }
}

/// Extract a printable message from a panic payload
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(inner) = payload.downcast_ref::<Box<dyn std::any::Any + Send>>() {
        return panic_message(inner.as_ref());
    }
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Encode a handler outcome, stamping the duration
pub(crate) fn encode_outcome(outcome: anyhow::Result<Value>, started: Instant) -> ExecutionResult {
    let duration = started.elapsed().as_secs_f64();
    match outcome {
        Ok(value) => ExecutionResult::success(value, duration),
        Err(error) => {
            ExecutionResult::failure(error.to_string(), Some(format!("{error:?}")), duration)
        }
    }
}

/// Routes each job to the executor matching its kind and owns the
/// executor lifecycles
pub struct ExecutorRouter {
    inline: InlineExecutor,
    cooperative: CooperativeExecutor,
    thread: ThreadPoolExecutor,
    process: ProcessPoolExecutor,
}

impl ExecutorRouter {
    /// Build the four executors from the configuration
    ///
    /// `worker_command` overrides the process executor's worker binary;
    /// the default is the current executable's hidden `worker` mode.
    pub fn new(config: &OrchestratorConfig, worker_command: Option<Vec<String>>) -> Self {
        Self {
            inline: InlineExecutor::new(),
            cooperative: CooperativeExecutor::new(config.max_async_concurrent),
            thread: ThreadPoolExecutor::new(config.thread_pool_size),
            process: ProcessPoolExecutor::new(
                config.effective_process_pool_size(),
                worker_command,
            ),
        }
    }

    /// Run `job` on the executor selected by its kind
    pub async fn execute(&self, job: &Job, handler: Handler) -> Result<ExecutionResult> {
        self.executor_for(job.kind).execute(job, handler).await
    }

    /// The executor bound to a kind
    pub fn executor_for(&self, kind: JobKind) -> &dyn Executor {
        match kind {
            JobKind::Inline => &self.inline,
            JobKind::Cooperative => &self.cooperative,
            JobKind::Thread => &self.thread,
            JobKind::Process => &self.process,
        }
    }

    /// In-flight counts per kind, for the metrics gauges
    pub fn running_counts(&self) -> Vec<(JobKind, usize)> {
        JobKind::ALL
            .iter()
            .map(|&kind| (kind, self.executor_for(kind).running_count()))
            .collect()
    }

    /// Configured pool sizes per kind, for the metrics gauges
    pub fn pool_sizes(&self) -> Vec<(JobKind, usize)> {
        vec![
            (JobKind::Inline, 1),
            (JobKind::Cooperative, self.cooperative.max_concurrent()),
            (JobKind::Thread, self.thread.pool_size()),
            (JobKind::Process, self.process.pool_size()),
        ]
    }

    /// Shut every executor down, swallowing individual failures but
    /// reporting a composite error if any occurred. Idempotent.
    pub async fn shutdown_all(&self) -> Result<()> {
        let mut failures = Vec::new();

        for &kind in JobKind::ALL.iter() {
            if let Err(error) = self.executor_for(kind).shutdown().await {
                tracing::warn!(kind = %kind, error = %error, "executor shutdown failed");
                failures.push(format!("{kind}: {error}"));
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(Error::Shutdown(failures.join("; ")))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::FunctionRegistry;
    use chrono::Utc;
    use serde_json::json;

    pub(crate) fn test_job(kind: JobKind, timeout_seconds: Option<u64>) -> Job {
        Job {
            id: 1,
            name: "test".to_string(),
            function_ref: "demo.fn".to_string(),
            args: vec![],
            kwargs: serde_json::Map::new(),
            kind,
            max_retries: 0,
            timeout_seconds,
            idempotency_key: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_router_dispatches_by_kind() {
        let config = OrchestratorConfig::default();
        let router = ExecutorRouter::new(&config, None);

        let registry = FunctionRegistry::new();
        registry.register_sync("demo.fn", |_| Ok(json!("inline-ok")));
        let handler = registry.get("demo.fn").unwrap();

        let job = test_job(JobKind::Inline, None);
        let outcome = router.execute(&job, handler).await.unwrap();
        assert_eq!(outcome.result, Some(json!("inline-ok")));
    }

    #[tokio::test]
    async fn test_shutdown_all_is_idempotent() {
        let config = OrchestratorConfig::default();
        let router = ExecutorRouter::new(&config, None);

        router.shutdown_all().await.unwrap();
        router.shutdown_all().await.unwrap();

        let registry = FunctionRegistry::new();
        registry.register_sync("demo.fn", |_| Ok(json!(1)));
        let handler = registry.get("demo.fn").unwrap();

        let job = test_job(JobKind::Inline, None);
        let err = router.execute(&job, handler).await.unwrap_err();
        assert!(matches!(err, Error::ExecutorClosed));
    }

    #[test]
    fn test_pool_sizes_reflect_config() {
        let mut config = OrchestratorConfig::default();
        config.thread_pool_size = 3;
        config.process_pool_size = Some(2);
        let router = ExecutorRouter::new(&config, None);

        let sizes: std::collections::HashMap<_, _> =
            router.pool_sizes().into_iter().collect();
        assert_eq!(sizes[&JobKind::Thread], 3);
        assert_eq!(sizes[&JobKind::Process], 2);
    }

    #[test]
    fn debug_direct_call_sync_handler() {
        std::panic::set_hook(Box::new(|_| {}));
        let f: Arc<SyncFn> = Arc::new(|_: JobInput| -> anyhow::Result<Value> { panic!("kaboom") });
        let input = JobInput::new(vec![], serde_json::Map::new());
        let result = call_sync_handler(&f, input);
        eprintln!("DEBUG direct result = {:?}", result);
    }

    #[test]
    fn debug_syncfn_catch_unwind() {
        std::panic::set_hook(Box::new(|_| {}));
        let f: Arc<SyncFn> = Arc::new(|_: JobInput| -> anyhow::Result<Value> { panic!("syncfn") });
        let input = JobInput::new(vec![], serde_json::Map::new());
        let r = std::panic::catch_unwind(AssertUnwindSafe(|| f(input)));
        match r {
            Ok(_) => eprintln!("DEBUG ok"),
            Err(p) => {
                eprintln!("DEBUG syncfn is_str={} is_nested={}",
                    p.downcast_ref::<&str>().is_some(),
                    p.downcast_ref::<Box<dyn std::any::Any + Send>>().is_some());
            }
        }
    }

    #[test]
    fn debug_arc_dyn_fn_catch_unwind() {
        std::panic::set_hook(Box::new(|_| {}));
        let f: Arc<dyn Fn() -> i32 + Send + Sync> = Arc::new(|| panic!("dynfn"));
        let r = std::panic::catch_unwind(AssertUnwindSafe(|| f()));
        match r {
            Ok(_) => eprintln!("DEBUG ok"),
            Err(p) => {
                eprintln!("DEBUG dynfn is_str={} is_nested={}",
                    p.downcast_ref::<&str>().is_some(),
                    p.downcast_ref::<Box<dyn std::any::Any + Send>>().is_some());
            }
        }
    }

    #[test]
    fn debug_plain_catch_unwind() {
        std::panic::set_hook(Box::new(|_| {}));
        let r = std::panic::catch_unwind(AssertUnwindSafe(|| -> i32 { panic!("plain") }));
        match r {
            Ok(_) => eprintln!("DEBUG ok"),
            Err(p) => {
                eprintln!("DEBUG plain is_str={} is_nested={}",
                    p.downcast_ref::<&str>().is_some(),
                    p.downcast_ref::<Box<dyn std::any::Any + Send>>().is_some());
            }
        }
    }
}

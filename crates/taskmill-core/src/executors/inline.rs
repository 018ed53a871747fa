//! Inline executor
//!
//! Runs the function on the calling task, blocking it until the function
//! returns. `timeout_seconds` is NOT enforced here: a synchronous call on
//! the caller cannot be pre-empted from the outside, so the deadline is
//! advisory for INLINE jobs. Use the thread or process executors when the
//! timeout must bite.

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Instant;

use crate::error::{Error, Result};
use crate::execution::ExecutionResult;
use crate::job::Job;
use crate::registry::{Handler, JobInput};

use super::{call_async_handler, call_sync_handler, encode_outcome, Executor};

/// Executor that invokes the function on the caller
#[derive(Default)]
pub struct InlineExecutor {
    closed: AtomicBool,
    running: AtomicUsize,
}

impl InlineExecutor {
    /// Create an inline executor
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Executor for InlineExecutor {
    async fn execute(&self, job: &Job, handler: Handler) -> Result<ExecutionResult> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::ExecutorClosed);
        }

        let started = Instant::now();
        let input = JobInput::new(job.args.clone(), job.kwargs.clone());

        self.running.fetch_add(1, Ordering::SeqCst);
        let outcome = match &handler {
            Handler::Sync(func) => call_sync_handler(func, input),
            Handler::Async(func) => call_async_handler(func, input).await,
        };
        self.running.fetch_sub(1, Ordering::SeqCst);

        Ok(encode_outcome(outcome, started))
    }

    async fn shutdown(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn running_count(&self) -> usize {
        self.running.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executors::tests::test_job;
    use crate::job::JobKind;
    use crate::registry::FunctionRegistry;
    use serde_json::json;

    fn handler_for<F>(func: F) -> Handler
    where
        F: Fn(JobInput) -> anyhow::Result<serde_json::Value> + Send + Sync + 'static,
    {
        let registry = FunctionRegistry::new();
        registry.register_sync("demo.fn", func);
        registry.get("demo.fn").unwrap()
    }

    #[tokio::test]
    async fn test_success() {
        let executor = InlineExecutor::new();
        let handler = handler_for(|input| {
            let a: i64 = input.arg(0)?;
            let b: i64 = input.arg(1)?;
            Ok(json!(a + b))
        });

        let mut job = test_job(JobKind::Inline, None);
        job.args = vec![json!(2), json!(3)];

        let outcome = executor.execute(&job, handler).await.unwrap();
        assert!(outcome.is_success());
        assert_eq!(outcome.result, Some(json!(5)));
        assert!(outcome.duration_seconds >= 0.0);
    }

    #[tokio::test]
    async fn test_handler_error_is_encoded() {
        let executor = InlineExecutor::new();
        let handler = handler_for(|_| anyhow::bail!("deliberate failure"));

        let job = test_job(JobKind::Inline, None);
        let outcome = executor.execute(&job, handler).await.unwrap();

        assert_eq!(outcome.status, crate::execution::ExecutionStatus::Failed);
        assert!(outcome.error.as_deref().unwrap().contains("deliberate failure"));
        assert!(outcome.traceback.is_some());
    }

    #[tokio::test]
    async fn test_panic_is_encoded() {
        let executor = InlineExecutor::new();
        let handler = handler_for(|_| panic!("kaboom"));

        let job = test_job(JobKind::Inline, None);
        let outcome = executor.execute(&job, handler).await.unwrap();

        eprintln!("DEBUG error={:?}", outcome.error);
        assert_eq!(outcome.status, crate::execution::ExecutionStatus::Failed);
        assert!(outcome.error.as_deref().unwrap().contains("kaboom"));
    }

    #[tokio::test]
    async fn test_async_handler_runs_in_place() {
        let executor = InlineExecutor::new();
        let registry = FunctionRegistry::new();
        registry.register_async("demo.fn", |_| async { Ok(json!("async-ok")) });

        let job = test_job(JobKind::Inline, None);
        let outcome = executor
            .execute(&job, registry.get("demo.fn").unwrap())
            .await
            .unwrap();
        assert_eq!(outcome.result, Some(json!("async-ok")));
    }

    #[tokio::test]
    async fn test_closed_executor_rejects_work() {
        let executor = InlineExecutor::new();
        executor.shutdown().await.unwrap();

        let handler = handler_for(|_| Ok(json!(null)));
        let job = test_job(JobKind::Inline, None);
        let err = executor.execute(&job, handler).await.unwrap_err();
        assert!(matches!(err, Error::ExecutorClosed));
    }
}

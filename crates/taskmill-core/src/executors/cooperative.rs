//! Cooperative executor
//!
//! Runs functions on the async scheduler under a counting semaphore of
//! `max_concurrent` slots. Async handlers suspend in place; sync handlers
//! are offloaded to a helper OS thread via `spawn_blocking` so the
//! cooperative loop stays responsive. Timeouts wrap the call: on expiry
//! the wrapper returns TIMEOUT while the offloaded call may keep running
//! in the background (cancellation is best-effort).

use async_trait::async_trait;
use serde_json::Value;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;

use crate::error::{Error, Result};
use crate::execution::ExecutionResult;
use crate::job::Job;
use crate::registry::{Handler, JobInput};

use super::{call_async_handler, call_sync_handler, encode_outcome, Executor};

/// Executor backed by the async scheduler
pub struct CooperativeExecutor {
    semaphore: Arc<Semaphore>,
    max_concurrent: usize,
    running: AtomicUsize,
}

impl CooperativeExecutor {
    /// Create an executor allowing `max_concurrent` jobs in flight
    pub fn new(max_concurrent: usize) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(max_concurrent)),
            max_concurrent,
            running: AtomicUsize::new(0),
        }
    }

    /// Configured slot count
    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    async fn run_handler(handler: &Handler, input: JobInput) -> anyhow::Result<Value> {
        match handler {
            Handler::Async(func) => call_async_handler(func, input).await,
            Handler::Sync(func) => {
                let func = func.clone();
                match tokio::task::spawn_blocking(move || call_sync_handler(&func, input)).await {
                    Ok(outcome) => outcome,
                    Err(join_error) => Err(anyhow::anyhow!(
                        "offloaded handler aborted: {join_error}"
                    )),
                }
            }
        }
    }
}

#[async_trait]
impl Executor for CooperativeExecutor {
    async fn execute(&self, job: &Job, handler: Handler) -> Result<ExecutionResult> {
        // A closed semaphore rejects waiters, so pending calls unblock
        // during shutdown instead of hanging.
        let _permit = self
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| Error::ExecutorClosed)?;

        let started = Instant::now();
        let input = JobInput::new(job.args.clone(), job.kwargs.clone());

        self.running.fetch_add(1, Ordering::SeqCst);
        let outcome = match job.timeout_seconds {
            Some(limit) => {
                match tokio::time::timeout(
                    Duration::from_secs(limit),
                    Self::run_handler(&handler, input),
                )
                .await
                {
                    Ok(outcome) => encode_outcome(outcome, started),
                    Err(_) => ExecutionResult::timeout(limit, started.elapsed().as_secs_f64()),
                }
            }
            None => encode_outcome(Self::run_handler(&handler, input).await, started),
        };
        self.running.fetch_sub(1, Ordering::SeqCst);

        Ok(outcome)
    }

    async fn shutdown(&self) -> Result<()> {
        self.semaphore.close();
        Ok(())
    }

    fn running_count(&self) -> usize {
        self.running.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::ExecutionStatus;
    use crate::executors::tests::test_job;
    use crate::job::JobKind;
    use crate::registry::FunctionRegistry;
    use serde_json::json;

    #[tokio::test]
    async fn test_async_handler_success() {
        let executor = CooperativeExecutor::new(4);
        let registry = FunctionRegistry::new();
        registry.register_async("demo.fn", |input: JobInput| async move {
            let n: i64 = input.arg(0)?;
            Ok(json!(n * 2))
        });

        let mut job = test_job(JobKind::Cooperative, None);
        job.args = vec![json!(21)];

        let outcome = executor
            .execute(&job, registry.get("demo.fn").unwrap())
            .await
            .unwrap();
        assert_eq!(outcome.result, Some(json!(42)));
    }

    #[tokio::test]
    async fn test_sync_handler_is_offloaded() {
        let executor = CooperativeExecutor::new(4);
        let registry = FunctionRegistry::new();
        registry.register_sync("demo.fn", |_| {
            std::thread::sleep(Duration::from_millis(20));
            Ok(json!("done"))
        });

        let job = test_job(JobKind::Cooperative, None);
        let outcome = executor
            .execute(&job, registry.get("demo.fn").unwrap())
            .await
            .unwrap();
        assert_eq!(outcome.result, Some(json!("done")));
        assert!(outcome.duration_seconds >= 0.02);
    }

    #[tokio::test]
    async fn test_timeout_expires() {
        let executor = CooperativeExecutor::new(4);
        let registry = FunctionRegistry::new();
        registry.register_async("demo.fn", |_| async {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(json!(null))
        });

        let job = test_job(JobKind::Cooperative, Some(1));
        let outcome = executor
            .execute(&job, registry.get("demo.fn").unwrap())
            .await
            .unwrap();

        assert_eq!(outcome.status, ExecutionStatus::Timeout);
        assert!(outcome.error.as_deref().unwrap().contains("1"));
        assert_eq!(executor.running_count(), 0);
    }

    #[tokio::test]
    async fn test_semaphore_limits_concurrency() {
        let executor = Arc::new(CooperativeExecutor::new(1));
        let registry = FunctionRegistry::new();
        registry.register_async("demo.fn", |_| async {
            tokio::time::sleep(Duration::from_millis(100)).await;
            Ok(json!(null))
        });
        let handler = registry.get("demo.fn").unwrap();

        let started = Instant::now();
        let mut handles = Vec::new();
        for _ in 0..2 {
            let executor = executor.clone();
            let handler = handler.clone();
            handles.push(tokio::spawn(async move {
                let job = test_job(JobKind::Cooperative, None);
                executor.execute(&job, handler).await.unwrap()
            }));
        }
        for handle in handles {
            assert!(handle.await.unwrap().is_success());
        }

        // With one slot, the second job waits for the first
        assert!(started.elapsed() >= Duration::from_millis(200));
    }

    #[tokio::test]
    async fn test_shutdown_unblocks_waiters() {
        let executor = Arc::new(CooperativeExecutor::new(1));
        let registry = FunctionRegistry::new();
        registry.register_async("demo.fn", |_| async {
            tokio::time::sleep(Duration::from_millis(200)).await;
            Ok(json!(null))
        });
        let handler = registry.get("demo.fn").unwrap();

        let occupant = {
            let executor = executor.clone();
            let handler = handler.clone();
            tokio::spawn(async move {
                let job = test_job(JobKind::Cooperative, None);
                executor.execute(&job, handler).await
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        let waiter = {
            let executor = executor.clone();
            let handler = handler.clone();
            tokio::spawn(async move {
                let job = test_job(JobKind::Cooperative, None);
                executor.execute(&job, handler).await
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        executor.shutdown().await.unwrap();

        let err = waiter.await.unwrap().unwrap_err();
        assert!(matches!(err, Error::ExecutorClosed));

        // The in-flight execution runs to completion
        assert!(occupant.await.unwrap().unwrap().is_success());
    }
}

//! Idempotent execution short-circuiting
//!
//! A job carrying an `idempotency_key` runs at most once successfully:
//! before dispatch the guard looks for a prior SUCCESS execution under
//! the same key and, when found, hands back the stored result instead of
//! invoking the function again.
//!
//! Two concurrent first-time executions with the same key can both miss
//! the read; absolute first-time safety would need a distributed lock and
//! is out of scope. The UNIQUE index on `jobs.idempotency_key` protects
//! job creation, and repeat requests against an existing job observe the
//! latest prior SUCCESS.

use std::sync::Arc;

use crate::error::Result;
use crate::execution::ExecutionResult;
use crate::job::Job;
use crate::store::Store;

/// Short-circuits execution when a prior success exists for a key
pub struct IdempotencyGuard {
    store: Arc<Store>,
}

impl IdempotencyGuard {
    /// Create a guard reading through `store`
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }

    /// Return the prior successful result for `job`, if any
    ///
    /// Jobs without a key never short-circuit.
    pub async fn check(&self, job: &Job) -> Result<Option<ExecutionResult>> {
        let Some(key) = job.idempotency_key.as_deref() else {
            return Ok(None);
        };
        if key.is_empty() {
            return Ok(None);
        }

        let prior = self.store.find_success_by_idempotency_key(key).await?;
        Ok(prior.map(|execution| ExecutionResult {
            status: crate::execution::ExecutionStatus::Success,
            result: execution.result,
            error: None,
            traceback: None,
            duration_seconds: execution.duration_seconds.unwrap_or(0.0),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::ExecutionResult as Outcome;
    use crate::job::{JobKind, NewJob};
    use serde_json::json;

    async fn store() -> Arc<Store> {
        Arc::new(Store::connect("sqlite::memory:", 1).await.unwrap())
    }

    fn keyed_job(key: Option<&str>) -> NewJob {
        NewJob {
            name: "guarded".to_string(),
            function_ref: "demo.add".to_string(),
            kind: JobKind::Inline,
            idempotency_key: key.map(str::to_string),
            ..NewJob::default()
        }
    }

    #[tokio::test]
    async fn test_no_key_no_short_circuit() {
        let store = store().await;
        let job = store.create_job(&keyed_job(None), 0).await.unwrap();
        let guard = IdempotencyGuard::new(store);

        assert!(guard.check(&job).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_prior_success_is_returned() {
        let store = store().await;
        let job = store.create_job(&keyed_job(Some("K")), 0).await.unwrap();
        let guard = IdempotencyGuard::new(store.clone());

        // No prior success yet
        assert!(guard.check(&job).await.unwrap().is_none());

        let execution_id = store.create_execution(job.id, 1).await.unwrap();
        let mut execution = store.get_execution(execution_id).await.unwrap().unwrap();
        execution.apply_result(&Outcome::success(json!(42), 1.5));
        store.update_execution(&execution).await.unwrap();

        let prior = guard.check(&job).await.unwrap().unwrap();
        assert!(prior.is_success());
        assert_eq!(prior.result, Some(json!(42)));
        assert_eq!(prior.duration_seconds, 1.5);
    }

    #[tokio::test]
    async fn test_failures_do_not_short_circuit() {
        let store = store().await;
        let job = store.create_job(&keyed_job(Some("K")), 0).await.unwrap();
        let guard = IdempotencyGuard::new(store.clone());

        let execution_id = store.create_execution(job.id, 1).await.unwrap();
        let mut execution = store.get_execution(execution_id).await.unwrap().unwrap();
        execution.apply_result(&Outcome::failure("boom".into(), None, 0.1));
        store.update_execution(&execution).await.unwrap();

        assert!(guard.check(&job).await.unwrap().is_none());
    }
}

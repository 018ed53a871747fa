//! Orchestrator facade
//!
//! Binds the store, queue, registry, executors, retry policy,
//! idempotency guard, scheduler and metrics behind the public operation
//! set: `add_job`, `execute`, `schedule`, the listing pass-throughs, and
//! the `start`/`stop` lifecycle.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::config::OrchestratorConfig;
use crate::cron::CronSchedule;
use crate::error::{Error, Result};
use crate::execution::{Execution, ExecutionFilter, ExecutionResult};
use crate::executors::ExecutorRouter;
use crate::idempotency::IdempotencyGuard;
use crate::job::{Job, NewJob};
use crate::metrics::{MetricsSummary, OrchestratorMetrics};
use crate::queue::JobQueue;
use crate::recovery::RecoverySweep;
use crate::registry::FunctionRegistry;
use crate::retry::RetryPolicy;
use crate::scheduler::Scheduler;
use crate::store::{Schedule, ScheduleFilter, Store};

/// The job orchestration engine
///
/// All public operations are safe to invoke concurrently. `start` runs
/// the recovery sweep and brings up the scheduler and the queue
/// dispatcher; `stop` winds them down and closes the executors, after
/// which `execute` fails with [`Error::ExecutorClosed`].
pub struct Orchestrator {
    config: OrchestratorConfig,
    store: Arc<Store>,
    queue: Arc<JobQueue>,
    registry: Arc<FunctionRegistry>,
    router: Arc<ExecutorRouter>,
    retry: RetryPolicy,
    guard: IdempotencyGuard,
    scheduler: Arc<Scheduler>,
    metrics: Arc<OrchestratorMetrics>,
    shutdown: watch::Sender<bool>,
    started: AtomicBool,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
}

impl Orchestrator {
    /// Open the store and wire the components
    pub async fn new(config: OrchestratorConfig, registry: Arc<FunctionRegistry>) -> Result<Self> {
        Self::with_worker_command(config, registry, None).await
    }

    /// Like [`Orchestrator::new`], overriding the process executor's
    /// worker command
    pub async fn with_worker_command(
        config: OrchestratorConfig,
        registry: Arc<FunctionRegistry>,
        worker_command: Option<Vec<String>>,
    ) -> Result<Self> {
        config.validate()?;

        let store = Arc::new(Store::connect(&config.database_url, config.db_pool_size).await?);
        let queue = Arc::new(JobQueue::with_max_depth(config.queue_max_depth));
        let router = Arc::new(ExecutorRouter::new(&config, worker_command));
        let retry = RetryPolicy::new(
            config.default_max_retries,
            config.retry_backoff_base,
            config.retry_initial_delay,
            config.retry_backoff_max,
        );
        let guard = IdempotencyGuard::new(store.clone());
        let scheduler = Arc::new(Scheduler::new(
            store.clone(),
            queue.clone(),
            config.scheduler_tick_seconds,
        ));
        let (shutdown, _) = watch::channel(false);

        Ok(Self {
            config,
            store,
            queue,
            registry,
            router,
            retry,
            guard,
            scheduler,
            metrics: Arc::new(OrchestratorMetrics::new()),
            shutdown,
            started: AtomicBool::new(false),
            dispatcher: Mutex::new(None),
        })
    }

    /// The active configuration
    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// The function registry
    pub fn registry(&self) -> &FunctionRegistry {
        &self.registry
    }

    /// Jobs currently waiting in the queue
    pub fn queue_depth(&self) -> usize {
        self.queue.len()
    }

    /// Snapshot the collected metrics
    pub fn metrics_summary(&self) -> MetricsSummary {
        self.metrics.summary(
            self.queue.len(),
            self.router.running_counts(),
            self.router.pool_sizes(),
        )
    }

    // ------------------------------------------------------------------
    // Job management
    // ------------------------------------------------------------------

    /// Persist a job definition, applying configured defaults
    pub async fn add_job(&self, new: NewJob) -> Result<Job> {
        if new.name.trim().is_empty() {
            return Err(Error::Config("job name must not be empty".into()));
        }
        if new.function_ref.trim().is_empty() {
            return Err(Error::Config("function_ref must not be empty".into()));
        }

        let max_retries = new.max_retries.unwrap_or(self.config.default_max_retries);
        let mut effective = new;
        if effective.timeout_seconds.is_none() {
            effective.timeout_seconds = self.config.default_timeout;
        }

        let job = self.store.create_job(&effective, max_retries).await?;
        info!(job = %job.name, id = job.id, kind = %job.kind, "job created");
        Ok(job)
    }

    /// Fetch a job by id
    pub async fn get_job(&self, job_id: i64) -> Result<Option<Job>> {
        self.store.get_job(job_id).await
    }

    /// Fetch a job by name
    pub async fn get_job_by_name(&self, name: &str) -> Result<Option<Job>> {
        self.store.get_job_by_name(name).await
    }

    /// Delete a job definition
    pub async fn delete_job(&self, job_id: i64) -> Result<bool> {
        self.store.delete_job(job_id).await
    }

    // ------------------------------------------------------------------
    // Execution
    // ------------------------------------------------------------------

    /// Run a job now and return its final execution record
    ///
    /// Persists one execution row per attempt. Failures of the job
    /// function never propagate as errors; they are encoded in the
    /// returned execution. Infrastructure failures (store, closed
    /// executors, cancellation) do propagate.
    pub async fn execute(&self, job: &Job) -> Result<Execution> {
        let Some(handler) = self.registry.get(&job.function_ref) else {
            warn!(job = %job.name, function_ref = %job.function_ref, "function not registered");
            let outcome = ExecutionResult::failure(
                Error::UnregisteredFunction(job.function_ref.clone()).to_string(),
                None,
                0.0,
            );
            return self.persist_single_attempt(job, outcome).await;
        };

        if let Some(prior) = self.guard.check(job).await? {
            info!(job = %job.name, "idempotency key hit; returning prior result");
            return self.persist_single_attempt(job, prior).await;
        }

        let policy = self.retry.with_max_retries(job.max_retries);
        let last_execution: Arc<Mutex<Option<Execution>>> = Arc::new(Mutex::new(None));

        let store = self.store.clone();
        let router = self.router.clone();
        let metrics = self.metrics.clone();
        let slot = last_execution.clone();
        let job_for_attempts = job.clone();

        policy
            .execute_with_retry(
                move |attempt| {
                    let store = store.clone();
                    let router = router.clone();
                    let metrics = metrics.clone();
                    let slot = slot.clone();
                    let job = job_for_attempts.clone();
                    let handler = handler.clone();
                    async move {
                        let execution_id = store.create_execution(job.id, attempt).await?;
                        store.mark_execution_running(execution_id).await?;

                        let outcome = match router.execute(&job, handler).await {
                            Ok(outcome) => outcome,
                            Err(infra) => {
                                // The function never ran; close the row
                                // so it cannot linger as RUNNING.
                                let failed =
                                    ExecutionResult::failure(infra.to_string(), None, 0.0);
                                if let Some(mut execution) =
                                    store.get_execution(execution_id).await?
                                {
                                    execution.apply_result(&failed);
                                    store.update_execution(&execution).await?;
                                }
                                return Err(infra);
                            }
                        };

                        let mut execution = store
                            .get_execution(execution_id)
                            .await?
                            .ok_or(Error::Store(sqlx::Error::RowNotFound))?;
                        execution.apply_result(&outcome);
                        store.update_execution(&execution).await?;
                        metrics.record_job_execution(
                            outcome.status,
                            job.kind,
                            outcome.duration_seconds,
                        );

                        if outcome.is_success() {
                            info!(job = %job.name, attempt, "execution succeeded");
                        } else {
                            warn!(
                                job = %job.name,
                                attempt,
                                status = %outcome.status,
                                error = outcome.error.as_deref().unwrap_or(""),
                                "execution attempt failed"
                            );
                        }

                        *slot.lock().await = Some(execution);
                        Ok(outcome)
                    }
                },
                self.shutdown.subscribe(),
            )
            .await?;

        let execution = last_execution
            .lock()
            .await
            .take()
            .ok_or(Error::Store(sqlx::Error::RowNotFound))?;
        Ok(execution)
    }

    /// Run a job by id
    pub async fn execute_by_id(&self, job_id: i64) -> Result<Execution> {
        let job = self
            .get_job(job_id)
            .await?
            .ok_or(Error::JobNotFound(job_id))?;
        self.execute(&job).await
    }

    /// Persist a one-row execution that bypasses the executors
    async fn persist_single_attempt(
        &self,
        job: &Job,
        outcome: ExecutionResult,
    ) -> Result<Execution> {
        let execution_id = self.store.create_execution(job.id, 1).await?;
        self.store.mark_execution_running(execution_id).await?;

        let mut execution = self
            .store
            .get_execution(execution_id)
            .await?
            .ok_or(Error::Store(sqlx::Error::RowNotFound))?;
        execution.apply_result(&outcome);
        self.store.update_execution(&execution).await?;
        self.metrics
            .record_job_execution(outcome.status, job.kind, outcome.duration_seconds);
        Ok(execution)
    }

    /// Fetch an execution by id
    pub async fn get_execution(&self, execution_id: i64) -> Result<Option<Execution>> {
        self.store.get_execution(execution_id).await
    }

    /// Execution counts grouped by status
    pub async fn execution_status_counts(&self) -> Result<Vec<(String, i64)>> {
        self.store.execution_status_counts().await
    }

    /// List executions, newest first
    pub async fn list_executions(
        &self,
        filter: &ExecutionFilter,
        limit: u32,
    ) -> Result<Vec<Execution>> {
        self.store.list_executions(filter, limit).await
    }

    // ------------------------------------------------------------------
    // Scheduling
    // ------------------------------------------------------------------

    /// Bind a time trigger to a job
    ///
    /// Exactly one of `cron_expression` and `run_at` must be given.
    pub async fn schedule(
        &self,
        job_id: i64,
        cron_expression: Option<&str>,
        run_at: Option<chrono::DateTime<chrono::Utc>>,
        enabled: bool,
    ) -> Result<i64> {
        if cron_expression.is_some() == run_at.is_some() {
            return Err(Error::InvalidScheduleSpec);
        }

        if let Some(expression) = cron_expression {
            CronSchedule::parse(expression)?;
        }

        if self.store.get_job(job_id).await?.is_none() {
            return Err(Error::JobNotFound(job_id));
        }

        let schedule_id = self
            .store
            .create_schedule(job_id, cron_expression, run_at, enabled)
            .await?;
        info!(schedule_id, job_id, "schedule created");
        Ok(schedule_id)
    }

    /// List schedules
    pub async fn list_schedules(&self, filter: &ScheduleFilter) -> Result<Vec<Schedule>> {
        self.store.list_schedules(filter).await
    }

    /// Delete a schedule
    pub async fn delete_schedule(&self, schedule_id: i64) -> Result<bool> {
        self.store.delete_schedule(schedule_id).await
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// Start the engine: recovery sweep, scheduler, queue dispatcher
    ///
    /// Idempotent; returns the number of executions recovered by the
    /// sweep (0 on repeat calls).
    pub async fn start(self: Arc<Self>) -> Result<u64> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Ok(0);
        }

        let swept = RecoverySweep::new(self.store.clone()).run().await?;

        self.scheduler.clone().start().await;

        let orchestrator = self.clone();
        let mut stop = self.shutdown.subscribe();
        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    // Ok means the stop flag flipped; Err means the
                    // orchestrator is gone. Both end the loop.
                    _ = stop.wait_for(|s| *s) => break,
                    popped = orchestrator.queue.pop(Duration::from_millis(250)) => {
                        if let Some(job) = popped {
                            let runner = orchestrator.clone();
                            tokio::spawn(async move {
                                if let Err(e) = runner.execute(&job).await {
                                    error!(job = %job.name, error = %e, "queued execution failed");
                                }
                            });
                        }
                    }
                }
            }
            info!("dispatcher stopped");
        });
        *self.dispatcher.lock().await = Some(handle);

        info!("orchestrator started");
        Ok(swept)
    }

    /// Stop the engine: scheduler down, dispatcher drained, executors
    /// closed
    ///
    /// Pending executor waits unblock with an error; executions already
    /// running finish and are persisted.
    pub async fn stop(&self) -> Result<()> {
        let _ = self.shutdown.send(true);

        self.scheduler.stop().await;
        if let Some(handle) = self.dispatcher.lock().await.take() {
            if let Err(e) = handle.await {
                warn!(error = %e, "dispatcher ended abnormally");
            }
        }

        let shutdown_result = self.router.shutdown_all().await;
        info!("orchestrator stopped");
        shutdown_result
    }
}

//! Process-pool executor
//!
//! Runs functions in worker OS processes. Rust cannot serialise a
//! closure, so the IPC codec ships the registry key plus the JSON
//! arguments: the parent writes a one-line JSON request to the worker's
//! stdin and reads a one-line JSON response from its stdout. The worker
//! command defaults to the current executable's hidden `worker` mode and
//! must register the same functions at startup.
//!
//! Concurrency is bounded by a semaphore of `pool_size` workers. The
//! timeout is enforced at the IPC boundary; a worker that outlives its
//! deadline is killed.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::process::Stdio;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tokio::sync::Semaphore;

use crate::error::{Error, Result};
use crate::execution::ExecutionResult;
use crate::job::Job;
use crate::registry::{FunctionRegistry, Handler, JobInput};

use super::{call_async_handler, call_sync_handler, Executor};

/// One job call shipped to a worker process
#[derive(Debug, Serialize, Deserialize)]
pub struct WorkerRequest {
    /// Registry key of the function to run
    pub function_ref: String,

    /// Positional arguments
    pub args: Vec<Value>,

    /// Named arguments
    pub kwargs: Map<String, Value>,
}

/// Worker process answer
#[derive(Debug, Serialize, Deserialize)]
pub struct WorkerResponse {
    /// Whether the call succeeded
    pub ok: bool,

    /// Return value on success
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,

    /// Failure message
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Full error chain
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub traceback: Option<String>,
}

impl WorkerResponse {
    fn success(result: Value) -> Self {
        Self {
            ok: true,
            result: Some(result),
            error: None,
            traceback: None,
        }
    }

    fn failed(error: String, traceback: Option<String>) -> Self {
        Self {
            ok: false,
            result: None,
            error: Some(error),
            traceback,
        }
    }
}

/// Executor backed by worker OS processes
pub struct ProcessPoolExecutor {
    pool_size: usize,
    semaphore: Arc<Semaphore>,
    worker_command: Option<Vec<String>>,
    running: AtomicUsize,
}

impl ProcessPoolExecutor {
    /// Create an executor running at most `pool_size` workers at once
    ///
    /// `worker_command` is the argv of the worker; when absent it falls
    /// back to `current_exe() worker`.
    pub fn new(pool_size: usize, worker_command: Option<Vec<String>>) -> Self {
        let worker_command = worker_command.or_else(|| {
            std::env::current_exe()
                .ok()
                .map(|exe| vec![exe.to_string_lossy().into_owned(), "worker".to_string()])
        });

        Self {
            pool_size,
            semaphore: Arc::new(Semaphore::new(pool_size)),
            worker_command,
            running: AtomicUsize::new(0),
        }
    }

    /// Configured pool size
    pub fn pool_size(&self) -> usize {
        self.pool_size
    }

    async fn run_in_worker(
        &self,
        command: &[String],
        request_line: &str,
        timeout_seconds: Option<u64>,
        started: Instant,
    ) -> std::io::Result<ExecutionResult> {
        let mut child = Command::new(&command[0])
            .args(&command[1..])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(request_line.as_bytes()).await?;
            stdin.write_all(b"\n").await?;
            // Closing stdin signals end of input to the worker
        }

        let stdout = match child.stdout.take() {
            Some(stdout) => stdout,
            None => {
                let _ = child.start_kill();
                let _ = child.wait().await;
                return Ok(ExecutionResult::failure(
                    "worker process has no stdout".to_string(),
                    None,
                    started.elapsed().as_secs_f64(),
                ));
            }
        };

        let mut reader = BufReader::new(stdout);
        let mut line = String::new();

        let read = async { reader.read_line(&mut line).await };
        let read_outcome = match timeout_seconds {
            Some(limit) => match tokio::time::timeout(Duration::from_secs(limit), read).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    // Deadline hit at the IPC boundary: terminate the worker
                    let _ = child.start_kill();
                    let _ = child.wait().await;
                    return Ok(ExecutionResult::timeout(
                        limit,
                        started.elapsed().as_secs_f64(),
                    ));
                }
            },
            None => read.await,
        };

        let exit = child.wait().await?;
        let duration = started.elapsed().as_secs_f64();

        if read_outcome.is_err() || line.trim().is_empty() {
            return Ok(ExecutionResult::failure(
                format!("worker process produced no response ({exit})"),
                None,
                duration,
            ));
        }

        match serde_json::from_str::<WorkerResponse>(line.trim()) {
            Ok(response) if response.ok => Ok(ExecutionResult::success(
                response.result.unwrap_or(Value::Null),
                duration,
            )),
            Ok(response) => Ok(ExecutionResult::failure(
                response
                    .error
                    .unwrap_or_else(|| "worker reported failure".to_string()),
                response.traceback,
                duration,
            )),
            Err(parse_error) => Ok(ExecutionResult::failure(
                format!("unreadable worker response: {parse_error}"),
                Some(line.trim().to_string()),
                duration,
            )),
        }
    }
}

#[async_trait]
impl Executor for ProcessPoolExecutor {
    async fn execute(&self, job: &Job, _handler: Handler) -> Result<ExecutionResult> {
        let _permit = self
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| Error::ExecutorClosed)?;

        let started = Instant::now();

        let command = match &self.worker_command {
            Some(command) if !command.is_empty() => command.clone(),
            _ => {
                return Ok(ExecutionResult::failure(
                    "no worker command configured for process execution".to_string(),
                    None,
                    started.elapsed().as_secs_f64(),
                ))
            }
        };

        let request = WorkerRequest {
            function_ref: job.function_ref.clone(),
            args: job.args.clone(),
            kwargs: job.kwargs.clone(),
        };
        let request_line = match serde_json::to_string(&request) {
            Ok(line) => line,
            Err(error) => {
                return Ok(ExecutionResult::failure(
                    format!("job input is not serialisable: {error}"),
                    None,
                    started.elapsed().as_secs_f64(),
                ))
            }
        };

        self.running.fetch_add(1, Ordering::SeqCst);
        let outcome = self
            .run_in_worker(&command, &request_line, job.timeout_seconds, started)
            .await;
        self.running.fetch_sub(1, Ordering::SeqCst);

        match outcome {
            Ok(result) => Ok(result),
            Err(io_error) => Ok(ExecutionResult::failure(
                format!("failed to run worker process: {io_error}"),
                None,
                started.elapsed().as_secs_f64(),
            )),
        }
    }

    async fn shutdown(&self) -> Result<()> {
        self.semaphore.close();
        Ok(())
    }

    fn running_count(&self) -> usize {
        self.running.load(Ordering::SeqCst)
    }
}

/// Worker-process entry point
///
/// Reads one [`WorkerRequest`] line from stdin, runs it through the
/// registry and writes one [`WorkerResponse`] line to stdout. Returns the
/// process exit code.
pub async fn run_worker(registry: &FunctionRegistry) -> i32 {
    let mut stdin = BufReader::new(tokio::io::stdin());
    let mut line = String::new();
    if stdin.read_line(&mut line).await.is_err() {
        eprintln!("worker: failed to read request from stdin");
        return 2;
    }

    let response = match serde_json::from_str::<WorkerRequest>(line.trim()) {
        Err(error) => WorkerResponse::failed(format!("unreadable worker request: {error}"), None),
        Ok(request) => match registry.get(&request.function_ref) {
            None => WorkerResponse::failed(
                Error::UnregisteredFunction(request.function_ref.clone()).to_string(),
                None,
            ),
            Some(handler) => {
                let input = JobInput::new(request.args, request.kwargs);
                let outcome = match &handler {
                    Handler::Sync(func) => call_sync_handler(func, input),
                    Handler::Async(func) => call_async_handler(func, input).await,
                };
                match outcome {
                    Ok(value) => WorkerResponse::success(value),
                    Err(error) => {
                        WorkerResponse::failed(error.to_string(), Some(format!("{error:?}")))
                    }
                }
            }
        },
    };

    match serde_json::to_string(&response) {
        Ok(encoded) => {
            println!("{encoded}");
            0
        }
        Err(error) => {
            eprintln!("worker: failed to encode response: {error}");
            2
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::ExecutionStatus;
    use crate::executors::tests::test_job;
    use crate::job::JobKind;
    use serde_json::json;

    fn noop_handler() -> Handler {
        let registry = FunctionRegistry::new();
        registry.register_sync("demo.fn", |_| Ok(json!(null)));
        registry.get("demo.fn").unwrap()
    }

    #[test]
    fn test_request_codec_round_trip() {
        let mut kwargs = Map::new();
        kwargs.insert("verbose".to_string(), json!(true));
        let request = WorkerRequest {
            function_ref: "demo.add".to_string(),
            args: vec![json!(2), json!(3)],
            kwargs,
        };

        let line = serde_json::to_string(&request).unwrap();
        let decoded: WorkerRequest = serde_json::from_str(&line).unwrap();
        assert_eq!(decoded.function_ref, "demo.add");
        assert_eq!(decoded.args, vec![json!(2), json!(3)]);
        assert_eq!(decoded.kwargs.get("verbose"), Some(&json!(true)));
    }

    #[test]
    fn test_response_codec() {
        let line = serde_json::to_string(&WorkerResponse::success(json!(5))).unwrap();
        let decoded: WorkerResponse = serde_json::from_str(&line).unwrap();
        assert!(decoded.ok);
        assert_eq!(decoded.result, Some(json!(5)));

        let line =
            serde_json::to_string(&WorkerResponse::failed("boom".into(), Some("trace".into())))
                .unwrap();
        let decoded: WorkerResponse = serde_json::from_str(&line).unwrap();
        assert!(!decoded.ok);
        assert_eq!(decoded.error.as_deref(), Some("boom"));
    }

    #[tokio::test]
    async fn test_missing_worker_command_fails_cleanly() {
        let executor = ProcessPoolExecutor::new(2, Some(vec![]));
        let job = test_job(JobKind::Process, None);

        let outcome = executor.execute(&job, noop_handler()).await.unwrap();
        assert_eq!(outcome.status, ExecutionStatus::Failed);
        assert!(outcome.error.as_deref().unwrap().contains("worker command"));
    }

    #[tokio::test]
    async fn test_unspawnable_worker_fails_cleanly() {
        let executor = ProcessPoolExecutor::new(
            2,
            Some(vec!["/nonexistent/taskmill-worker".to_string()]),
        );
        let job = test_job(JobKind::Process, None);

        let outcome = executor.execute(&job, noop_handler()).await.unwrap();
        assert_eq!(outcome.status, ExecutionStatus::Failed);
        assert!(outcome
            .error
            .as_deref()
            .unwrap()
            .contains("failed to run worker process"));
    }

    #[tokio::test]
    async fn test_execute_after_shutdown() {
        let executor = ProcessPoolExecutor::new(1, None);
        executor.shutdown().await.unwrap();
        executor.shutdown().await.unwrap();

        let job = test_job(JobKind::Process, None);
        let err = executor.execute(&job, noop_handler()).await.unwrap_err();
        assert!(matches!(err, Error::ExecutorClosed));
    }

    #[tokio::test]
    async fn test_round_trip_through_shell_worker() {
        // Use /bin/sh as a stand-in worker that echoes a canned response,
        // exercising the spawn/write/read/reap path end to end.
        let response = serde_json::to_string(&WorkerResponse::success(json!(7))).unwrap();
        let script = format!("cat > /dev/null; printf '%s\\n' '{response}'");
        let executor = ProcessPoolExecutor::new(
            1,
            Some(vec!["/bin/sh".to_string(), "-c".to_string(), script]),
        );

        let job = test_job(JobKind::Process, Some(5));
        let outcome = executor.execute(&job, noop_handler()).await.unwrap();
        assert!(outcome.is_success());
        assert_eq!(outcome.result, Some(json!(7)));
    }

    #[tokio::test]
    async fn test_timeout_kills_worker() {
        let executor = ProcessPoolExecutor::new(
            1,
            Some(vec![
                "/bin/sh".to_string(),
                "-c".to_string(),
                "sleep 30".to_string(),
            ]),
        );

        let job = test_job(JobKind::Process, Some(1));
        let started = Instant::now();
        let outcome = executor.execute(&job, noop_handler()).await.unwrap();

        assert_eq!(outcome.status, ExecutionStatus::Timeout);
        assert!(outcome.error.as_deref().unwrap().contains("1"));
        assert!(started.elapsed() < Duration::from_secs(5));
    }
}

//! Execution records and executor results

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

use crate::error::Error;

/// Status of a single execution attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ExecutionStatus {
    /// Persisted, not yet dispatched
    Pending,

    /// Currently running on an executor
    Running,

    /// The function returned a value
    Success,

    /// The function failed or panicked
    Failed,

    /// The deadline expired before completion
    Timeout,
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl ExecutionStatus {
    /// Stable string form stored in the database
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionStatus::Pending => "PENDING",
            ExecutionStatus::Running => "RUNNING",
            ExecutionStatus::Success => "SUCCESS",
            ExecutionStatus::Failed => "FAILED",
            ExecutionStatus::Timeout => "TIMEOUT",
        }
    }

    /// Check if the status is terminal (will never change)
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ExecutionStatus::Success | ExecutionStatus::Failed | ExecutionStatus::Timeout
        )
    }
}

impl FromStr for ExecutionStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(ExecutionStatus::Pending),
            "RUNNING" => Ok(ExecutionStatus::Running),
            "SUCCESS" => Ok(ExecutionStatus::Success),
            "FAILED" => Ok(ExecutionStatus::Failed),
            "TIMEOUT" => Ok(ExecutionStatus::Timeout),
            other => Err(Error::Config(format!("unknown execution status: {other}"))),
        }
    }
}

/// Outcome of running a job function once
///
/// Executors never raise user failures; every exit path of the function is
/// encoded here, including panics and expired deadlines.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionResult {
    /// Terminal status of the attempt
    pub status: ExecutionStatus,

    /// Return value (SUCCESS only)
    pub result: Option<Value>,

    /// Human-readable failure message (FAILED/TIMEOUT only)
    pub error: Option<String>,

    /// Full error chain or panic context (FAILED only)
    pub traceback: Option<String>,

    /// Wall-clock duration of the attempt
    pub duration_seconds: f64,
}

impl ExecutionResult {
    /// Create a successful result
    pub fn success(result: Value, duration_seconds: f64) -> Self {
        Self {
            status: ExecutionStatus::Success,
            result: Some(result),
            error: None,
            traceback: None,
            duration_seconds,
        }
    }

    /// Create a failed result
    pub fn failure(error: String, traceback: Option<String>, duration_seconds: f64) -> Self {
        Self {
            status: ExecutionStatus::Failed,
            result: None,
            error: Some(error),
            traceback,
            duration_seconds,
        }
    }

    /// Create a timed-out result; the message carries the deadline
    pub fn timeout(timeout_seconds: u64, duration_seconds: f64) -> Self {
        Self {
            status: ExecutionStatus::Timeout,
            result: None,
            error: Some(format!("job timed out after {timeout_seconds}s")),
            traceback: None,
            duration_seconds,
        }
    }

    /// Check if the attempt succeeded
    pub fn is_success(&self) -> bool {
        self.status == ExecutionStatus::Success
    }
}

/// One persisted execution attempt of a job
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Execution {
    /// Unique execution id
    pub id: i64,

    /// Id of the executed job
    pub job_id: i64,

    /// Current status
    pub status: ExecutionStatus,

    /// Attempt number within the retry chain (1-based)
    pub attempt: u32,

    /// When the attempt was created
    pub started_at: Option<DateTime<Utc>>,

    /// When the attempt reached a terminal status
    pub completed_at: Option<DateTime<Utc>>,

    /// Total duration in seconds (terminal only)
    pub duration_seconds: Option<f64>,

    /// JSON-encoded return value (SUCCESS only)
    pub result: Option<Value>,

    /// Failure message (FAILED/TIMEOUT only)
    pub error_message: Option<String>,

    /// Full error chain or panic context
    pub traceback: Option<String>,
}

impl Execution {
    /// Fold an executor result into this record and stamp completion
    pub fn apply_result(&mut self, outcome: &ExecutionResult) {
        self.status = outcome.status;
        self.result = outcome.result.clone();
        self.error_message = outcome.error.clone();
        self.traceback = outcome.traceback.clone();
        self.duration_seconds = Some(outcome.duration_seconds);
        self.completed_at = Some(Utc::now());
    }
}

/// Filters for listing executions
#[derive(Debug, Default, Clone)]
pub struct ExecutionFilter {
    /// Restrict to one job
    pub job_id: Option<i64>,

    /// Restrict to one status
    pub status: Option<ExecutionStatus>,
}

impl ExecutionFilter {
    /// Create an empty filter
    pub fn new() -> Self {
        Self::default()
    }

    /// Filter by job id
    pub fn with_job_id(mut self, job_id: i64) -> Self {
        self.job_id = Some(job_id);
        self
    }

    /// Filter by status
    pub fn with_status(mut self, status: ExecutionStatus) -> Self {
        self.status = Some(status);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trip() {
        for status in [
            ExecutionStatus::Pending,
            ExecutionStatus::Running,
            ExecutionStatus::Success,
            ExecutionStatus::Failed,
            ExecutionStatus::Timeout,
        ] {
            assert_eq!(ExecutionStatus::from_str(status.as_str()).unwrap(), status);
        }
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(ExecutionStatus::Success.is_terminal());
        assert!(ExecutionStatus::Failed.is_terminal());
        assert!(ExecutionStatus::Timeout.is_terminal());
        assert!(!ExecutionStatus::Pending.is_terminal());
        assert!(!ExecutionStatus::Running.is_terminal());
    }

    #[test]
    fn test_timeout_result_mentions_deadline() {
        let outcome = ExecutionResult::timeout(30, 30.01);
        assert_eq!(outcome.status, ExecutionStatus::Timeout);
        assert!(outcome.error.as_deref().unwrap().contains("30"));
    }

    #[test]
    fn test_apply_result() {
        let mut execution = Execution {
            id: 1,
            job_id: 1,
            status: ExecutionStatus::Running,
            attempt: 1,
            started_at: Some(Utc::now()),
            completed_at: None,
            duration_seconds: None,
            result: None,
            error_message: None,
            traceback: None,
        };

        let outcome = ExecutionResult::success(serde_json::json!(5), 0.2);
        execution.apply_result(&outcome);

        assert_eq!(execution.status, ExecutionStatus::Success);
        assert_eq!(execution.result, Some(serde_json::json!(5)));
        assert!(execution.completed_at.is_some());
        assert_eq!(execution.duration_seconds, Some(0.2));
    }
}

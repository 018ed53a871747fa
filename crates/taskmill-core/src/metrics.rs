//! In-process execution metrics
//!
//! Counters and duration summaries recorded as jobs finish, plus gauges
//! snapshotted from the queue and executors. An external collaborator
//! exposes these over HTTP; this module only collects.

use std::collections::HashMap;
use std::sync::Mutex;

use crate::execution::ExecutionStatus;
use crate::job::JobKind;

#[derive(Debug, Default, Clone, Copy)]
struct DurationStats {
    count: u64,
    total_seconds: f64,
    max_seconds: f64,
}

/// Metrics collector for the orchestrator
#[derive(Default)]
pub struct OrchestratorMetrics {
    jobs_total: Mutex<HashMap<(ExecutionStatus, JobKind), u64>>,
    durations: Mutex<HashMap<JobKind, DurationStats>>,
}

impl OrchestratorMetrics {
    /// Create an empty collector
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one finished execution
    pub fn record_job_execution(
        &self,
        status: ExecutionStatus,
        kind: JobKind,
        duration_seconds: f64,
    ) {
        if let Ok(mut totals) = self.jobs_total.lock() {
            *totals.entry((status, kind)).or_insert(0) += 1;
        }
        if let Ok(mut durations) = self.durations.lock() {
            let stats = durations.entry(kind).or_default();
            stats.count += 1;
            stats.total_seconds += duration_seconds;
            stats.max_seconds = stats.max_seconds.max(duration_seconds);
        }
    }

    /// Count recorded for one status/kind pair
    pub fn jobs_total(&self, status: ExecutionStatus, kind: JobKind) -> u64 {
        self.jobs_total
            .lock()
            .ok()
            .and_then(|totals| totals.get(&(status, kind)).copied())
            .unwrap_or(0)
    }

    /// Snapshot everything recorded so far
    pub fn summary(
        &self,
        queue_depth: usize,
        running_counts: Vec<(JobKind, usize)>,
        pool_sizes: Vec<(JobKind, usize)>,
    ) -> MetricsSummary {
        let jobs_total = self
            .jobs_total
            .lock()
            .map(|totals| totals.clone())
            .unwrap_or_default();

        let durations = self
            .durations
            .lock()
            .map(|durations| {
                durations
                    .iter()
                    .map(|(kind, stats)| {
                        let average = if stats.count > 0 {
                            stats.total_seconds / stats.count as f64
                        } else {
                            0.0
                        };
                        (
                            *kind,
                            DurationSummary {
                                count: stats.count,
                                average_seconds: average,
                                max_seconds: stats.max_seconds,
                            },
                        )
                    })
                    .collect()
            })
            .unwrap_or_default();

        MetricsSummary {
            jobs_total,
            durations,
            queue_depth,
            running_counts,
            pool_sizes,
        }
    }
}

/// Aggregated duration figures for one kind
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DurationSummary {
    /// Executions recorded
    pub count: u64,

    /// Mean duration in seconds
    pub average_seconds: f64,

    /// Longest duration in seconds
    pub max_seconds: f64,
}

/// Point-in-time metrics snapshot
#[derive(Debug, Clone)]
pub struct MetricsSummary {
    /// Finished executions per status/kind
    pub jobs_total: HashMap<(ExecutionStatus, JobKind), u64>,

    /// Duration summaries per kind
    pub durations: HashMap<JobKind, DurationSummary>,

    /// Jobs waiting in the queue
    pub queue_depth: usize,

    /// In-flight executions per kind
    pub running_counts: Vec<(JobKind, usize)>,

    /// Configured pool sizes per kind
    pub pool_sizes: Vec<(JobKind, usize)>,
}

impl MetricsSummary {
    /// Total executions that reached a terminal status
    pub fn total_processed(&self) -> u64 {
        self.jobs_total.values().sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_and_read_back() {
        let metrics = OrchestratorMetrics::new();
        metrics.record_job_execution(ExecutionStatus::Success, JobKind::Inline, 0.5);
        metrics.record_job_execution(ExecutionStatus::Success, JobKind::Inline, 1.5);
        metrics.record_job_execution(ExecutionStatus::Failed, JobKind::Thread, 0.1);

        assert_eq!(
            metrics.jobs_total(ExecutionStatus::Success, JobKind::Inline),
            2
        );
        assert_eq!(
            metrics.jobs_total(ExecutionStatus::Failed, JobKind::Thread),
            1
        );
        assert_eq!(
            metrics.jobs_total(ExecutionStatus::Timeout, JobKind::Process),
            0
        );
    }

    #[test]
    fn test_summary_aggregates() {
        let metrics = OrchestratorMetrics::new();
        metrics.record_job_execution(ExecutionStatus::Success, JobKind::Inline, 1.0);
        metrics.record_job_execution(ExecutionStatus::Failed, JobKind::Inline, 3.0);

        let summary = metrics.summary(4, vec![(JobKind::Inline, 1)], vec![(JobKind::Inline, 1)]);
        assert_eq!(summary.total_processed(), 2);
        assert_eq!(summary.queue_depth, 4);

        let inline = summary.durations[&JobKind::Inline];
        assert_eq!(inline.count, 2);
        assert!((inline.average_seconds - 2.0).abs() < f64::EPSILON);
        assert!((inline.max_seconds - 3.0).abs() < f64::EPSILON);
    }
}

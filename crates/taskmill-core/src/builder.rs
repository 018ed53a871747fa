//! Fluent job construction

use serde_json::{Map, Value};

use crate::job::{JobKind, NewJob};

/// Builder for a [`NewJob`] with a chainable API
///
/// ```
/// use taskmill_core::JobBuilder;
/// use serde_json::json;
///
/// let new_job = JobBuilder::new("reports.nightly")
///     .named("nightly-report")
///     .with_args(vec![json!("2024-01-01")])
///     .thread()
///     .retries(5)
///     .timeout(300)
///     .idempotent("nightly-2024-01-01")
///     .build();
/// assert_eq!(new_job.max_retries, Some(5));
/// ```
#[derive(Debug, Clone)]
pub struct JobBuilder {
    new_job: NewJob,
}

impl JobBuilder {
    /// Start building a job for the registry entry `function_ref`
    ///
    /// The name defaults to the function reference until `named` is
    /// called.
    pub fn new(function_ref: impl Into<String>) -> Self {
        let function_ref = function_ref.into();
        Self {
            new_job: NewJob {
                name: function_ref.clone(),
                function_ref,
                ..NewJob::default()
            },
        }
    }

    /// Set the unique job name
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.new_job.name = name.into();
        self
    }

    /// Set the positional arguments
    pub fn with_args(mut self, args: Vec<Value>) -> Self {
        self.new_job.args = args;
        self
    }

    /// Merge named arguments
    pub fn with_kwargs(mut self, kwargs: Map<String, Value>) -> Self {
        self.new_job.kwargs.extend(kwargs);
        self
    }

    /// Add one named argument
    pub fn with_kwarg(mut self, key: impl Into<String>, value: Value) -> Self {
        self.new_job.kwargs.insert(key.into(), value);
        self
    }

    /// Run on the caller
    pub fn inline(self) -> Self {
        self.with_kind(JobKind::Inline)
    }

    /// Run on the cooperative scheduler
    pub fn cooperative(self) -> Self {
        self.with_kind(JobKind::Cooperative)
    }

    /// Run on the thread pool
    pub fn thread(self) -> Self {
        self.with_kind(JobKind::Thread)
    }

    /// Run in a worker process
    pub fn process(self) -> Self {
        self.with_kind(JobKind::Process)
    }

    /// Set the kind explicitly
    pub fn with_kind(mut self, kind: JobKind) -> Self {
        self.new_job.kind = kind;
        self
    }

    /// Set the retry budget
    pub fn retries(mut self, max_retries: u32) -> Self {
        self.new_job.max_retries = Some(max_retries);
        self
    }

    /// Set the per-execution deadline in seconds
    pub fn timeout(mut self, seconds: u64) -> Self {
        self.new_job.timeout_seconds = Some(seconds);
        self
    }

    /// Set the idempotency key
    pub fn idempotent(mut self, key: impl Into<String>) -> Self {
        self.new_job.idempotency_key = Some(key.into());
        self
    }

    /// Finish building
    pub fn build(self) -> NewJob {
        self.new_job
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_builder_defaults() {
        let new_job = JobBuilder::new("demo.echo").build();
        assert_eq!(new_job.name, "demo.echo");
        assert_eq!(new_job.function_ref, "demo.echo");
        assert_eq!(new_job.kind, JobKind::Inline);
        assert!(new_job.max_retries.is_none());
        assert!(new_job.idempotency_key.is_none());
    }

    #[test]
    fn test_builder_chains() {
        let new_job = JobBuilder::new("demo.add")
            .named("adder")
            .with_args(vec![json!(1), json!(2)])
            .with_kwarg("precise", json!(true))
            .cooperative()
            .retries(2)
            .timeout(10)
            .idempotent("add-1-2")
            .build();

        assert_eq!(new_job.name, "adder");
        assert_eq!(new_job.kind, JobKind::Cooperative);
        assert_eq!(new_job.args.len(), 2);
        assert_eq!(new_job.kwargs.get("precise"), Some(&json!(true)));
        assert_eq!(new_job.max_retries, Some(2));
        assert_eq!(new_job.timeout_seconds, Some(10));
        assert_eq!(new_job.idempotency_key.as_deref(), Some("add-1-2"));
    }
}

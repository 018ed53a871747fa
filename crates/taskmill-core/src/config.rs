//! Orchestrator configuration
//!
//! Loaded from a YAML file and overlaid with `TASKMILL_*` environment
//! variables, environment taking precedence.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{Error, Result};

/// Log output formats
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Json,
    Text,
}

/// Main configuration for the orchestrator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Store location, e.g. `sqlite://taskmill.db`
    #[serde(default = "default_database_url")]
    pub database_url: String,

    /// Store connection pool size
    #[serde(default = "default_db_pool_size")]
    pub db_pool_size: u32,

    /// Cooperative executor slot count
    #[serde(default = "default_max_async_concurrent")]
    pub max_async_concurrent: usize,

    /// Thread executor pool size
    #[serde(default = "default_thread_pool_size")]
    pub thread_pool_size: usize,

    /// Process executor pool size; absent means the CPU count
    #[serde(default)]
    pub process_pool_size: Option<usize>,

    /// Scheduler loop period in seconds
    #[serde(default = "default_scheduler_tick_seconds")]
    pub scheduler_tick_seconds: u64,

    /// Queue bound; 0 means unbounded
    #[serde(default)]
    pub queue_max_depth: usize,

    /// Retry budget used when a job omits it
    #[serde(default = "default_max_retries")]
    pub default_max_retries: u32,

    /// Base for the exponential backoff (> 1.0)
    #[serde(default = "default_retry_backoff_base")]
    pub retry_backoff_base: f64,

    /// Delay before the first retry, in seconds
    #[serde(default = "default_retry_initial_delay")]
    pub retry_initial_delay: f64,

    /// Ceiling for any retry delay, in seconds
    #[serde(default = "default_retry_backoff_max")]
    pub retry_backoff_max: f64,

    /// Timeout applied when a job omits one, in seconds
    #[serde(default)]
    pub default_timeout: Option<u64>,

    /// Whether the external metrics sink is enabled
    #[serde(default = "default_true")]
    pub metrics_enabled: bool,

    /// Port for the external metrics sink
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,

    /// Host for the external metrics sink
    #[serde(default = "default_metrics_host")]
    pub metrics_host: String,

    /// Log level: debug, info, warning, error or critical
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Log output format
    #[serde(default = "default_log_format")]
    pub log_format: LogFormat,

    /// Days to keep finished executions (consumed by the external cleaner)
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,

    /// Whether the external cleaner runs
    #[serde(default)]
    pub cleanup_enabled: bool,

    /// Cron expression for the external cleaner
    #[serde(default = "default_cleanup_schedule")]
    pub cleanup_schedule: String,
}

fn default_database_url() -> String {
    "sqlite://taskmill.db".to_string()
}

fn default_db_pool_size() -> u32 {
    5
}

fn default_max_async_concurrent() -> usize {
    10
}

fn default_thread_pool_size() -> usize {
    5
}

fn default_scheduler_tick_seconds() -> u64 {
    1
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_backoff_base() -> f64 {
    2.0
}

fn default_retry_initial_delay() -> f64 {
    1.0
}

fn default_retry_backoff_max() -> f64 {
    60.0
}

fn default_true() -> bool {
    true
}

fn default_metrics_port() -> u16 {
    9090
}

fn default_metrics_host() -> String {
    "127.0.0.1".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> LogFormat {
    LogFormat::Json
}

fn default_retention_days() -> u32 {
    30
}

fn default_cleanup_schedule() -> String {
    "0 3 * * *".to_string()
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            database_url: default_database_url(),
            db_pool_size: default_db_pool_size(),
            max_async_concurrent: default_max_async_concurrent(),
            thread_pool_size: default_thread_pool_size(),
            process_pool_size: None,
            scheduler_tick_seconds: default_scheduler_tick_seconds(),
            queue_max_depth: 0,
            default_max_retries: default_max_retries(),
            retry_backoff_base: default_retry_backoff_base(),
            retry_initial_delay: default_retry_initial_delay(),
            retry_backoff_max: default_retry_backoff_max(),
            default_timeout: None,
            metrics_enabled: true,
            metrics_port: default_metrics_port(),
            metrics_host: default_metrics_host(),
            log_level: default_log_level(),
            log_format: default_log_format(),
            retention_days: default_retention_days(),
            cleanup_enabled: false,
            cleanup_schedule: default_cleanup_schedule(),
        }
    }
}

impl OrchestratorConfig {
    /// Load configuration from a YAML file, then overlay the environment
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("failed to read {}: {e}", path.display())))?;

        let mut config: Self = serde_yaml::from_str(&contents)
            .map_err(|e| Error::Config(format!("failed to parse {}: {e}", path.display())))?;

        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Build configuration from the environment alone
    ///
    /// Honours `TASKMILL_CONFIG` as a file path, then probes the default
    /// locations, then falls back to pure defaults plus env overrides.
    pub fn from_env() -> Result<Self> {
        if let Ok(path) = std::env::var("TASKMILL_CONFIG") {
            return Self::load(path);
        }

        for path in ["./taskmill.yaml", "/etc/taskmill/config.yaml"] {
            if Path::new(path).exists() {
                return Self::load(path);
            }
        }

        let mut config = Self::default();
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Overlay `TASKMILL_*` environment variables onto this config
    fn apply_env_overrides(&mut self) -> Result<()> {
        if let Some(value) = env_var("TASKMILL_DATABASE_URL") {
            self.database_url = value;
        }
        if let Some(value) = env_var("TASKMILL_MAX_ASYNC_CONCURRENT") {
            self.max_async_concurrent = parse_env("TASKMILL_MAX_ASYNC_CONCURRENT", &value)?;
        }
        if let Some(value) = env_var("TASKMILL_THREAD_POOL_SIZE") {
            self.thread_pool_size = parse_env("TASKMILL_THREAD_POOL_SIZE", &value)?;
        }
        if let Some(value) = env_var("TASKMILL_PROCESS_POOL_SIZE") {
            self.process_pool_size = Some(parse_env("TASKMILL_PROCESS_POOL_SIZE", &value)?);
        }
        if let Some(value) = env_var("TASKMILL_SCHEDULER_TICK_SECONDS") {
            self.scheduler_tick_seconds = parse_env("TASKMILL_SCHEDULER_TICK_SECONDS", &value)?;
        }
        if let Some(value) = env_var("TASKMILL_QUEUE_MAX_DEPTH") {
            self.queue_max_depth = parse_env("TASKMILL_QUEUE_MAX_DEPTH", &value)?;
        }
        if let Some(value) = env_var("TASKMILL_DEFAULT_MAX_RETRIES") {
            self.default_max_retries = parse_env("TASKMILL_DEFAULT_MAX_RETRIES", &value)?;
        }
        if let Some(value) = env_var("TASKMILL_DB_POOL_SIZE") {
            self.db_pool_size = parse_env("TASKMILL_DB_POOL_SIZE", &value)?;
        }
        if let Some(value) = env_var("TASKMILL_RETRY_BACKOFF_BASE") {
            self.retry_backoff_base = parse_env("TASKMILL_RETRY_BACKOFF_BASE", &value)?;
        }
        if let Some(value) = env_var("TASKMILL_RETRY_INITIAL_DELAY") {
            self.retry_initial_delay = parse_env("TASKMILL_RETRY_INITIAL_DELAY", &value)?;
        }
        if let Some(value) = env_var("TASKMILL_RETRY_BACKOFF_MAX") {
            self.retry_backoff_max = parse_env("TASKMILL_RETRY_BACKOFF_MAX", &value)?;
        }
        if let Some(value) = env_var("TASKMILL_DEFAULT_TIMEOUT") {
            self.default_timeout = Some(parse_env("TASKMILL_DEFAULT_TIMEOUT", &value)?);
        }
        if let Some(value) = env_var("TASKMILL_METRICS_ENABLED") {
            self.metrics_enabled = parse_env("TASKMILL_METRICS_ENABLED", &value)?;
        }
        if let Some(value) = env_var("TASKMILL_METRICS_PORT") {
            self.metrics_port = parse_env("TASKMILL_METRICS_PORT", &value)?;
        }
        if let Some(value) = env_var("TASKMILL_METRICS_HOST") {
            self.metrics_host = value;
        }
        if let Some(value) = env_var("TASKMILL_LOG_LEVEL") {
            self.log_level = value;
        }
        if let Some(value) = env_var("TASKMILL_LOG_FORMAT") {
            self.log_format = match value.to_lowercase().as_str() {
                "json" => LogFormat::Json,
                "text" => LogFormat::Text,
                other => {
                    return Err(Error::Config(format!(
                        "TASKMILL_LOG_FORMAT must be json or text, got {other:?}"
                    )))
                }
            };
        }
        if let Some(value) = env_var("TASKMILL_RETENTION_DAYS") {
            self.retention_days = parse_env("TASKMILL_RETENTION_DAYS", &value)?;
        }
        if let Some(value) = env_var("TASKMILL_CLEANUP_ENABLED") {
            self.cleanup_enabled = parse_env("TASKMILL_CLEANUP_ENABLED", &value)?;
        }
        if let Some(value) = env_var("TASKMILL_CLEANUP_SCHEDULE") {
            self.cleanup_schedule = value;
        }
        Ok(())
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.database_url.is_empty() {
            return Err(Error::Config("database_url must not be empty".into()));
        }
        if self.db_pool_size == 0 {
            return Err(Error::Config("db_pool_size must be > 0".into()));
        }
        if self.max_async_concurrent == 0 {
            return Err(Error::Config("max_async_concurrent must be > 0".into()));
        }
        if self.thread_pool_size == 0 {
            return Err(Error::Config("thread_pool_size must be > 0".into()));
        }
        if self.process_pool_size == Some(0) {
            return Err(Error::Config("process_pool_size must be > 0".into()));
        }
        if self.scheduler_tick_seconds == 0 {
            return Err(Error::Config("scheduler_tick_seconds must be > 0".into()));
        }
        if self.retry_backoff_base <= 1.0 {
            return Err(Error::Config("retry_backoff_base must be > 1.0".into()));
        }
        if self.retry_initial_delay <= 0.0 {
            return Err(Error::Config("retry_initial_delay must be > 0".into()));
        }
        if self.retry_backoff_max <= 0.0 {
            return Err(Error::Config("retry_backoff_max must be > 0".into()));
        }

        let level = self.log_level.to_lowercase();
        let valid_level = matches!(
            level.as_str(),
            "debug" | "info" | "warning" | "warn" | "error" | "critical"
        );
        if !valid_level {
            return Err(Error::Config(format!(
                "log_level must be one of debug, info, warning, error, critical; got {:?}",
                self.log_level
            )));
        }
        Ok(())
    }

    /// Effective process pool size, defaulting to the CPU count
    pub fn effective_process_pool_size(&self) -> usize {
        self.process_pool_size.unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4)
        })
    }
}

fn env_var(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .parse()
        .map_err(|_| Error::Config(format!("invalid value for {key}: {value:?}")))
}

//! Durable persistence for jobs, executions and schedules
//!
//! A single file-backed SQLite database accessed through one connection
//! pool. All writes are transactional at statement granularity; foreign
//! keys are enforced. Single-writer operation is assumed (SQLite file
//! locking serialises concurrent writers).

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use std::str::FromStr;

use crate::error::{Error, Result};
use crate::execution::{Execution, ExecutionFilter, ExecutionStatus};
use crate::job::{Job, JobKind, NewJob};

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS jobs (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        name TEXT NOT NULL UNIQUE,
        function_path TEXT NOT NULL,
        args_json TEXT,
        kwargs_json TEXT,
        job_type TEXT NOT NULL,
        max_retries INTEGER DEFAULT 3,
        timeout_seconds INTEGER,
        idempotency_key TEXT UNIQUE,
        created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
        updated_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS executions (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        job_id INTEGER NOT NULL,
        status TEXT NOT NULL,
        attempt INTEGER DEFAULT 1,
        started_at TIMESTAMP,
        completed_at TIMESTAMP,
        duration_seconds REAL,
        result_json TEXT,
        error_message TEXT,
        traceback TEXT,
        FOREIGN KEY (job_id) REFERENCES jobs (id)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS schedules (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        job_id INTEGER NOT NULL,
        cron_expression TEXT,
        run_at TIMESTAMP,
        enabled BOOLEAN DEFAULT 1,
        created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
        FOREIGN KEY (job_id) REFERENCES jobs (id),
        CHECK ((cron_expression IS NULL) <> (run_at IS NULL)),
        UNIQUE (job_id, cron_expression, run_at)
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_executions_status ON executions(status)",
    "CREATE INDEX IF NOT EXISTS idx_executions_job_id ON executions(job_id)",
    "CREATE INDEX IF NOT EXISTS idx_executions_started_at ON executions(started_at)",
    "CREATE INDEX IF NOT EXISTS idx_jobs_idempotency_key ON jobs(idempotency_key)",
];

/// A persisted time trigger bound to a job
#[derive(Debug, Clone)]
pub struct Schedule {
    /// Unique schedule id
    pub id: i64,

    /// Id of the triggered job
    pub job_id: i64,

    /// Five-field cron expression, exclusive with `run_at`
    pub cron_expression: Option<String>,

    /// One-shot firing instant, exclusive with `cron_expression`
    pub run_at: Option<DateTime<Utc>>,

    /// Whether the scheduler considers this trigger
    pub enabled: bool,
}

/// Filters for listing schedules
#[derive(Debug, Default, Clone)]
pub struct ScheduleFilter {
    /// Restrict to one job
    pub job_id: Option<i64>,

    /// Restrict to enabled or disabled triggers
    pub enabled: Option<bool>,
}

#[derive(sqlx::FromRow)]
struct JobRow {
    id: i64,
    name: String,
    function_path: String,
    args_json: Option<String>,
    kwargs_json: Option<String>,
    job_type: String,
    max_retries: i64,
    timeout_seconds: Option<i64>,
    idempotency_key: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<JobRow> for Job {
    type Error = Error;

    fn try_from(row: JobRow) -> Result<Self> {
        let args: Vec<Value> = match row.args_json.as_deref() {
            Some(raw) => serde_json::from_str(raw)?,
            None => Vec::new(),
        };
        let kwargs: Map<String, Value> = match row.kwargs_json.as_deref() {
            Some(raw) => serde_json::from_str(raw)?,
            None => Map::new(),
        };

        Ok(Job {
            id: row.id,
            name: row.name,
            function_ref: row.function_path,
            args,
            kwargs,
            kind: JobKind::from_str(&row.job_type)?,
            max_retries: row.max_retries.max(0) as u32,
            timeout_seconds: row.timeout_seconds.map(|t| t.max(0) as u64),
            idempotency_key: row.idempotency_key,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct ExecutionRow {
    id: i64,
    job_id: i64,
    status: String,
    attempt: i64,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
    duration_seconds: Option<f64>,
    result_json: Option<String>,
    error_message: Option<String>,
    traceback: Option<String>,
}

impl TryFrom<ExecutionRow> for Execution {
    type Error = Error;

    fn try_from(row: ExecutionRow) -> Result<Self> {
        let result = match row.result_json.as_deref() {
            Some(raw) => Some(serde_json::from_str(raw)?),
            None => None,
        };

        Ok(Execution {
            id: row.id,
            job_id: row.job_id,
            status: ExecutionStatus::from_str(&row.status)?,
            attempt: row.attempt.max(0) as u32,
            started_at: row.started_at,
            completed_at: row.completed_at,
            duration_seconds: row.duration_seconds,
            result,
            error_message: row.error_message,
            traceback: row.traceback,
        })
    }
}

#[derive(sqlx::FromRow)]
struct ScheduleRow {
    id: i64,
    job_id: i64,
    cron_expression: Option<String>,
    run_at: Option<DateTime<Utc>>,
    enabled: bool,
}

impl From<ScheduleRow> for Schedule {
    fn from(row: ScheduleRow) -> Self {
        Schedule {
            id: row.id,
            job_id: row.job_id,
            cron_expression: row.cron_expression,
            run_at: row.run_at,
            enabled: row.enabled,
        }
    }
}

/// SQLite-backed store for jobs, executions and schedules
pub struct Store {
    pool: SqlitePool,
}

impl Store {
    /// Open the database and apply the schema
    pub async fn connect(database_url: &str, pool_size: u32) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(database_url)
            .map_err(Error::Store)?
            .create_if_missing(true)
            .foreign_keys(true);

        // An in-memory database exists per connection, so it needs a
        // single pinned connection to stay coherent.
        let in_memory = database_url.contains(":memory:");
        let max_connections = if in_memory { 1 } else { pool_size };
        let min_connections = if in_memory { 1 } else { 0 };

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .min_connections(min_connections)
            .connect_with(options)
            .await?;

        for statement in SCHEMA {
            sqlx::query(statement).execute(&pool).await?;
        }

        Ok(Self { pool })
    }

    /// Access the underlying pool
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    // ------------------------------------------------------------------
    // Jobs
    // ------------------------------------------------------------------

    /// Persist a new job definition and return it with its assigned id
    pub async fn create_job(&self, new: &NewJob, max_retries: u32) -> Result<Job> {
        let args_json = serde_json::to_string(&new.args)?;
        let kwargs_json = serde_json::to_string(&new.kwargs)?;
        let now = Utc::now();

        let inserted = sqlx::query(
            r#"
            INSERT INTO jobs (
                name, function_path, args_json, kwargs_json,
                job_type, max_retries, timeout_seconds, idempotency_key,
                created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&new.name)
        .bind(&new.function_ref)
        .bind(&args_json)
        .bind(&kwargs_json)
        .bind(new.kind.as_str())
        .bind(max_retries as i64)
        .bind(new.timeout_seconds.map(|t| t as i64))
        .bind(&new.idempotency_key)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| map_unique_violation(e, new))?;

        let id = inserted.last_insert_rowid();
        Ok(Job {
            id,
            name: new.name.clone(),
            function_ref: new.function_ref.clone(),
            args: new.args.clone(),
            kwargs: new.kwargs.clone(),
            kind: new.kind,
            max_retries,
            timeout_seconds: new.timeout_seconds,
            idempotency_key: new.idempotency_key.clone(),
            created_at: now,
            updated_at: now,
        })
    }

    /// Fetch a job by id
    pub async fn get_job(&self, job_id: i64) -> Result<Option<Job>> {
        let row = sqlx::query_as::<_, JobRow>("SELECT * FROM jobs WHERE id = ?")
            .bind(job_id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(Job::try_from).transpose()
    }

    /// Fetch a job by its unique name
    pub async fn get_job_by_name(&self, name: &str) -> Result<Option<Job>> {
        let row = sqlx::query_as::<_, JobRow>("SELECT * FROM jobs WHERE name = ?")
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;

        row.map(Job::try_from).transpose()
    }

    /// Delete a job; returns whether a row was removed
    pub async fn delete_job(&self, job_id: i64) -> Result<bool> {
        let result = sqlx::query("DELETE FROM jobs WHERE id = ?")
            .bind(job_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    // ------------------------------------------------------------------
    // Executions
    // ------------------------------------------------------------------

    /// Insert a PENDING execution for the given attempt and return its id
    pub async fn create_execution(&self, job_id: i64, attempt: u32) -> Result<i64> {
        let inserted = sqlx::query(
            r#"
            INSERT INTO executions (job_id, status, attempt, started_at)
            VALUES (?, ?, ?, ?)
            "#,
        )
        .bind(job_id)
        .bind(ExecutionStatus::Pending.as_str())
        .bind(attempt as i64)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        Ok(inserted.last_insert_rowid())
    }

    /// Transition an execution to RUNNING
    pub async fn mark_execution_running(&self, execution_id: i64) -> Result<bool> {
        let result = sqlx::query("UPDATE executions SET status = ? WHERE id = ?")
            .bind(ExecutionStatus::Running.as_str())
            .bind(execution_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Write back a full execution record
    pub async fn update_execution(&self, execution: &Execution) -> Result<bool> {
        let result_json = execution
            .result
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        let result = sqlx::query(
            r#"
            UPDATE executions
            SET status = ?,
                attempt = ?,
                completed_at = ?,
                duration_seconds = ?,
                result_json = ?,
                error_message = ?,
                traceback = ?
            WHERE id = ?
            "#,
        )
        .bind(execution.status.as_str())
        .bind(execution.attempt as i64)
        .bind(execution.completed_at)
        .bind(execution.duration_seconds)
        .bind(result_json)
        .bind(&execution.error_message)
        .bind(&execution.traceback)
        .bind(execution.id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Fetch an execution by id
    pub async fn get_execution(&self, execution_id: i64) -> Result<Option<Execution>> {
        let row = sqlx::query_as::<_, ExecutionRow>("SELECT * FROM executions WHERE id = ?")
            .bind(execution_id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(Execution::try_from).transpose()
    }

    /// List executions, newest first
    pub async fn list_executions(
        &self,
        filter: &ExecutionFilter,
        limit: u32,
    ) -> Result<Vec<Execution>> {
        let mut sql = String::from("SELECT * FROM executions WHERE 1=1");
        if filter.job_id.is_some() {
            sql.push_str(" AND job_id = ?");
        }
        if filter.status.is_some() {
            sql.push_str(" AND status = ?");
        }
        sql.push_str(" ORDER BY started_at DESC, id DESC LIMIT ?");

        let mut query = sqlx::query_as::<_, ExecutionRow>(&sql);
        if let Some(job_id) = filter.job_id {
            query = query.bind(job_id);
        }
        if let Some(status) = filter.status {
            query = query.bind(status.as_str());
        }
        query = query.bind(limit as i64);

        let rows = query.fetch_all(&self.pool).await?;
        rows.into_iter().map(Execution::try_from).collect()
    }

    /// Most recent SUCCESS execution of the job carrying `idempotency_key`
    pub async fn find_success_by_idempotency_key(&self, key: &str) -> Result<Option<Execution>> {
        let row = sqlx::query_as::<_, ExecutionRow>(
            r#"
            SELECT e.* FROM executions e
            JOIN jobs j ON j.id = e.job_id
            WHERE j.idempotency_key = ? AND e.status = ?
            ORDER BY e.completed_at DESC, e.id DESC
            LIMIT 1
            "#,
        )
        .bind(key)
        .bind(ExecutionStatus::Success.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.map(Execution::try_from).transpose()
    }

    /// Count executions per status, for diagnostics
    pub async fn execution_status_counts(&self) -> Result<Vec<(String, i64)>> {
        let rows =
            sqlx::query("SELECT status, COUNT(*) AS count FROM executions GROUP BY status")
                .fetch_all(&self.pool)
                .await?;

        rows.iter()
            .map(|row| -> Result<(String, i64)> {
                Ok((row.try_get("status")?, row.try_get("count")?))
            })
            .collect()
    }

    /// Recovery helper: fail every RUNNING execution
    ///
    /// Returns the number of rows swept.
    pub async fn mark_running_as_failed(&self) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE executions
            SET status = ?, error_message = ?, completed_at = ?
            WHERE status = ?
            "#,
        )
        .bind(ExecutionStatus::Failed.as_str())
        .bind("orphaned by restart")
        .bind(Utc::now())
        .bind(ExecutionStatus::Running.as_str())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    // ------------------------------------------------------------------
    // Schedules
    // ------------------------------------------------------------------

    /// Persist a schedule; exactly one of cron/run_at must be set
    pub async fn create_schedule(
        &self,
        job_id: i64,
        cron_expression: Option<&str>,
        run_at: Option<DateTime<Utc>>,
        enabled: bool,
    ) -> Result<i64> {
        if cron_expression.is_some() == run_at.is_some() {
            return Err(Error::InvalidScheduleSpec);
        }

        let inserted = sqlx::query(
            r#"
            INSERT INTO schedules (job_id, cron_expression, run_at, enabled)
            VALUES (?, ?, ?, ?)
            "#,
        )
        .bind(job_id)
        .bind(cron_expression)
        .bind(run_at)
        .bind(enabled)
        .execute(&self.pool)
        .await?;

        Ok(inserted.last_insert_rowid())
    }

    /// List schedules matching the filter
    pub async fn list_schedules(&self, filter: &ScheduleFilter) -> Result<Vec<Schedule>> {
        let mut sql = String::from(
            "SELECT id, job_id, cron_expression, run_at, enabled FROM schedules WHERE 1=1",
        );
        if filter.job_id.is_some() {
            sql.push_str(" AND job_id = ?");
        }
        if filter.enabled.is_some() {
            sql.push_str(" AND enabled = ?");
        }
        sql.push_str(" ORDER BY id");

        let mut query = sqlx::query_as::<_, ScheduleRow>(&sql);
        if let Some(job_id) = filter.job_id {
            query = query.bind(job_id);
        }
        if let Some(enabled) = filter.enabled {
            query = query.bind(enabled);
        }

        let rows = query.fetch_all(&self.pool).await?;
        Ok(rows.into_iter().map(Schedule::from).collect())
    }

    /// Flip a schedule's enabled flag; returns whether a row changed
    pub async fn set_schedule_enabled(&self, schedule_id: i64, enabled: bool) -> Result<bool> {
        let result = sqlx::query("UPDATE schedules SET enabled = ? WHERE id = ?")
            .bind(enabled)
            .bind(schedule_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Delete a schedule; returns whether a row was removed
    pub async fn delete_schedule(&self, schedule_id: i64) -> Result<bool> {
        let result = sqlx::query("DELETE FROM schedules WHERE id = ?")
            .bind(schedule_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

/// Translate SQLite UNIQUE violations into the job-creation errors
fn map_unique_violation(error: sqlx::Error, new: &NewJob) -> Error {
    if let sqlx::Error::Database(db) = &error {
        let message = db.message();
        if message.contains("jobs.name") {
            return Error::DuplicateName(new.name.clone());
        }
        if message.contains("jobs.idempotency_key") {
            return Error::DuplicateIdempotencyKey(
                new.idempotency_key.clone().unwrap_or_default(),
            );
        }
    }
    Error::Store(error)
}

use clap::{Parser, Subcommand};
use colored::Colorize;
use prettytable::{row, Table};
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use taskmill_core::{
    logging, run_worker, Error, ExecutionFilter, ExecutionStatus, FunctionRegistry, JobKind,
    NewJob, Orchestrator, OrchestratorConfig, ScheduleFilter,
};

mod demo;

#[derive(Parser)]
#[command(
    name = "taskmill",
    version,
    about = "Persistent job orchestration engine"
)]
struct Cli {
    /// Path to the YAML configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Store location, e.g. sqlite://jobs.db
    #[arg(long, global = true)]
    db: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the orchestrator as a long-lived server
    Start,

    /// Execute a job immediately
    Run {
        /// Registered function reference (module.symbol)
        function: String,

        /// Unique job name
        #[arg(long)]
        name: String,

        /// Positional arguments as a JSON array, e.g. '[1, 2]'
        #[arg(long)]
        args: Option<String>,

        /// Named arguments as a JSON object, e.g. '{"key": "value"}'
        #[arg(long)]
        kwargs: Option<String>,

        /// Job kind: inline, cooperative, thread or process
        #[arg(long = "type", default_value = "inline")]
        job_type: String,

        /// Retries after the first attempt
        #[arg(long)]
        retries: Option<u32>,

        /// Timeout in seconds
        #[arg(long)]
        timeout: Option<u64>,

        /// Idempotency key
        #[arg(long)]
        idempotency_key: Option<String>,
    },

    /// Register a job and bind a cron schedule to it
    Schedule {
        /// Registered function reference (module.symbol)
        function: String,

        /// Cron expression or named alias, e.g. '*/5 * * * *' or hourly
        cron: String,

        /// Unique job name
        #[arg(long)]
        name: String,

        /// Positional arguments as a JSON array
        #[arg(long)]
        args: Option<String>,

        /// Named arguments as a JSON object
        #[arg(long)]
        kwargs: Option<String>,

        /// Job kind: inline, cooperative, thread or process
        #[arg(long = "type", default_value = "inline")]
        job_type: String,

        /// Retries after the first attempt
        #[arg(long)]
        retries: Option<u32>,

        /// Timeout in seconds
        #[arg(long)]
        timeout: Option<u64>,
    },

    /// List recent executions
    List {
        /// Filter by status: PENDING, RUNNING, SUCCESS, FAILED, TIMEOUT
        #[arg(long)]
        status: Option<String>,

        /// Maximum rows to show
        #[arg(long, default_value_t = 20)]
        limit: u32,
    },

    /// Show execution counts, schedules and queue depth
    Status,

    /// Internal worker mode used by the process executor
    #[command(hide = true)]
    Worker,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let code = match run(cli).await {
        Ok(code) => code,
        Err(error) => {
            eprintln!("{} {error}", "error:".red().bold());
            if error.is_user_error() {
                1
            } else {
                2
            }
        }
    };
    std::process::exit(code);
}

async fn run(cli: Cli) -> taskmill_core::Result<i32> {
    let mut config = match &cli.config {
        Some(path) => OrchestratorConfig::load(path)?,
        None => OrchestratorConfig::from_env()?,
    };
    if let Some(db) = &cli.db {
        config.database_url = db.clone();
    }

    let registry = Arc::new(FunctionRegistry::new());
    demo::register_builtins(&registry);

    // The worker talks JSON over stdout, so it must not log there
    if let Commands::Worker = cli.command {
        return Ok(run_worker(&registry).await);
    }

    logging::init(&config)?;
    tracing::debug!(database_url = %config.database_url, "configuration loaded");

    match cli.command {
        Commands::Worker => unreachable!("handled above"),

        Commands::Start => {
            let orchestrator = Arc::new(Orchestrator::new(config, registry).await?);
            let swept = orchestrator.clone().start().await?;

            println!("Taskmill started");
            if swept > 0 {
                println!("Recovered {swept} orphaned execution(s)");
            }
            println!("Press Ctrl+C to stop");

            tokio::signal::ctrl_c()
                .await
                .map_err(|e| Error::Shutdown(format!("failed to wait for Ctrl+C: {e}")))?;
            println!("\nStopping...");
            orchestrator.stop().await?;
            Ok(0)
        }

        Commands::Run {
            function,
            name,
            args,
            kwargs,
            job_type,
            retries,
            timeout,
            idempotency_key,
        } => {
            let new_job = build_new_job(
                function,
                name,
                args,
                kwargs,
                &job_type,
                retries,
                timeout,
                idempotency_key,
            )?;

            let orchestrator = Orchestrator::new(config, registry).await?;
            let job = orchestrator.add_job(new_job).await?;
            println!("Job '{}' created (id: {})", job.name, job.id);

            let execution = orchestrator.execute(&job).await?;
            match execution.status {
                ExecutionStatus::Success => {
                    println!("{}", "SUCCESS".green().bold());
                    if let Some(result) = &execution.result {
                        println!("Result: {result}");
                    }
                    Ok(0)
                }
                status => {
                    println!("{}", status.to_string().red().bold());
                    if let Some(message) = &execution.error_message {
                        println!("Error: {message}");
                    }
                    Ok(1)
                }
            }
        }

        Commands::Schedule {
            function,
            cron,
            name,
            args,
            kwargs,
            job_type,
            retries,
            timeout,
        } => {
            let new_job = build_new_job(function, name, args, kwargs, &job_type, retries, timeout, None)?;

            let orchestrator = Orchestrator::new(config, registry).await?;
            let job = orchestrator.add_job(new_job).await?;
            let schedule_id = orchestrator
                .schedule(job.id, Some(&cron), None, true)
                .await?;

            println!(
                "Job '{}' scheduled with '{}' (schedule id: {})",
                job.name, cron, schedule_id
            );
            println!("Run 'taskmill start' to begin executing schedules");
            Ok(0)
        }

        Commands::List { status, limit } => {
            let filter = match status {
                Some(raw) => {
                    ExecutionFilter::new().with_status(ExecutionStatus::from_str(&raw).map_err(
                        |_| Error::Config(format!("unknown status filter: {raw}")),
                    )?)
                }
                None => ExecutionFilter::new(),
            };

            let orchestrator = Orchestrator::new(config, registry).await?;
            let executions = orchestrator.list_executions(&filter, limit).await?;

            if executions.is_empty() {
                println!("No executions found");
                return Ok(0);
            }

            let mut table = Table::new();
            table.add_row(row!["ID", "JOB", "STATUS", "ATTEMPT", "STARTED", "DURATION", "ERROR"]);
            for execution in &executions {
                let started = execution
                    .started_at
                    .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
                    .unwrap_or_default();
                let duration = execution
                    .duration_seconds
                    .map(|d| format!("{d:.3}s"))
                    .unwrap_or_default();
                table.add_row(row![
                    execution.id,
                    execution.job_id,
                    execution.status,
                    execution.attempt,
                    started,
                    duration,
                    execution.error_message.as_deref().unwrap_or(""),
                ]);
            }
            table.printstd();
            Ok(0)
        }

        Commands::Status => {
            let orchestrator = Orchestrator::new(config, registry).await?;

            let counts = orchestrator.execution_status_counts().await?;
            let schedules = orchestrator
                .list_schedules(&ScheduleFilter::default())
                .await?;

            println!(
                "Status at {}",
                chrono::Utc::now().format("%Y-%m-%d %H:%M:%S UTC")
            );
            println!("Executions:");
            if counts.is_empty() {
                println!("  (none)");
            }
            for (status, count) in counts {
                println!("  {status}: {count}");
            }
            println!("Schedules: {}", schedules.len());
            println!("Queue depth: {}", orchestrator.queue_depth());
            Ok(0)
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn build_new_job(
    function: String,
    name: String,
    args: Option<String>,
    kwargs: Option<String>,
    job_type: &str,
    retries: Option<u32>,
    timeout: Option<u64>,
    idempotency_key: Option<String>,
) -> taskmill_core::Result<NewJob> {
    let kind = JobKind::from_str(job_type)?;

    let args = match args {
        Some(raw) => serde_json::from_str(&raw)
            .map_err(|e| Error::Config(format!("--args must be a JSON array: {e}")))?,
        None => Vec::new(),
    };
    let kwargs = match kwargs {
        Some(raw) => serde_json::from_str(&raw)
            .map_err(|e| Error::Config(format!("--kwargs must be a JSON object: {e}")))?,
        None => serde_json::Map::new(),
    };

    Ok(NewJob {
        name,
        function_ref: function,
        args,
        kwargs,
        kind,
        max_retries: retries,
        timeout_seconds: timeout,
        idempotency_key,
    })
}

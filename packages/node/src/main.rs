//! `sentinel`: runs queue nodes and operates on jobs from the command line.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use clap::{Parser, ValueEnum};
use sentinel_actors::{
    JobService, PromoterConfig, QueueContext, QueueMetrics, RuntimeConfig, SubmitRequest,
    SupervisorArgs, SupervisorMessage, WorkerConfig, start_supervisor,
};
use sentinel_core::{DEFAULT_MAX_RETRIES, Job, JobId, JobStatus};
use sentinel_db::{DbConfig, JobFilter, MemoryStore, Store, SurrealStore};
use serde::Serialize;

mod handlers;
mod telemetry;

#[derive(Parser, Debug)]
#[command(name = "sentinel")]
#[command(version)]
#[command(about = "A job queue with delayed scheduling and pull-based workers")]
#[command(propagate_version = true)]
struct Args {
    #[command(flatten)]
    store: StoreArgs,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    log_json: bool,

    /// Output format for job commands
    #[arg(long, short = 'o', global = true, default_value = "table")]
    output: OutputFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Args, Debug)]
struct StoreArgs {
    /// Store endpoint: "mem://", "rocksdb://path" or "ws://host:port"
    #[arg(long = "store", env = "SENTINEL_STORE", default_value = "mem://", global = true)]
    endpoint: String,

    /// SurrealDB namespace
    #[arg(long, env = "SENTINEL_NAMESPACE", default_value = "sentinel", global = true)]
    namespace: String,

    /// SurrealDB database
    #[arg(long, env = "SENTINEL_DATABASE", default_value = "jobs", global = true)]
    database: String,

    /// Root credentials as "user:password"
    #[arg(long, env = "SENTINEL_CREDENTIALS", global = true)]
    credentials: Option<String>,
}

#[derive(Debug, Clone, ValueEnum)]
enum OutputFormat {
    Table,
    Json,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Run promoters and workers until interrupted
    Run(RunArgs),

    /// Submit a job
    Submit {
        /// Job type, used to pick the handler
        job_type: String,

        /// JSON payload
        #[arg(long, default_value = "{}")]
        payload: String,

        /// Run the job this many seconds from now
        #[arg(long, value_parser = parse_seconds)]
        delay: Option<Duration>,

        /// Deduplicate submissions with the same key
        #[arg(long)]
        idempotency_key: Option<String>,

        /// Automatic retries after a failed attempt
        #[arg(long, default_value_t = DEFAULT_MAX_RETRIES)]
        max_retries: u32,
    },

    /// Show one job
    Get {
        /// The job ID (ULID)
        id: JobId,
    },

    /// List jobs, oldest first
    List {
        #[arg(long)]
        status: Option<StatusArg>,

        #[arg(long = "type")]
        job_type: Option<String>,

        #[arg(long)]
        limit: Option<usize>,
    },

    /// Cancel a job
    Cancel {
        /// The job ID (ULID)
        id: JobId,
    },

    /// Re-queue a job with a fresh attempt budget
    Retry {
        /// The job ID (ULID)
        id: JobId,
    },

    /// Print queue depths and job counts in Prometheus text format
    Metrics,
}

#[derive(clap::Args, Debug)]
struct RunArgs {
    /// Prefix for worker ids
    #[arg(long, env = "SENTINEL_NODE_ID", default_value = "worker")]
    node_id: String,

    /// Worker replicas
    #[arg(long, env = "WORKERS", default_value_t = 4)]
    workers: usize,

    /// Promoter replicas
    #[arg(long, env = "PROMOTERS", default_value_t = 1)]
    promoters: usize,

    /// Promoter poll interval in seconds
    #[arg(long, env = "POLL_SECONDS", default_value = "0.5", value_parser = parse_seconds)]
    poll_seconds: Duration,

    /// Worker poll interval in seconds
    #[arg(long, env = "WORKER_POLL_SECONDS", default_value = "0.5", value_parser = parse_seconds)]
    worker_poll_seconds: Duration,

    /// Scheduled members popped per promoter tick
    #[arg(
        long,
        env = "BATCH_SIZE",
        default_value_t = 100,
        value_parser = clap::builder::RangedU64ValueParser::<usize>::new().range(1..)
    )]
    batch_size: usize,

    /// Handler time limit in seconds
    #[arg(long, env = "EXECUTION_TIMEOUT_SECONDS", default_value = "300", value_parser = parse_seconds)]
    execution_timeout: Duration,

    /// Base retry delay in seconds, doubled per attempt; 0 retries immediately
    #[arg(long, env = "RETRY_BACKOFF_SECONDS", default_value = "0", value_parser = parse_seconds)]
    retry_backoff: Duration,

    /// Submit a few demo jobs after start
    #[arg(long)]
    demo: bool,
}

impl RunArgs {
    fn runtime_config(&self) -> RuntimeConfig {
        RuntimeConfig::default()
            .with_workers(self.workers)
            .with_promoters(self.promoters)
            .with_promoter(
                PromoterConfig::default()
                    .with_poll_interval(self.poll_seconds)
                    .with_batch_size(self.batch_size),
            )
            .with_worker(
                WorkerConfig::default()
                    .with_poll_interval(self.worker_poll_seconds)
                    .with_execution_timeout(self.execution_timeout)
                    .with_retry_backoff(self.retry_backoff),
            )
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum StatusArg {
    Queued,
    Scheduled,
    Running,
    Completed,
    Cancelled,
    Failed,
}

impl From<StatusArg> for JobStatus {
    fn from(status: StatusArg) -> Self {
        match status {
            StatusArg::Queued => JobStatus::Queued,
            StatusArg::Scheduled => JobStatus::Scheduled,
            StatusArg::Running => JobStatus::Running,
            StatusArg::Completed => JobStatus::Completed,
            StatusArg::Cancelled => JobStatus::Cancelled,
            StatusArg::Failed => JobStatus::Failed,
        }
    }
}

// =============================================================================
// JSON Output Types
// =============================================================================

#[derive(Serialize)]
struct SubmitOutput {
    job_id: String,
    status: JobStatus,
    duplicate: bool,
}

#[derive(Serialize)]
struct JobListOutput<'a> {
    jobs: &'a [Job],
    total_count: usize,
}

// =============================================================================
// Helper Functions
// =============================================================================

fn parse_seconds(value: &str) -> Result<Duration, String> {
    let seconds: f64 = value
        .parse()
        .map_err(|e| format!("invalid number of seconds {:?}: {}", value, e))?;
    Duration::try_from_secs_f64(seconds).map_err(|e| format!("invalid duration {}: {}", value, e))
}

fn db_config(args: &StoreArgs) -> Result<DbConfig, Box<dyn std::error::Error>> {
    let mut config = DbConfig::endpoint(args.endpoint.as_str())
        .with_namespace(args.namespace.as_str())
        .with_database(args.database.as_str());
    if let Some(credentials) = &args.credentials {
        let (username, password) = credentials
            .split_once(':')
            .ok_or("credentials must be formatted as user:password")?;
        config = config.with_credentials(username, password);
    }
    Ok(config)
}

/// Attempts made out of the attempts allowed (first run plus retries).
fn attempts_label(job: &Job) -> String {
    format!("{}/{}", job.attempts, job.max_retries.saturating_add(1))
}

fn print_job(job: &Job, output: &OutputFormat) -> Result<(), Box<dyn std::error::Error>> {
    match output {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(job)?),
        OutputFormat::Table => {
            println!("Job ID:      {}", job.id);
            println!("Type:        {}", job.job_type);
            println!("Status:      {}", job.status);
            println!("Attempts:    {}", attempts_label(job));
            println!("Created:     {}", job.created_at.to_rfc3339());
            if let Some(due_at) = job.due_at {
                println!("Due:         {}", due_at.to_rfc3339());
            }
            if let Some(started_at) = job.started_at {
                println!("Started:     {}", started_at.to_rfc3339());
            }
            if let Some(completed_at) = job.completed_at {
                println!("Completed:   {}", completed_at.to_rfc3339());
            }
            if let Some(failed_at) = job.failed_at {
                println!("Failed:      {}", failed_at.to_rfc3339());
            }
            if let Some(lease) = &job.lease {
                println!(
                    "Lease:       {} until {}",
                    lease.worker_id,
                    lease.expires_at.to_rfc3339()
                );
            }
            if let Some(error) = &job.last_error {
                println!("Last error:  {}", error);
            }
            if let Some(result) = &job.result {
                println!("Result:      {}", result.summary);
            }
            println!("Payload:     {}", job.payload);
        }
    }
    Ok(())
}

fn print_jobs(jobs: &[Job], output: &OutputFormat) -> Result<(), Box<dyn std::error::Error>> {
    match output {
        OutputFormat::Json => {
            let listing = JobListOutput {
                jobs,
                total_count: jobs.len(),
            };
            println!("{}", serde_json::to_string_pretty(&listing)?);
        }
        OutputFormat::Table => {
            if jobs.is_empty() {
                println!("No jobs found");
                return Ok(());
            }
            println!(
                "{:<28} {:<16} {:<10} {:<8} CREATED",
                "JOB ID", "TYPE", "STATUS", "ATTEMPTS"
            );
            for job in jobs {
                println!(
                    "{:<28} {:<16} {:<10} {:<8} {}",
                    job.id,
                    job.job_type,
                    job.status,
                    job.attempts,
                    job.created_at.format("%Y-%m-%d %H:%M:%S")
                );
            }
            println!("\nTotal: {} jobs", jobs.len());
        }
    }
    Ok(())
}

// =============================================================================
// Commands
// =============================================================================

async fn run_node<S: Store>(
    ctx: QueueContext<S>,
    args: RunArgs,
) -> Result<(), Box<dyn std::error::Error>> {
    let metrics = Arc::new(QueueMetrics::new());
    let (event_tx, mut events) = tokio::sync::broadcast::channel(1024);
    let ctx = ctx.with_metrics(metrics.clone()).with_event_tx(event_tx);

    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            tracing::debug!(job_id = %event.job_id(), "{}", event.description());
        }
    });

    let supervisor_args = SupervisorArgs::new(
        ctx.clone(),
        handlers::demo_registry(),
        args.runtime_config(),
    )
    .with_node_id(args.node_id.as_str());
    let (supervisor, handle) = start_supervisor(supervisor_args).await?;

    if args.demo {
        submit_demo_jobs(&JobService::new(ctx.clone())).await?;
    }

    tracing::info!("Node running, press Ctrl-C to stop");
    tokio::signal::ctrl_c().await?;
    tracing::info!("Received Ctrl-C, shutting down");

    supervisor.send_message(SupervisorMessage::Shutdown)?;
    handle.await?;

    tracing::info!("Final metrics\n{}", metrics.render());
    Ok(())
}

async fn submit_demo_jobs<S: Store>(
    service: &JobService<S>,
) -> Result<(), Box<dyn std::error::Error>> {
    let requests = [
        SubmitRequest::new("email", serde_json::json!({ "to": "a@b.com" })),
        SubmitRequest::new("echo", serde_json::json!({ "message": "hello" }))
            .schedule_at(Utc::now() + chrono::Duration::seconds(5)),
        SubmitRequest::new("sleep", serde_json::json!({ "seconds": 2 })),
        SubmitRequest::new("fail", serde_json::json!({})).with_max_retries(1),
    ];
    for request in requests {
        let submission = service.submit(request).await?;
        tracing::info!(job_id = %submission.id, status = %submission.status, "Demo job submitted");
    }
    Ok(())
}

async fn execute<S: Store>(
    store: S,
    command: Commands,
    output: &OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    let ctx = QueueContext::new(store);
    let service = JobService::new(ctx.clone());

    match command {
        Commands::Run(args) => run_node(ctx, args).await?,

        Commands::Submit {
            job_type,
            payload,
            delay,
            idempotency_key,
            max_retries,
        } => {
            let payload: serde_json::Value = serde_json::from_str(&payload)?;
            let mut request = SubmitRequest::new(job_type, payload).with_max_retries(max_retries);
            if let Some(delay) = delay {
                request = request.schedule_at(Utc::now() + chrono::Duration::from_std(delay)?);
            }
            if let Some(key) = idempotency_key {
                request = request.with_idempotency_key(key);
            }

            let submission = service.submit(request).await?;
            match output {
                OutputFormat::Json => {
                    let out = SubmitOutput {
                        job_id: submission.id.to_string(),
                        status: submission.status,
                        duplicate: submission.duplicate,
                    };
                    println!("{}", serde_json::to_string_pretty(&out)?);
                }
                OutputFormat::Table => {
                    if submission.duplicate {
                        println!("Job already submitted with this key");
                    } else {
                        println!("Job submitted successfully");
                    }
                    println!("Job ID: {}", submission.id);
                    println!("Status: {}", submission.status);
                }
            }
        }

        Commands::Get { id } => print_job(&service.get(id).await?, output)?,

        Commands::List {
            status,
            job_type,
            limit,
        } => {
            let filter = JobFilter {
                status: status.map(JobStatus::from),
                job_type,
                limit,
            };
            print_jobs(&service.list(&filter).await?, output)?;
        }

        Commands::Cancel { id } => print_job(&service.cancel(id).await?, output)?,

        Commands::Retry { id } => print_job(&service.retry(id).await?, output)?,

        Commands::Metrics => {
            let depths = service.depths().await?;
            let counts = ctx.repo().count_by_status().await?;

            println!("# HELP queue_depth Ids waiting in each queue structure");
            println!("# TYPE queue_depth gauge");
            println!("queue_depth{{queue=\"ready\"}} {}", depths.ready);
            println!("queue_depth{{queue=\"scheduled\"}} {}", depths.scheduled);
            println!("queue_depth{{queue=\"leased\"}} {}", depths.leased);
            println!("# HELP jobs Job records by status");
            println!("# TYPE jobs gauge");
            let mut counts: Vec<_> = counts.into_iter().collect();
            counts.sort_by_key(|(status, _)| status.as_str());
            for (status, count) in counts {
                println!("jobs{{status=\"{}\"}} {}", status, count);
            }
        }
    }

    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    telemetry::init(args.log_json);

    if args.store.endpoint == "mem://" {
        if !matches!(args.command, Commands::Run(_)) {
            tracing::warn!("mem:// store is private to this process; use --store to share jobs");
        }
        execute(MemoryStore::new(), args.command, &args.output).await
    } else {
        let store = SurrealStore::connect(&db_config(&args.store)?).await?;
        execute(store, args.command, &args.output).await
    }
}

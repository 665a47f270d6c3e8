use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use sift_core::events::{EventSink, EventType, JobEvent, TracingEventSink};
use sift_core::job::{CreateIngestJobRequest, JobPriority, JobStatus, WorkerConfig};
use sift_core::job_queue::JobQueue;
use sift_core::models::ContentItem;
use sift_core::pipeline::IngestPipeline;
use sift_core::rate_limit::TenantRateLimiter;
use sift_core::worker::{TracingWorkerReporter, WorkerService};
use sift_core::CircuitRegistry;
use sift_db::{Database, DatabaseConfig, RedisConfig, RedisRateLimitStore};
use sift_enrich::{HttpAnalyzer, HttpScraper, HttpTextExtractor};

#[derive(Parser)]
#[command(name = "sift", version, about = "Resilient content ingestion pipeline")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run ingestion workers until interrupted
    Worker {
        /// Number of concurrent workers
        #[arg(short = 'n', long, default_value_t = 1)]
        workers: usize,

        /// Base URL of the text-analysis service
        #[arg(long, env = "SIFT_ANALYZER_URL")]
        analyzer_url: String,

        /// Base URL of the image-text-extraction service
        #[arg(long, env = "SIFT_OCR_URL")]
        ocr_url: String,

        /// Base URL of the scraping service
        #[arg(long, env = "SIFT_SCRAPER_URL")]
        scraper_url: String,

        /// Seconds between queue polls when idle
        #[arg(long, default_value_t = 5)]
        poll_interval: u64,
    },

    /// Submit an ingestion job
    Submit {
        /// Tenant the job belongs to
        #[arg(short, long)]
        tenant: String,

        /// Source type label (e.g. "social", "web")
        #[arg(short, long, default_value = "social")]
        source_type: String,

        /// Path to a JSON file containing an array of content items
        #[arg(long)]
        items: Option<PathBuf>,

        /// Source url to scrape (repeatable)
        #[arg(long = "url")]
        urls: Vec<String>,

        /// Job priority: low, normal, or high
        #[arg(short, long, default_value = "normal")]
        priority: String,

        /// Job id to use as idempotency key (generated when omitted)
        #[arg(long)]
        job_id: Option<Uuid>,
    },

    /// Show the state of one job
    Status {
        job_id: Uuid,
    },

    /// Cancel a job that has not finished
    Cancel {
        job_id: Uuid,
    },

    /// List jobs, optionally filtered by tenant and status
    Jobs {
        #[arg(short, long)]
        tenant: Option<String>,

        #[arg(short, long)]
        status: Option<String>,

        #[arg(short, long, default_value_t = 20)]
        limit: u32,
    },

    /// Show a tenant's current rate-limit usage
    Usage {
        tenant: String,
    },

    /// Clear a tenant's rate-limit window
    ResetLimit {
        tenant: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("sift=info".parse()?))
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Worker {
            workers,
            analyzer_url,
            ocr_url,
            scraper_url,
            poll_interval,
        } => {
            cmd_worker(workers, &analyzer_url, &ocr_url, &scraper_url, poll_interval).await?;
        }
        Commands::Submit {
            tenant,
            source_type,
            items,
            urls,
            priority,
            job_id,
        } => {
            cmd_submit(&tenant, &source_type, items, urls, &priority, job_id).await?;
        }
        Commands::Status { job_id } => {
            cmd_status(job_id).await?;
        }
        Commands::Cancel { job_id } => {
            cmd_cancel(job_id).await?;
        }
        Commands::Jobs {
            tenant,
            status,
            limit,
        } => {
            cmd_jobs(tenant.as_deref(), status.as_deref(), limit).await?;
        }
        Commands::Usage { tenant } => {
            cmd_usage(&tenant).await?;
        }
        Commands::ResetLimit { tenant } => {
            cmd_reset_limit(&tenant).await?;
        }
    }

    Ok(())
}

/// Connect to PostgreSQL and run migrations.
async fn connect_db() -> Result<Database> {
    let config = DatabaseConfig::from_env().map_err(|e| anyhow::anyhow!(e))?;
    let db = Database::connect(&config)
        .await
        .context("Failed to connect to database")?;
    db.migrate().await.map_err(|e| anyhow::anyhow!(e))?;
    Ok(db)
}

/// Connect the rate limiter to Redis.
async fn connect_limiter() -> Result<TenantRateLimiter<RedisRateLimitStore>> {
    let config = RedisConfig::from_env().map_err(|e| anyhow::anyhow!(e))?;
    let store = RedisRateLimitStore::connect(&config.url)
        .await
        .context("Failed to connect to Redis")?;
    Ok(TenantRateLimiter::new(store))
}

async fn cmd_worker(
    workers: usize,
    analyzer_url: &str,
    ocr_url: &str,
    scraper_url: &str,
    poll_interval: u64,
) -> Result<()> {
    let db = connect_db().await?;
    let queue = db.job_repo();
    let store = db.insight_repo();

    let analyzer = HttpAnalyzer::new(analyzer_url).map_err(|e| anyhow::anyhow!(e))?;
    let extractor = HttpTextExtractor::new(ocr_url).map_err(|e| anyhow::anyhow!(e))?;
    let scraper = HttpScraper::new(scraper_url).map_err(|e| anyhow::anyhow!(e))?;

    // One breaker per dependency, shared by every worker in the process.
    let circuits = CircuitRegistry::new();
    let cancel = CancellationToken::new();
    let mut handles = Vec::with_capacity(workers);

    for i in 0..workers {
        let pipeline = IngestPipeline::new(
            queue.clone(),
            analyzer.clone(),
            extractor.clone(),
            scraper.clone(),
            store.clone(),
            TracingEventSink,
        )
        .with_circuits(circuits.clone());

        let config = WorkerConfig::default()
            .with_worker_id(format!("worker-{}-{i}", std::process::id()))
            .with_poll_interval(Duration::from_secs(poll_interval));

        let service = WorkerService::new(queue.clone(), pipeline, config, TracingWorkerReporter);
        let token = cancel.clone();
        handles.push(tokio::spawn(async move { service.run(token).await }));
    }

    tracing::info!(workers, "Workers running, press Ctrl-C to stop");
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;
    tracing::info!("Shutdown requested, draining workers");
    cancel.cancel();

    for handle in handles {
        let _ = handle.await;
    }

    Ok(())
}

async fn cmd_submit(
    tenant: &str,
    source_type: &str,
    items_path: Option<PathBuf>,
    urls: Vec<String>,
    priority: &str,
    job_id: Option<Uuid>,
) -> Result<()> {
    let priority: JobPriority = priority
        .parse()
        .map_err(|e: String| anyhow::anyhow!(e))?;

    let items: Vec<ContentItem> = match &items_path {
        Some(path) => {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read items file: {}", path.display()))?;
            serde_json::from_str(&raw).context("Invalid JSON in items file")?
        }
        None => Vec::new(),
    };

    let mut request = CreateIngestJobRequest::new(tenant, source_type)
        .with_priority(priority)
        .with_items(items)
        .with_source_urls(urls);
    if let Some(id) = job_id {
        request = request.with_id(id);
    }
    request.validate().map_err(|e| anyhow::anyhow!(e))?;

    // Admission check before touching the queue.
    let limiter = connect_limiter().await?;
    let decision = limiter.check(tenant).await;
    if !decision.allowed {
        bail!(
            "Rate limit exceeded for tenant '{}': {}/{} units in window, {} remaining, resets at {}",
            tenant,
            decision.current,
            decision.limit,
            decision.remaining,
            decision.reset_at
        );
    }

    let db = connect_db().await?;
    let job = db
        .job_repo()
        .create_job(&request)
        .await
        .map_err(|e| anyhow::anyhow!(e))?;

    TracingEventSink
        .publish(JobEvent::new(EventType::JobAccepted, job.id, tenant))
        .await
        .ok();

    println!("{}", serde_json::to_string_pretty(&job)?);
    Ok(())
}

async fn cmd_status(job_id: Uuid) -> Result<()> {
    let db = connect_db().await?;
    match db.job_repo().get_job(job_id).await.map_err(|e| anyhow::anyhow!(e))? {
        Some(job) => {
            let stored = db
                .insight_repo()
                .count_for_job(job_id)
                .await
                .map_err(|e| anyhow::anyhow!(e))?;
            let mut out = serde_json::to_value(&job)?;
            out["insights_stored"] = serde_json::json!(stored);
            println!("{}", serde_json::to_string_pretty(&out)?);
        }
        None => bail!("No job found with id {job_id}"),
    }
    Ok(())
}

async fn cmd_cancel(job_id: Uuid) -> Result<()> {
    let db = connect_db().await?;
    let cancelled = db
        .job_repo()
        .cancel_job(job_id)
        .await
        .map_err(|e| anyhow::anyhow!(e))?;
    if cancelled {
        tracing::info!(%job_id, "Job cancelled");
    } else {
        bail!("Job {job_id} is unknown or already finished");
    }
    Ok(())
}

async fn cmd_jobs(tenant: Option<&str>, status: Option<&str>, limit: u32) -> Result<()> {
    let status = status
        .map(|s| s.parse::<JobStatus>())
        .transpose()
        .map_err(|e| anyhow::anyhow!(e))?;

    let db = connect_db().await?;
    let jobs = db
        .job_repo()
        .list_jobs(tenant, status, limit)
        .await
        .map_err(|e| anyhow::anyhow!(e))?;

    println!("{}", serde_json::to_string_pretty(&jobs)?);
    Ok(())
}

async fn cmd_usage(tenant: &str) -> Result<()> {
    let limiter = connect_limiter().await?;
    let usage = limiter.usage(tenant).await.map_err(|e| anyhow::anyhow!(e))?;
    println!("{}", serde_json::to_string_pretty(&usage)?);
    Ok(())
}

async fn cmd_reset_limit(tenant: &str) -> Result<()> {
    let limiter = connect_limiter().await?;
    limiter.reset(tenant).await.map_err(|e| anyhow::anyhow!(e))?;
    tracing::info!(tenant, "Rate-limit window cleared");
    Ok(())
}

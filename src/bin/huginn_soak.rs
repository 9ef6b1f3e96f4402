//! huginn-soak: exercise the job queue and content cache under load
//!
//! Starts a worker pool with a synthetic generation handler, submits a
//! batch of generation requests (with deliberate repeats and failures) and
//! prints queue and cache statistics.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use clap::Parser;
use huginn::cache::{CachingHandler, GeneratedContent, GenerationRequest};
use huginn::jobs::{
    GenerationTicket, HandlerResult, Job, JobPriority, JobStatus, SubmitOptions, TaskContext,
    TaskHandler,
};
use huginn::{Config, HuginnError};
use tracing::info;

const TASK_NAME: &str = "generate";

/// Huginn soak test
#[derive(Parser)]
#[command(name = "huginn-soak")]
#[command(version = huginn::PKG_VERSION)]
#[command(about = "Run a synthetic generation workload through huginn")]
struct Args {
    /// Config file (default: ~/.huginn/config.toml, /etc/huginn/config.toml, or built-in defaults)
    #[arg(short, long, env = "HUGINN_CONFIG")]
    config: Option<PathBuf>,

    /// Number of generation requests to submit
    #[arg(short, long, default_value_t = 200)]
    jobs: usize,

    /// Number of distinct requests; the rest are repeats served by the cache
    #[arg(short, long, default_value_t = 50)]
    distinct: usize,

    /// Worker count (overrides the config file)
    #[arg(short, long)]
    workers: Option<usize>,

    /// Fail every n-th handler call (0 = never)
    #[arg(long, default_value_t = 7)]
    fail_every: u64,

    /// Simulated generation latency in milliseconds
    #[arg(long, default_value_t = 20)]
    latency_ms: u64,

    /// How long to wait for each job, in seconds
    #[arg(long, default_value_t = 60)]
    wait_secs: u64,
}

/// Pretends to generate text: reports progress, sleeps, sometimes fails.
struct SyntheticGenerator {
    calls: AtomicU64,
    fail_every: u64,
    latency: Duration,
}

#[async_trait]
impl TaskHandler for SyntheticGenerator {
    async fn run(&self, job: &Job, ctx: TaskContext) -> HandlerResult {
        let call = self.calls.fetch_add(1, Ordering::Relaxed) + 1;
        let request = GenerationRequest::from_parameters(&job.parameters)?;

        for step in 1..=4u32 {
            if ctx.is_cancelled() {
                return Err("cancelled".into());
            }
            tokio::time::sleep(self.latency / 4).await;
            ctx.report_progress(f64::from(step) * 25.0, None).await;
        }

        if self.fail_every > 0 && call % self.fail_every == 0 {
            return Err(format!("synthetic failure on call {call}").into());
        }

        let generated = GeneratedContent::new(
            format!(
                "[{}/{}] generated with {} parameters",
                request.template_id,
                request.style_profile,
                request.parameters.len()
            ),
            request.model_name,
        )
        .with_tokens_used(128)
        .with_generation_time(self.latency.as_secs_f64());
        Ok(serde_json::to_value(generated)?)
    }
}

fn request_for(i: usize, distinct: usize) -> GenerationRequest {
    let n = i % distinct.max(1);
    GenerationRequest::new(format!("template-{}", n % 5), "neutral", "synthetic-1")
        .with_parameter("topic", format!("topic-{n}"))
        .with_parameter("length", 100 + n as u64)
}

fn priority_for(i: usize) -> JobPriority {
    match i % 10 {
        0 => JobPriority::Urgent,
        1 | 2 => JobPriority::High,
        9 => JobPriority::Low,
        _ => JobPriority::Normal,
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialise tracing (default: info; override with RUST_LOG).
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let config = Config::load_or_default(args.config.as_deref())?;
    let workers = args.workers.unwrap_or(config.jobs.workers);

    let cache = Arc::new(config.cache.build_manager());
    let manager = config.jobs.build_manager()?;
    manager.register(
        TASK_NAME,
        CachingHandler::new(
            SyntheticGenerator {
                calls: AtomicU64::new(0),
                fail_every: args.fail_every,
                latency: Duration::from_millis(args.latency_ms),
            },
            cache.clone(),
        ),
    )?;
    manager.start(workers).await?;
    info!(
        workers,
        jobs = args.jobs,
        backend = cache.backend().name(),
        "soak test started"
    );

    let mut queued = Vec::with_capacity(args.jobs);
    let mut served_from_cache = 0usize;
    for i in 0..args.jobs {
        let ticket = manager
            .submit_generation(
                &cache,
                TASK_NAME,
                &request_for(i, args.distinct),
                SubmitOptions::new().priority(priority_for(i)),
            )
            .await?;
        match ticket {
            GenerationTicket::Cached(_) => served_from_cache += 1,
            GenerationTicket::Queued(id) => queued.push(id),
        }
    }

    let wait = Duration::from_secs(args.wait_secs);
    let (mut completed, mut failed, mut timed_out) = (0usize, 0usize, 0usize);
    for id in &queued {
        match manager.wait_for(id, wait).await {
            Ok(snapshot) if snapshot.status == JobStatus::Completed => completed += 1,
            Ok(_) => failed += 1,
            Err(HuginnError::WaitTimedOut(_)) => timed_out += 1,
            Err(e) => return Err(e.into()),
        }
    }

    // A second pass over the distinct requests should be all cache hits.
    let mut second_pass_hits = 0usize;
    for i in 0..args.distinct.min(args.jobs) {
        if let GenerationTicket::Cached(_) = manager
            .submit_generation(
                &cache,
                TASK_NAME,
                &request_for(i, args.distinct),
                SubmitOptions::new(),
            )
            .await?
        {
            second_pass_hits += 1;
        }
    }

    manager.stop().await;

    let queue_stats = manager.stats().await?;
    let cache_stats = cache.stats().await?;
    println!("submitted:          {}", args.jobs);
    println!("served at submit:   {served_from_cache}");
    println!("queued:             {}", queued.len());
    println!("  completed:        {completed}");
    println!("  failed:           {failed}");
    println!("  still running:    {timed_out}");
    println!("second-pass hits:   {second_pass_hits}");
    println!(
        "queue:              pending={} running={} completed={} failed={} cancelled={}",
        queue_stats.pending,
        queue_stats.running,
        queue_stats.completed,
        queue_stats.failed,
        queue_stats.cancelled
    );
    println!(
        "cache ({}):       size={}/{} hits={} misses={} hit_rate={:.1}%",
        cache.backend().name(),
        cache_stats.size,
        cache_stats.capacity,
        cache_stats.hit_count,
        cache_stats.miss_count,
        cache_stats.hit_rate() * 100.0
    );
    Ok(())
}

use std::sync::Arc;

use cadence_core::CadenceConfig;
use cadence_scheduler::{JobRegistry, ScheduleJobManager, TracingObserver};
use clap::Parser;
use tracing::{info, warn};

mod jobs;

#[derive(Parser)]
#[command(name = "cadence")]
#[command(version)]
#[command(about = "Run the jobs declared in cadence.toml on their schedules")]
struct Cli {
    /// Config file; falls back to CADENCE_CONFIG, then ~/.cadence/cadence.toml
    #[arg(short, long, value_name = "PATH")]
    config: Option<String>,

    /// Register every job, print its next fire time and exit
    #[arg(long)]
    dry_run: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "cadence=info,cadence_scheduler=info".into()),
        )
        .init();

    let cli = Cli::parse();

    // explicit path > CADENCE_CONFIG env > ~/.cadence/cadence.toml
    let config_path = cli.config.or_else(|| std::env::var("CADENCE_CONFIG").ok());
    let config = CadenceConfig::load(config_path.as_deref()).unwrap_or_else(|e| {
        warn!("Config load failed ({}), using defaults", e);
        CadenceConfig::default()
    });

    let mut scheduler_config = config.scheduler.clone();
    if cli.dry_run {
        scheduler_config.auto_start = false;
    }

    let mut registry = JobRegistry::new();
    registry.register_default::<jobs::LogJob>();
    let manager = ScheduleJobManager::from_config(
        &scheduler_config,
        Arc::new(registry),
        Arc::new(TracingObserver),
    )
    .await?;

    for job in &config.jobs {
        match jobs::schedule_configured(&manager, job).await {
            Ok(key) => info!(job = %key, "job scheduled"),
            Err(e) => warn!(job = %job.name, code = e.code(), error = %e, "job skipped"),
        }
    }
    if config.jobs.is_empty() {
        warn!("no jobs configured");
    }

    let engine = manager.scheduler();
    if cli.dry_run {
        for key in engine.job_keys().await {
            match engine.next_fire_time(&key).await {
                Some(at) => println!("{key}\t{}", at.to_rfc3339()),
                None => println!("{key}\t-"),
            }
        }
        engine.shutdown(false).await;
        return Ok(());
    }

    // auto_start may be off in the config; the CLI always runs.
    manager.start().await?;
    info!(
        scheduler = %engine.name(),
        jobs = engine.job_keys().await.len(),
        "cadence running, press Ctrl+C to stop"
    );

    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received");
    manager.shutdown().await;

    let status = engine.status().await;
    info!(
        fires = status.fires_total,
        succeeded = status.executions_succeeded,
        failed = status.executions_failed,
        skipped = status.misfires_skipped,
        "cadence stopped"
    );
    Ok(())
}

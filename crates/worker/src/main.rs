use std::sync::Arc;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use vx_domain::config::{Config, ConfigSeverity};
use vx_store::calls::CallStore;
use vx_store::dispatches::DispatchStore;
use vx_store::events::EventStore;
use vx_store::launch_jobs::LaunchJobStore;

use vx_worker::claimer::DispatchClaimer;
use vx_worker::handoff::HandoffWorker;
use vx_worker::ingest::Ingestor;
use vx_worker::launcher::Launcher;
use vx_worker::rooms::RoomServiceClient;
use vx_worker::runner::run_loop;

/// voxlane worker — runs the handoff, claim, launch and ingestion loops.
#[derive(Parser)]
#[command(name = "voxlane-worker", version)]
struct Cli {
    /// Path to the TOML config file.
    #[arg(long, env = "VOXLANE_CONFIG")]
    config: Option<String>,
    /// Apply database migrations before starting.
    #[arg(long)]
    migrate: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let cli = Cli::parse();

    let config = Arc::new(Config::load(cli.config.as_deref())?);
    validate_or_exit(&config)?;

    let pool = vx_store::connect(&config.database)?;
    if cli.migrate {
        vx_store::run_migrations(&pool).await?;
        tracing::info!("migrations applied");
    }

    let events = EventStore::new(pool.clone());
    let dispatches = DispatchStore::new(pool.clone());
    let launch_jobs = LaunchJobStore::new(pool.clone());
    let calls = CallStore::new(pool.clone());
    let rooms = RoomServiceClient::new(config.rooms.clone())?;

    let handoff = Arc::new(HandoffWorker::new(
        events.clone(),
        dispatches.clone(),
        rooms,
        &config,
    ));
    let claimer = Arc::new(DispatchClaimer::new(
        events.clone(),
        launch_jobs.clone(),
        &config,
    )?);
    let launcher = Arc::new(Launcher::new(launch_jobs, events.clone(), &config)?);
    let ingestor = Arc::new(Ingestor::new(events, calls, &config));

    let shutdown = CancellationToken::new();
    let poll = std::time::Duration::from_millis(config.worker.poll_interval_ms);

    let mut tasks = tokio::task::JoinSet::new();
    {
        let worker = handoff.clone();
        tasks.spawn(run_loop("handoff", poll, shutdown.clone(), move || {
            let worker = worker.clone();
            async move { worker.tick().await }
        }));
    }
    {
        let worker = claimer.clone();
        tasks.spawn(run_loop("claimer", poll, shutdown.clone(), move || {
            let worker = worker.clone();
            async move { worker.tick().await }
        }));
    }
    {
        let worker = launcher.clone();
        tasks.spawn(run_loop("launcher", poll, shutdown.clone(), move || {
            let worker = worker.clone();
            async move { worker.tick().await }
        }));
    }
    {
        let worker = ingestor.clone();
        tasks.spawn(run_loop("ingest", poll, shutdown.clone(), move || {
            let worker = worker.clone();
            async move { worker.tick().await }
        }));
    }
    {
        // Periodic sweep making expired pending dispatches explicit.
        let dispatches = dispatches.clone();
        tasks.spawn(run_loop(
            "dispatch-expiry",
            std::time::Duration::from_secs(30),
            shutdown.clone(),
            move || {
                let dispatches = dispatches.clone();
                async move {
                    let expired = dispatches.expire_stale().await?;
                    if expired > 0 {
                        tracing::info!(expired, "stale dispatches expired");
                    }
                    // Always report idle so the sweep keeps its cadence.
                    Ok(0)
                }
            },
        ));
    }

    tracing::info!("voxlane worker running");
    tokio::signal::ctrl_c().await?;
    tracing::info!("shutdown requested, finishing current batches");
    shutdown.cancel();
    while tasks.join_next().await.is_some() {}

    Ok(())
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,vx_worker=debug")),
        )
        .json()
        .init();
}

fn validate_or_exit(config: &Config) -> anyhow::Result<()> {
    let issues = config.validate();
    for issue in &issues {
        match issue.severity {
            ConfigSeverity::Warning => tracing::warn!("config: {issue}"),
            ConfigSeverity::Error => tracing::error!("config: {issue}"),
        }
    }
    if issues.iter().any(|i| i.severity == ConfigSeverity::Error) {
        anyhow::bail!(
            "config validation failed with {} error(s)",
            issues
                .iter()
                .filter(|i| i.severity == ConfigSeverity::Error)
                .count()
        );
    }
    Ok(())
}

use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use vx_domain::config::{Config, ConfigSeverity};
use vx_gateway::api;
use vx_gateway::state::AppState;

/// voxlane gateway — carrier webhook + dispatch claim control plane.
#[derive(Parser)]
#[command(name = "voxlane-gateway", version)]
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
    let issues = config.validate();
    for issue in &issues {
        match issue.severity {
            ConfigSeverity::Warning => tracing::warn!("config: {issue}"),
            ConfigSeverity::Error => tracing::error!("config: {issue}"),
        }
    }
    if issues.iter().any(|i| i.severity == ConfigSeverity::Error) {
        anyhow::bail!("config validation failed");
    }

    let pool = vx_store::connect(&config.database)?;
    if cli.migrate {
        vx_store::run_migrations(&pool).await?;
        tracing::info!("migrations applied");
    }

    let state = AppState::new(config.clone(), pool);
    let router = api::build_router(state);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(addr = %addr, "voxlane gateway listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutdown requested");
        })
        .await?;

    Ok(())
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,vx_gateway=debug")),
        )
        .json()
        .init();
}

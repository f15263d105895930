use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use vx_connector::api;
use vx_connector::state::AppState;
use vx_domain::config::{Config, ConfigSeverity};

/// voxlane connector — per-call voice sessions behind the launch API.
#[derive(Parser)]
#[command(name = "voxlane-connector", version)]
struct Cli {
    /// Path to the TOML config file.
    #[arg(long, env = "VOXLANE_CONFIG")]
    config: Option<String>,
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
    let state = AppState::new(config.clone(), pool)?;
    let router = api::build_router(state);

    let addr = format!("{}:{}", config.server.host, config.connector.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(addr = %addr, mock_transport = config.voice.mock_transport, "voxlane connector listening");

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
                .unwrap_or_else(|_| EnvFilter::new("info,vx_connector=debug")),
        )
        .json()
        .init();
}

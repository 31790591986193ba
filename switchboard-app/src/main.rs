use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use switchboard_common::observability::init_logging;
use switchboard_config::{SwitchboardConfigLoader, resolve_config_path};
use switchboard_core::Runner;

mod routes;
mod state;

use state::AppState;

/// Multi-platform social ingestion service.
#[derive(Debug, Parser)]
#[command(name = "switchboard", version)]
struct Cli {
    /// YAML config file. Falls back to `CONFIG_PATH`, then `switchboard.yaml`.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Listen address, overriding `server.bind`.
    #[arg(long, env = "SWITCHBOARD_BIND")]
    bind: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // 1) Config: file, then SWITCHBOARD__* env on top
    let path = resolve_config_path(cli.config.as_deref());
    let cfg = SwitchboardConfigLoader::new()
        .with_file(&path)
        .load()
        .with_context(|| format!("loading config from {}", path.display()))?;

    let log_file = init_logging(cfg.logging.to_log_config())?;
    tracing::info!(
        config = %path.display(),
        log_file = %log_file.display(),
        "starting switchboard"
    );

    // 2) Connectors and pipeline
    let registry = switchboard_social::default_registry();
    tracing::debug!(platforms = ?registry.platforms(), "connector platforms registered");
    let runner = Arc::new(Runner::from_config(&cfg, &registry));
    let state = AppState::new(runner);
    state.start().await;

    // 3) HTTP boundary until ctrl-c
    let bind = cli.bind.unwrap_or_else(|| cfg.server.bind.clone());
    let listener = tokio::net::TcpListener::bind(&bind)
        .await
        .with_context(|| format!("binding {bind}"))?;
    tracing::info!(%bind, "listening");

    axum::serve(listener, routes::router(state.clone()))
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "failed to listen for ctrl-c");
            }
            tracing::info!("shutdown requested");
        })
        .await
        .context("http server")?;

    state.shutdown().await;
    tracing::info!("stopped");
    Ok(())
}

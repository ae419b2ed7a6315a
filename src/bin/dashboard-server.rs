//! Dashboard server binary
//!
//! Run with: `cargo run --bin dashboard-server -- --config config/default.toml`

use anyhow::Context;
use clap::Parser;
use energy_forecast::config::Settings;
use energy_forecast::secrets::EnvSecretStore;
use energy_forecast::server::{run_server, AppState, ServerConfig};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Debug, Parser)]
#[command(name = "dashboard-server", about = "NYIS energy forecast dashboard")]
struct Args {
    /// TOML settings file layered over the defaults
    #[arg(long)]
    config: Option<PathBuf>,
    /// Overrides `dashboard.port`
    #[arg(long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    energy_forecast::init_tracing();

    let args = Args::parse();
    let settings = Settings::load(args.config.as_deref()).context("loading settings")?;

    let mut config = ServerConfig::from(&settings.dashboard);
    if let Some(port) = args.port {
        config.port = port;
    }

    let state = AppState::from_settings(&settings, Arc::new(EnvSecretStore::new()))
        .context("building dashboard state")?;

    tracing::info!(
        scoring_url = %settings.dashboard.scoring_url,
        horizon = settings.dashboard.horizon,
        "starting dashboard"
    );

    run_server(config, state, async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    })
    .await
    .context("dashboard server failed")?;

    Ok(())
}

//! Batch pipeline binary
//!
//! Run with: `cargo run --bin pipeline -- run-daily`
//!
//! Set `RUST_LOG=energy_forecast::dag=debug` to see every task attempt.

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use energy_forecast::clock::SystemClock;
use energy_forecast::config::Settings;
use energy_forecast::pipeline::{
    describe_cycles, Orchestrator, PipelineContext, PipelineTasks, RunReport, DAILY_CYCLE,
    WEEKLY_CYCLE,
};
use energy_forecast::secrets::EnvSecretStore;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Debug, Parser)]
#[command(name = "pipeline", about = "NYIS demand ingestion and retraining pipeline")]
struct Cli {
    /// TOML settings file layered over the defaults
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the daily cycle once, then any cycle it triggers
    RunDaily,
    /// Run the weekly retrain cycle once
    RunWeekly,
    /// Fire both cycles on their schedules until ctrl-c
    Schedule,
    /// Print both cycle graphs as JSON
    Graph,
}

fn build_orchestrator(settings: Settings) -> anyhow::Result<Orchestrator> {
    let policy = settings.orchestration.retry_policy();
    let start_date = settings.orchestration.start_date;
    let clock = Arc::new(SystemClock);
    let ctx = PipelineContext::from_settings(
        settings,
        Arc::new(EnvSecretStore::new()),
        clock.clone(),
    )
    .context("building pipeline clients")?;
    let orchestrator = Orchestrator::with_default_cycles(
        Arc::new(PipelineTasks::new(ctx)),
        policy,
        clock,
        start_date,
    )?;
    Ok(orchestrator)
}

fn print_reports(reports: &[RunReport]) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(reports)?);
    if let Some(failed) = reports.iter().find(|r| !r.succeeded()) {
        bail!("cycle {} (run {}) had failed tasks", failed.cycle, failed.run_id);
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    energy_forecast::init_tracing();

    let cli = Cli::parse();

    if let Command::Graph = cli.command {
        let graphs = describe_cycles()?;
        println!("{}", serde_json::to_string_pretty(&graphs)?);
        return Ok(());
    }

    let settings = Settings::load(cli.config.as_deref()).context("loading settings")?;
    let orchestrator = build_orchestrator(settings)?;

    match cli.command {
        Command::RunDaily => {
            let reports = orchestrator.run_with_triggers(DAILY_CYCLE).await?;
            print_reports(&reports)
        }
        Command::RunWeekly => {
            let report = orchestrator.run_cycle(WEEKLY_CYCLE).await?;
            print_reports(std::slice::from_ref(&report))
        }
        Command::Schedule => {
            Arc::new(orchestrator)
                .run_scheduler(async {
                    if let Err(e) = tokio::signal::ctrl_c().await {
                        tracing::warn!(error = %e, "failed to listen for ctrl-c");
                        std::future::pending::<()>().await;
                    }
                })
                .await;
            Ok(())
        }
        Command::Graph => Ok(()),
    }
}

pub mod clock;
pub mod config;
pub mod dag;
pub mod demand;
pub mod eia;
pub mod features;
pub mod forecast;
pub mod ingest;
pub mod lake;
pub mod monitor;
pub mod pipeline;
pub mod preprocess;
pub mod retry;
pub mod scoring;
pub mod secrets;
pub mod server;
pub mod training;

pub use clock::{Clock, FixedClock, SystemClock};
pub use config::{ConfigError, Settings};
pub use dag::{
    DagError, PipelineDag, TaskError, TaskKind, TaskOutcome, TaskRunner, TaskState, TriggerRule,
};
pub use demand::{DateRange, DemandRecord};
pub use eia::{EiaClient, FetchError};
pub use features::CuratedRecord;
pub use forecast::{forecast_horizon, ForecastError, ForecastPoint, ForecastState, LagWindow};
pub use lake::{Lake, LakeError};
pub use monitor::{compare_forecast_vs_actual, PredictionRecord, RetrainDecision};
pub use pipeline::{
    Orchestrator, OrchestratorError, PipelineContext, PipelineTasks, RunReport, Schedule,
    DAILY_CYCLE, WEEKLY_CYCLE,
};
pub use retry::{retry, RetryPolicy};
pub use scoring::{Scorer, ScoringClient, ScoringError};
pub use secrets::{EnvSecretStore, SecretStore, StaticSecretStore};
pub use server::{run_server, ApiError, AppState, ServerConfig};
pub use training::{JobSubmitter, TrainingJob, TrainingJobClient};

use tracing_subscriber::EnvFilter;

/// Compact `tracing` output filtered by `RUST_LOG` (default `info`).
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();
}

use crate::eia::FetchError;
use crate::lake::LakeError;
use crate::monitor::RetrainDecision;
use crate::secrets::SecretError;
use crate::training::SubmitError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Node identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub usize);

/// Work units the pipeline knows how to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    FetchHistoricalData,
    FetchDailyBlock,
    PreprocessData,
    CompareForecastVsActual,
    TriggerWeeklyRetrain,
    TrainModel,
}

impl TaskKind {
    pub const ALL: [TaskKind; 6] = [
        TaskKind::FetchHistoricalData,
        TaskKind::FetchDailyBlock,
        TaskKind::PreprocessData,
        TaskKind::CompareForecastVsActual,
        TaskKind::TriggerWeeklyRetrain,
        TaskKind::TrainModel,
    ];

    pub fn task_id(&self) -> &'static str {
        match self {
            TaskKind::FetchHistoricalData => "fetch_historical_data",
            TaskKind::FetchDailyBlock => "fetch_daily_block",
            TaskKind::PreprocessData => "preprocess_data",
            TaskKind::CompareForecastVsActual => "compare_forecast_vs_actual",
            TaskKind::TriggerWeeklyRetrain => "trigger_weekly_retrain",
            TaskKind::TrainModel => "train_model",
        }
    }

    pub fn from_task_id(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.task_id() == value)
    }

    pub fn description(&self) -> &'static str {
        match self {
            TaskKind::FetchHistoricalData => "Overwrite the raw historical snapshot (now-30d .. now-2d)",
            TaskKind::FetchDailyBlock => "Merge yesterday's rows into the raw daily snapshot",
            TaskKind::PreprocessData => "Build the curated snapshot with calendar and lag features",
            TaskKind::CompareForecastVsActual => "Score stored predictions and decide on a retrain",
            TaskKind::TriggerWeeklyRetrain => "Start the weekly retrain cycle",
            TaskKind::TrainModel => "Submit the remote training job",
        }
    }
}

impl std::fmt::Display for TaskKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.task_id())
    }
}

/// When a node runs relative to its parents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerRule {
    /// Every parent succeeded.
    #[default]
    AllSuccess,
    /// Every parent succeeded and at least one decided `Retrain`.
    OnRetrain,
}

/// Node in the DAG representing one pipeline task
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeId,
    pub task: TaskKind,
    pub trigger_rule: TriggerRule,
}

impl Node {
    pub fn new(id: NodeId, task: TaskKind, trigger_rule: TriggerRule) -> Self {
        Node {
            id,
            task,
            trigger_rule,
        }
    }

    pub fn task_id(&self) -> &'static str {
        self.task.task_id()
    }
}

/// What a successful task produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "value")]
pub enum TaskOutcome {
    /// Finished without a result worth reporting.
    Done,
    /// Rows written to the lake.
    Rows(usize),
    Decision(RetrainDecision),
    /// Name of the cycle that was started.
    Triggered(String),
    /// Run id assigned by the training service.
    Submitted(i64),
}

impl TaskOutcome {
    pub fn requests_retrain(&self) -> bool {
        matches!(self, TaskOutcome::Decision(RetrainDecision::Retrain))
    }
}

/// Final state of a task within one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "state")]
pub enum TaskState {
    Success { outcome: TaskOutcome },
    Failed { attempts: u32, error: String },
    Skipped,
    UpstreamFailed,
}

impl TaskState {
    pub fn is_success(&self) -> bool {
        matches!(self, TaskState::Success { .. })
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, TaskState::Failed { .. } | TaskState::UpstreamFailed)
    }

    pub fn outcome(&self) -> Option<&TaskOutcome> {
        match self {
            TaskState::Success { outcome } => Some(outcome),
            _ => None,
        }
    }
}

/// Errors a pipeline task can fail with.
#[derive(Debug, Error)]
pub enum TaskError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error(transparent)]
    Lake(#[from] LakeError),
    #[error(transparent)]
    Secret(#[from] SecretError),
    #[error(transparent)]
    Submit(#[from] SubmitError),
    #[error("Task not supported by this runner: {0}")]
    Unsupported(TaskKind),
}

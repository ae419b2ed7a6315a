//! Pipeline cycles, their schedules and the orchestrator that runs them.
//!
//! Two cycles exist. `energy_daily_ingestion` refreshes the raw and curated
//! snapshots and checks forecast error; when the check asks for it, it
//! triggers `energy_weekly_retrain`, which submits the remote training job.
//! The weekly cycle also runs on its own schedule.

use crate::clock::Clock;
use crate::config::Settings;
use crate::dag::{
    DagError, DagVisualization, Node, PipelineDag, TaskError, TaskKind, TaskOutcome, TaskRunner,
    TaskState, TriggerRule,
};
use crate::eia::EiaClient;
use crate::ingest::{fetch_daily_block, fetch_historical_data};
use crate::lake::Lake;
use crate::monitor::compare_forecast_vs_actual;
use crate::preprocess::{preprocess_data, PreprocessOutcome};
use crate::retry::RetryPolicy;
use crate::secrets::SecretStore;
use crate::training::{JobSubmitter, TrainingJobClient};
use async_trait::async_trait;
use chrono::{DateTime, Datelike, Duration, NaiveDate, Utc, Weekday};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::future::Future;
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tracing::{error, info, warn};
use uuid::Uuid;

pub const DAILY_CYCLE: &str = "energy_daily_ingestion";
pub const WEEKLY_CYCLE: &str = "energy_weekly_retrain";

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("Unknown cycle: {0}")]
    UnknownCycle(String),
    #[error("Cycle {0} already has an active run")]
    AlreadyRunning(String),
    #[error(transparent)]
    Dag(#[from] DagError),
}

/// When a cycle fires. All times are UTC midnight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Schedule {
    /// `@daily`: every day at 00:00.
    Daily,
    /// `@weekly`: Sundays at 00:00.
    Weekly,
}

impl Schedule {
    pub fn expression(&self) -> &'static str {
        match self {
            Schedule::Daily => "@daily",
            Schedule::Weekly => "@weekly",
        }
    }

    fn fires_on(&self, day: NaiveDate) -> bool {
        match self {
            Schedule::Daily => true,
            Schedule::Weekly => day.weekday() == Weekday::Sun,
        }
    }

    /// First fire time strictly after `after` and not before `start`.
    ///
    /// Missed slots are never returned: a scheduler that was down simply
    /// resumes with the next slot.
    pub fn next_fire(&self, after: DateTime<Utc>, start: NaiveDate) -> DateTime<Utc> {
        let mut day = (after.date_naive() + Duration::days(1)).max(start);
        while !self.fires_on(day) {
            day += Duration::days(1);
        }
        day.and_hms_opt(0, 0, 0).unwrap_or_default().and_utc()
    }
}

/// A named task graph with an optional schedule.
#[derive(Debug)]
pub struct Cycle {
    pub name: String,
    pub schedule: Option<Schedule>,
    pub dag: PipelineDag,
}

/// Historical and daily ingestion in parallel, then preprocessing,
/// monitoring and the decision-gated weekly trigger.
pub fn daily_cycle() -> Result<Cycle, DagError> {
    let mut dag = PipelineDag::new(DAILY_CYCLE);
    dag.add_task(TaskKind::FetchHistoricalData, TriggerRule::AllSuccess)?;
    dag.add_task(TaskKind::FetchDailyBlock, TriggerRule::AllSuccess)?;
    dag.add_task(TaskKind::PreprocessData, TriggerRule::AllSuccess)?;
    dag.add_task(TaskKind::CompareForecastVsActual, TriggerRule::AllSuccess)?;
    dag.add_task(TaskKind::TriggerWeeklyRetrain, TriggerRule::OnRetrain)?;

    dag.add_dependency(TaskKind::FetchHistoricalData, TaskKind::PreprocessData)?;
    dag.add_dependency(TaskKind::FetchDailyBlock, TaskKind::PreprocessData)?;
    dag.add_dependency(TaskKind::PreprocessData, TaskKind::CompareForecastVsActual)?;
    dag.add_dependency(TaskKind::CompareForecastVsActual, TaskKind::TriggerWeeklyRetrain)?;

    Ok(Cycle {
        name: DAILY_CYCLE.to_string(),
        schedule: Some(Schedule::Daily),
        dag,
    })
}

pub fn weekly_cycle() -> Result<Cycle, DagError> {
    let mut dag = PipelineDag::new(WEEKLY_CYCLE);
    dag.add_task(TaskKind::TrainModel, TriggerRule::AllSuccess)?;
    Ok(Cycle {
        name: WEEKLY_CYCLE.to_string(),
        schedule: Some(Schedule::Weekly),
        dag,
    })
}

/// Node/edge views of both cycles, keyed by cycle name.
pub fn describe_cycles() -> Result<BTreeMap<String, DagVisualization>, DagError> {
    let mut out = BTreeMap::new();
    for cycle in [daily_cycle()?, weekly_cycle()?] {
        out.insert(cycle.name.clone(), cycle.dag.to_visualization()?);
    }
    Ok(out)
}

/// At most one active run per cycle.
#[derive(Debug, Clone, Default)]
pub struct CycleGuard {
    active: Arc<Mutex<HashSet<String>>>,
}

impl CycleGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claims `cycle`; `None` when a run is already active. The claim is
    /// released when the returned [`ActiveRun`] is dropped.
    pub fn try_acquire(&self, cycle: &str) -> Option<ActiveRun> {
        let mut active = self.active.lock().unwrap_or_else(|e| e.into_inner());
        if !active.insert(cycle.to_string()) {
            return None;
        }
        Some(ActiveRun {
            guard: self.clone(),
            cycle: cycle.to_string(),
        })
    }

    pub fn is_active(&self, cycle: &str) -> bool {
        self.active
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(cycle)
    }
}

/// Claim on a cycle held for the duration of one run.
#[derive(Debug)]
pub struct ActiveRun {
    guard: CycleGuard,
    cycle: String,
}

impl Drop for ActiveRun {
    fn drop(&mut self) {
        let mut active = self.guard.active.lock().unwrap_or_else(|e| e.into_inner());
        active.remove(&self.cycle);
    }
}

/// Result of one cycle run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub cycle: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// Final state per task id.
    pub states: BTreeMap<String, TaskState>,
    /// Cycles this run asked to start.
    pub triggered: Vec<String>,
}

impl RunReport {
    pub fn succeeded(&self) -> bool {
        !self.states.values().any(TaskState::is_failure)
    }

    pub fn state(&self, task: TaskKind) -> Option<&TaskState> {
        self.states.get(task.task_id())
    }
}

/// Runs cycles on demand or on their schedules.
pub struct Orchestrator {
    runner: Arc<dyn TaskRunner>,
    cycles: HashMap<String, Arc<Cycle>>,
    guard: CycleGuard,
    policy: RetryPolicy,
    clock: Arc<dyn Clock>,
    start_date: NaiveDate,
}

impl Orchestrator {
    pub fn new(
        runner: Arc<dyn TaskRunner>,
        policy: RetryPolicy,
        clock: Arc<dyn Clock>,
        start_date: NaiveDate,
    ) -> Self {
        Orchestrator {
            runner,
            cycles: HashMap::new(),
            guard: CycleGuard::new(),
            policy,
            clock,
            start_date,
        }
    }

    /// Orchestrator with the daily and weekly cycles registered.
    pub fn with_default_cycles(
        runner: Arc<dyn TaskRunner>,
        policy: RetryPolicy,
        clock: Arc<dyn Clock>,
        start_date: NaiveDate,
    ) -> Result<Self, DagError> {
        Ok(Self::new(runner, policy, clock, start_date)
            .with_cycle(daily_cycle()?)
            .with_cycle(weekly_cycle()?))
    }

    pub fn with_cycle(mut self, cycle: Cycle) -> Self {
        self.cycles.insert(cycle.name.clone(), Arc::new(cycle));
        self
    }

    pub fn guard(&self) -> &CycleGuard {
        &self.guard
    }

    /// Runs `name` once. Refused when the cycle already has an active run.
    pub async fn run_cycle(&self, name: &str) -> Result<RunReport, OrchestratorError> {
        let cycle = self
            .cycles
            .get(name)
            .cloned()
            .ok_or_else(|| OrchestratorError::UnknownCycle(name.to_string()))?;

        let Some(_active) = self.guard.try_acquire(name) else {
            warn!(cycle = name, "run refused, cycle already active");
            return Err(OrchestratorError::AlreadyRunning(name.to_string()));
        };

        let run_id = Uuid::new_v4();
        let started_at = self.clock.now();
        info!(cycle = name, %run_id, "cycle run started");

        let node_states = cycle
            .dag
            .execute(Arc::clone(&self.runner), &self.policy)
            .await?;

        let mut states = BTreeMap::new();
        let mut triggered = Vec::new();
        for (node_id, state) in node_states {
            let Some(node) = cycle.dag.get_node(node_id) else {
                continue;
            };
            if let Some(TaskOutcome::Triggered(target)) = state.outcome() {
                triggered.push(target.clone());
            }
            states.insert(node.task_id().to_string(), state);
        }

        let report = RunReport {
            run_id,
            cycle: name.to_string(),
            started_at,
            finished_at: self.clock.now(),
            states,
            triggered,
        };
        if report.succeeded() {
            info!(cycle = name, %run_id, triggered = ?report.triggered, "cycle run succeeded");
        } else {
            error!(cycle = name, %run_id, "cycle run finished with failed tasks");
        }
        Ok(report)
    }

    /// Runs `name`, then every cycle it triggered, one after another.
    ///
    /// Only a failure to start `name` itself is an error. A triggered cycle
    /// that cannot start is logged and left out of the returned reports.
    pub async fn run_with_triggers(&self, name: &str) -> Result<Vec<RunReport>, OrchestratorError> {
        let first = self.run_cycle(name).await?;
        let mut pending: Vec<String> = first.triggered.iter().rev().cloned().collect();
        let mut reports = vec![first];
        while let Some(cycle) = pending.pop() {
            match self.run_cycle(&cycle).await {
                Ok(report) => {
                    pending.extend(report.triggered.iter().rev().cloned());
                    reports.push(report);
                }
                Err(e) => warn!(cycle = %cycle, error = %e, "triggered cycle did not start"),
            }
        }
        Ok(reports)
    }

    /// Earliest upcoming fire time after `after` and the cycles due then.
    pub fn next_due(&self, after: DateTime<Utc>) -> Option<(DateTime<Utc>, Vec<String>)> {
        let mut due: Option<(DateTime<Utc>, Vec<String>)> = None;
        let mut names: Vec<&String> = self.cycles.keys().collect();
        names.sort();
        for name in names {
            let Some(schedule) = self.cycles[name].schedule else {
                continue;
            };
            let at = schedule.next_fire(after, self.start_date);
            match &mut due {
                Some((best, cycles)) if at == *best => cycles.push(name.clone()),
                Some((best, _)) if at > *best => {}
                _ => due = Some((at, vec![name.clone()])),
            }
        }
        due
    }

    /// Fires scheduled cycles until `shutdown` resolves. Runs are spawned and
    /// not awaited; cycles they trigger are spawned the same way.
    pub async fn run_scheduler<F>(self: Arc<Self>, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        let mut cursor = self.clock.now();
        loop {
            let Some((fire_at, cycles)) = self.next_due(cursor) else {
                info!("no scheduled cycles");
                return;
            };
            info!(%fire_at, ?cycles, "next scheduled run");

            let wait = (fire_at - self.clock.now()).to_std().unwrap_or_default();
            tokio::select! {
                _ = &mut shutdown => {
                    info!("scheduler stopping");
                    return;
                }
                _ = tokio::time::sleep(wait) => {}
            }

            for cycle in cycles {
                Arc::clone(&self).spawn_run(cycle);
            }
            cursor = fire_at;
        }
    }

    fn spawn_run(self: Arc<Self>, cycle: String) {
        tokio::spawn(async move {
            match self.run_cycle(&cycle).await {
                Ok(report) => {
                    for target in report.triggered {
                        Arc::clone(&self).spawn_run(target);
                    }
                }
                Err(e) => warn!(cycle = %cycle, error = %e, "cycle run not completed"),
            }
        });
    }
}

/// Collaborators the real tasks run against.
pub struct PipelineContext {
    pub settings: Settings,
    pub lake: Lake,
    pub eia: EiaClient,
    pub secrets: Arc<dyn SecretStore>,
    pub submitter: Arc<dyn JobSubmitter>,
    pub clock: Arc<dyn Clock>,
}

impl PipelineContext {
    /// Local-filesystem lake and HTTP clients built from `settings`.
    pub fn from_settings(
        settings: Settings,
        secrets: Arc<dyn SecretStore>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, TaskError> {
        let lake = Lake::local(settings.lake.root.clone());
        let eia = EiaClient::with_config(settings.eia.client_config())?;
        let submitter = TrainingJobClient::new(
            settings.training.host.clone(),
            std::time::Duration::from_secs(settings.training.timeout_seconds),
        )?;
        Ok(PipelineContext {
            settings,
            lake,
            eia,
            secrets,
            submitter: Arc::new(submitter),
            clock,
        })
    }
}

/// [`TaskRunner`] dispatching every task kind to its implementation.
pub struct PipelineTasks {
    ctx: PipelineContext,
}

impl PipelineTasks {
    pub fn new(ctx: PipelineContext) -> Self {
        PipelineTasks { ctx }
    }

    pub fn context(&self) -> &PipelineContext {
        &self.ctx
    }
}

#[async_trait]
impl TaskRunner for PipelineTasks {
    async fn run(&self, node: &Node) -> Result<TaskOutcome, TaskError> {
        let ctx = &self.ctx;
        let settings = &ctx.settings;

        match node.task {
            TaskKind::FetchHistoricalData => {
                let api_key = ctx.secrets.get(&settings.eia.api_key_secret)?;
                let rows = fetch_historical_data(
                    &ctx.eia,
                    &api_key,
                    &ctx.lake,
                    &settings.lake.historical_path,
                    ctx.clock.now(),
                )
                .await?;
                Ok(TaskOutcome::Rows(rows))
            }
            TaskKind::FetchDailyBlock => {
                let api_key = ctx.secrets.get(&settings.eia.api_key_secret)?;
                let rows = fetch_daily_block(
                    &ctx.eia,
                    &api_key,
                    &ctx.lake,
                    &settings.lake.daily_path,
                    ctx.clock.now(),
                )
                .await?;
                Ok(TaskOutcome::Rows(rows))
            }
            TaskKind::PreprocessData => {
                match preprocess_data(&ctx.lake, &settings.lake.preprocess_paths()).await? {
                    PreprocessOutcome::NoInput => Ok(TaskOutcome::Done),
                    PreprocessOutcome::Written { rows } => Ok(TaskOutcome::Rows(rows)),
                }
            }
            TaskKind::CompareForecastVsActual => {
                let decision = compare_forecast_vs_actual(
                    &ctx.lake,
                    &settings.lake.predictions_path,
                    settings.monitoring.rmse_threshold,
                )
                .await?;
                Ok(TaskOutcome::Decision(decision))
            }
            TaskKind::TriggerWeeklyRetrain => {
                info!(target_cycle = WEEKLY_CYCLE, "retrain requested");
                Ok(TaskOutcome::Triggered(WEEKLY_CYCLE.to_string()))
            }
            TaskKind::TrainModel => {
                let token = ctx.secrets.get(&settings.training.token_secret)?;
                let job = settings.training.job(&settings.lake);
                let run = ctx.submitter.submit(&job, &token).await?;
                Ok(TaskOutcome::Submitted(run.run_id))
            }
        }
    }
}

use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
use energy_forecast::clock::FixedClock;
use energy_forecast::config::Settings;
use energy_forecast::dag::{TaskKind, TaskOutcome, TaskState};
use energy_forecast::demand::DemandRecord;
use energy_forecast::eia::EiaClient;
use energy_forecast::features::CuratedRecord;
use energy_forecast::lake::Lake;
use energy_forecast::monitor::{PredictionRecord, RetrainDecision};
use energy_forecast::pipeline::{
    Orchestrator, PipelineContext, PipelineTasks, DAILY_CYCLE, WEEKLY_CYCLE,
};
use energy_forecast::retry::{Backoff, RetryPolicy};
use energy_forecast::secrets::StaticSecretStore;
use energy_forecast::training::TrainingJobClient;
use std::sync::Arc;
use std::time::Duration as StdDuration;
use wiremock::matchers::{body_partial_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const API_ROUTE: &str = "/v2/electricity/rto/region-data/data/";

fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 9, 10, 6, 0, 0).unwrap()
}

/// `hours` consecutive demand rows in the API's payload shape.
fn api_page(from: DateTime<Utc>, hours: i64, base: f64) -> serde_json::Value {
    let rows: Vec<DemandRecord> = (0..hours)
        .map(|i| DemandRecord::nyis_demand(from + Duration::hours(i), base + i as f64))
        .collect();
    serde_json::json!({ "response": { "data": rows } })
}

async fn mount_api(api: &MockServer) {
    // historical window starts 30 days before `now`
    Mock::given(method("GET"))
        .and(path(API_ROUTE))
        .and(query_param("start", "2025-08-11"))
        .and(query_param("api_key", "eia-key"))
        .respond_with(ResponseTemplate::new(200).set_body_json(api_page(
            Utc.with_ymd_and_hms(2025, 8, 11, 0, 0, 0).unwrap(),
            48,
            14000.0,
        )))
        .mount(api)
        .await;
    // daily block is yesterday only
    Mock::given(method("GET"))
        .and(path(API_ROUTE))
        .and(query_param("start", "2025-09-09"))
        .and(query_param("end", "2025-09-09"))
        .respond_with(ResponseTemplate::new(200).set_body_json(api_page(
            Utc.with_ymd_and_hms(2025, 9, 9, 0, 0, 0).unwrap(),
            24,
            16000.0,
        )))
        .mount(api)
        .await;
}

struct Harness {
    lake: Lake,
    orchestrator: Orchestrator,
}

fn harness(api: &MockServer, jobs: &MockServer) -> Harness {
    harness_with_secrets(
        api,
        jobs,
        StaticSecretStore::new()
            .with("EIAApiToken", "eia-key")
            .with("DatabricksToken", "dbx-token"),
    )
}

fn harness_with_secrets(
    api: &MockServer,
    jobs: &MockServer,
    secrets: StaticSecretStore,
) -> Harness {
    let mut settings = Settings::default();
    settings.eia.base_url = format!("{}{}", api.uri(), API_ROUTE);
    settings.eia.max_attempts = 1;
    settings.eia.backoff_seconds = 0;
    settings.training.host = jobs.uri();

    let lake = Lake::in_memory();
    let clock = Arc::new(FixedClock(now()));
    let ctx = PipelineContext {
        eia: EiaClient::with_config(settings.eia.client_config()).unwrap(),
        submitter: Arc::new(
            TrainingJobClient::new(jobs.uri(), StdDuration::from_secs(5)).unwrap(),
        ),
        secrets: Arc::new(secrets),
        lake: lake.clone(),
        clock: clock.clone(),
        settings,
    };

    let orchestrator = Orchestrator::with_default_cycles(
        Arc::new(PipelineTasks::new(ctx)),
        RetryPolicy::new(1, StdDuration::ZERO, Backoff::Fixed),
        clock,
        NaiveDate::from_ymd_opt(2025, 9, 1).unwrap(),
    )
    .unwrap();

    Harness { lake, orchestrator }
}

fn success(outcome: TaskOutcome) -> TaskState {
    TaskState::Success { outcome }
}

#[tokio::test]
async fn daily_cycle_with_high_error_submits_retraining() {
    let api = MockServer::start().await;
    let jobs = MockServer::start().await;
    mount_api(&api).await;
    Mock::given(method("POST"))
        .and(path("/api/2.1/jobs/runs/submit"))
        .and(header("authorization", "Bearer dbx-token"))
        .and(body_partial_json(serde_json::json!({
            "run_name": "energy_weekly_retrain",
            "notebook_task": {
                "base_parameters": {
                    "input_path": "processed/curated.parquet",
                    "output_path": "predictions/"
                }
            }
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"run_id": 42})))
        .expect(1)
        .mount(&jobs)
        .await;

    let h = harness(&api, &jobs);
    // errors of 10000 MW: well above the retrain threshold
    h.lake
        .write(
            "predictions/part-0.parquet",
            &[
                PredictionRecord::new(5000.0, 15000.0),
                PredictionRecord::new(25000.0, 15000.0),
            ],
        )
        .await
        .unwrap();

    let reports = h.orchestrator.run_with_triggers(DAILY_CYCLE).await.unwrap();
    assert_eq!(reports.len(), 2);

    let daily = &reports[0];
    assert!(daily.succeeded());
    assert_eq!(
        daily.state(TaskKind::FetchHistoricalData),
        Some(&success(TaskOutcome::Rows(48)))
    );
    assert_eq!(
        daily.state(TaskKind::FetchDailyBlock),
        Some(&success(TaskOutcome::Rows(24)))
    );
    // 72 raw rows; the first has no previous value to lag
    assert_eq!(
        daily.state(TaskKind::PreprocessData),
        Some(&success(TaskOutcome::Rows(71)))
    );
    assert_eq!(
        daily.state(TaskKind::CompareForecastVsActual),
        Some(&success(TaskOutcome::Decision(RetrainDecision::Retrain)))
    );
    assert_eq!(daily.triggered, vec![WEEKLY_CYCLE.to_string()]);

    let weekly = &reports[1];
    assert_eq!(weekly.cycle, WEEKLY_CYCLE);
    assert_eq!(
        weekly.state(TaskKind::TrainModel),
        Some(&success(TaskOutcome::Submitted(42)))
    );

    let curated: Vec<CuratedRecord> = h.lake.read("processed/curated.parquet").await.unwrap();
    assert_eq!(curated.len(), 71);
    assert!(curated.windows(2).all(|w| w[0].period <= w[1].period));
    assert_eq!(curated[0].lag_1h, 14000.0);
    assert_eq!(curated[0].value, 14001.0);
    // first daily row lags the last historical row
    assert_eq!(curated[47].lag_1h, 14047.0);
    assert_eq!(curated[47].value, 16000.0);
}

#[tokio::test]
async fn busy_weekly_cycle_keeps_daily_report() {
    let api = MockServer::start().await;
    let jobs = MockServer::start().await;
    mount_api(&api).await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"run_id": 7})))
        .expect(0)
        .mount(&jobs)
        .await;

    let h = harness(&api, &jobs);
    h.lake
        .write(
            "predictions/part-0.parquet",
            &[PredictionRecord::new(0.0, 20000.0)],
        )
        .await
        .unwrap();

    // a weekly run is already in flight elsewhere
    let _weekly = h.orchestrator.guard().try_acquire(WEEKLY_CYCLE).unwrap();
    let reports = h.orchestrator.run_with_triggers(DAILY_CYCLE).await.unwrap();

    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].cycle, DAILY_CYCLE);
    assert!(reports[0].succeeded());
    assert_eq!(reports[0].triggered, vec![WEEKLY_CYCLE.to_string()]);
}

#[tokio::test]
async fn daily_cycle_without_predictions_skips_trigger() {
    let api = MockServer::start().await;
    let jobs = MockServer::start().await;
    mount_api(&api).await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"run_id": 1})))
        .expect(0)
        .mount(&jobs)
        .await;

    let h = harness(&api, &jobs);
    let reports = h.orchestrator.run_with_triggers(DAILY_CYCLE).await.unwrap();

    assert_eq!(reports.len(), 1);
    let daily = &reports[0];
    assert!(daily.succeeded());
    assert_eq!(
        daily.state(TaskKind::CompareForecastVsActual),
        Some(&success(TaskOutcome::Decision(RetrainDecision::NoOp)))
    );
    assert_eq!(daily.state(TaskKind::TriggerWeeklyRetrain), Some(&TaskState::Skipped));
    assert!(daily.triggered.is_empty());
}

#[tokio::test]
async fn rerunning_daily_cycle_keeps_daily_snapshot_unique() {
    let api = MockServer::start().await;
    let jobs = MockServer::start().await;
    mount_api(&api).await;

    let h = harness(&api, &jobs);
    h.orchestrator.run_cycle(DAILY_CYCLE).await.unwrap();
    let second = h.orchestrator.run_cycle(DAILY_CYCLE).await.unwrap();

    assert_eq!(
        second.state(TaskKind::FetchDailyBlock),
        Some(&success(TaskOutcome::Rows(24)))
    );
    let daily: Vec<DemandRecord> = h.lake.read("raw/daily/hourly_data.parquet").await.unwrap();
    assert_eq!(daily.len(), 24);
}

#[tokio::test]
async fn api_outage_fails_ingestion_and_blocks_downstream() {
    let api = MockServer::start().await;
    let jobs = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&api)
        .await;

    let h = harness(&api, &jobs);
    let report = h.orchestrator.run_cycle(DAILY_CYCLE).await.unwrap();

    assert!(!report.succeeded());
    assert!(matches!(
        report.state(TaskKind::FetchHistoricalData),
        Some(TaskState::Failed { attempts: 1, .. })
    ));
    assert_eq!(
        report.state(TaskKind::PreprocessData),
        Some(&TaskState::UpstreamFailed)
    );
    assert_eq!(
        report.state(TaskKind::TriggerWeeklyRetrain),
        Some(&TaskState::UpstreamFailed)
    );
    assert!(!h.lake.exists("processed/curated.parquet").await.unwrap());
}

#[tokio::test]
async fn missing_api_key_fails_fetch_tasks() {
    let api = MockServer::start().await;
    let jobs = MockServer::start().await;
    mount_api(&api).await;

    let h = harness_with_secrets(&api, &jobs, StaticSecretStore::new());
    let report = h.orchestrator.run_cycle(DAILY_CYCLE).await.unwrap();

    match report.state(TaskKind::FetchDailyBlock) {
        Some(TaskState::Failed { error, .. }) => {
            assert_eq!(error, "Secret not found: EIAApiToken")
        }
        other => panic!("unexpected state: {:?}", other),
    }
    assert_eq!(
        report.state(TaskKind::CompareForecastVsActual),
        Some(&TaskState::UpstreamFailed)
    );
}

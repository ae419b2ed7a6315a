//! Runtime settings.
//!
//! Layered with figment: built-in defaults, then an optional TOML file, then
//! `FORECAST__`-prefixed environment variables (`FORECAST__EIA__MAX_ATTEMPTS=5`).
//! Secrets are referenced by name only and resolved through a
//! [`SecretStore`](crate::secrets::SecretStore) when a task runs.

use crate::eia::{ClientConfig, DEFAULT_BASE_URL, MAX_PAGE_LENGTH};
use crate::forecast::LAG_DEPTH;
use crate::monitor::DEFAULT_RMSE_THRESHOLD;
use crate::preprocess::PreprocessPaths;
use crate::retry::{Backoff, RetryPolicy};
use crate::training::TrainingJob;
use chrono::NaiveDate;
use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

pub const ENV_PREFIX: &str = "FORECAST__";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to load settings: {0}")]
    Load(#[from] figment::Error),
    #[error("Invalid setting {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Settings {
    pub lake: LakeSettings,
    pub eia: EiaSettings,
    pub monitoring: MonitoringSettings,
    pub training: TrainingSettings,
    pub orchestration: OrchestrationSettings,
    pub dashboard: DashboardSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LakeSettings {
    /// Directory (or mounted container) all lake paths are relative to.
    pub root: PathBuf,
    pub historical_path: String,
    pub daily_path: String,
    pub curated_path: String,
    /// Dataset prefix the training job writes predictions under.
    pub predictions_path: String,
}

impl Default for LakeSettings {
    fn default() -> Self {
        LakeSettings {
            root: PathBuf::from("lake"),
            historical_path: "raw/historical/hourly_data.parquet".to_string(),
            daily_path: "raw/daily/hourly_data.parquet".to_string(),
            curated_path: "processed/curated.parquet".to_string(),
            predictions_path: "predictions/".to_string(),
        }
    }
}

impl LakeSettings {
    pub fn preprocess_paths(&self) -> PreprocessPaths {
        PreprocessPaths {
            historical: self.historical_path.clone(),
            daily: self.daily_path.clone(),
            curated: self.curated_path.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EiaSettings {
    pub base_url: String,
    /// Secret holding the API key.
    pub api_key_secret: String,
    pub max_attempts: u32,
    /// The n-th retry waits n times this long.
    pub backoff_seconds: u64,
    pub timeout_seconds: u64,
    pub page_length: usize,
}

impl Default for EiaSettings {
    fn default() -> Self {
        EiaSettings {
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key_secret: "EIAApiToken".to_string(),
            max_attempts: 3,
            backoff_seconds: 5,
            timeout_seconds: 30,
            page_length: MAX_PAGE_LENGTH,
        }
    }
}

impl EiaSettings {
    pub fn client_config(&self) -> ClientConfig {
        ClientConfig {
            base_url: self.base_url.clone(),
            max_attempts: self.max_attempts,
            backoff: Duration::from_secs(self.backoff_seconds),
            timeout_seconds: self.timeout_seconds,
            page_length: self.page_length,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitoringSettings {
    pub rmse_threshold: f64,
}

impl Default for MonitoringSettings {
    fn default() -> Self {
        MonitoringSettings {
            rmse_threshold: DEFAULT_RMSE_THRESHOLD,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingSettings {
    /// Base URL of the jobs workspace.
    pub host: String,
    /// Secret holding the workspace bearer token.
    pub token_secret: String,
    pub cluster_id: String,
    pub notebook_path: String,
    pub run_name: String,
    pub model_name: String,
    pub tracking_uri: String,
    pub timeout_seconds: u64,
}

impl Default for TrainingSettings {
    fn default() -> Self {
        TrainingSettings {
            host: "http://localhost:8080".to_string(),
            token_secret: "DatabricksToken".to_string(),
            cluster_id: "mlops-cluster".to_string(),
            notebook_path: "/Workspace/Shared/energy_forecast".to_string(),
            run_name: "energy_weekly_retrain".to_string(),
            model_name: "nyis_forecast".to_string(),
            tracking_uri: "http://mlflow:5000".to_string(),
            timeout_seconds: 60,
        }
    }
}

impl TrainingSettings {
    /// The weekly job: trains on the curated snapshot, writes predictions
    /// where the monitor reads them.
    pub fn job(&self, lake: &LakeSettings) -> TrainingJob {
        TrainingJob {
            run_name: self.run_name.clone(),
            cluster_id: self.cluster_id.clone(),
            notebook_path: self.notebook_path.clone(),
            input_path: lake.curated_path.clone(),
            model_name: self.model_name.clone(),
            tracking_uri: self.tracking_uri.clone(),
            output_path: lake.predictions_path.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestrationSettings {
    /// Retries after the first attempt of a failed task.
    pub task_retries: u32,
    pub retry_delay_seconds: u64,
    /// No run is scheduled before this date.
    pub start_date: NaiveDate,
}

impl Default for OrchestrationSettings {
    fn default() -> Self {
        OrchestrationSettings {
            task_retries: 2,
            retry_delay_seconds: 300,
            start_date: NaiveDate::from_ymd_opt(2025, 9, 1).unwrap_or_default(),
        }
    }
}

impl OrchestrationSettings {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.task_retries.saturating_add(1),
            Duration::from_secs(self.retry_delay_seconds),
            Backoff::Fixed,
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DashboardSettings {
    pub host: String,
    pub port: u16,
    pub scoring_url: String,
    /// Secret holding a bearer token for the scoring endpoint, if it needs one.
    pub scoring_token_secret: Option<String>,
    /// Unset keeps the HTTP client's default (no timeout).
    pub scoring_timeout_seconds: Option<u64>,
    pub horizon: usize,
    pub history_hours: usize,
    /// Attempts per API fetch; the user waits on every one of them.
    pub fetch_attempts: u32,
    pub fetch_backoff_seconds: u64,
}

impl Default for DashboardSettings {
    fn default() -> Self {
        DashboardSettings {
            host: "127.0.0.1".to_string(),
            port: 8050,
            scoring_url: "http://localhost:5000/invocations".to_string(),
            scoring_token_secret: None,
            scoring_timeout_seconds: None,
            horizon: 3,
            history_hours: LAG_DEPTH,
            fetch_attempts: 1,
            fetch_backoff_seconds: 1,
        }
    }
}

impl Settings {
    /// API client for dashboard requests: same endpoint and key as the
    /// pipeline, with the dashboard's own retry budget.
    pub fn dashboard_client_config(&self) -> ClientConfig {
        ClientConfig {
            max_attempts: self.dashboard.fetch_attempts,
            backoff: Duration::from_secs(self.dashboard.fetch_backoff_seconds),
            ..self.eia.client_config()
        }
    }

    /// Defaults merged with `path` (when given and present) and the environment.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut figment = Figment::from(Serialized::defaults(Settings::default()));
        if let Some(path) = path {
            figment = figment.merge(Toml::file(path));
        }
        Self::from_figment(figment.merge(Env::prefixed(ENV_PREFIX).split("__")))
    }

    pub fn from_figment(figment: Figment) -> Result<Self, ConfigError> {
        let settings: Settings = figment.extract()?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.eia.page_length == 0 || self.eia.page_length > MAX_PAGE_LENGTH {
            return Err(ConfigError::Invalid {
                key: "eia.page_length",
                reason: format!("must be between 1 and {MAX_PAGE_LENGTH}"),
            });
        }
        if !self.monitoring.rmse_threshold.is_finite() || self.monitoring.rmse_threshold < 0.0 {
            return Err(ConfigError::Invalid {
                key: "monitoring.rmse_threshold",
                reason: "must be a non-negative number".to_string(),
            });
        }
        if self.dashboard.horizon == 0 {
            return Err(ConfigError::Invalid {
                key: "dashboard.horizon",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.dashboard.fetch_attempts == 0 {
            return Err(ConfigError::Invalid {
                key: "dashboard.fetch_attempts",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.dashboard.history_hours < LAG_DEPTH {
            return Err(ConfigError::Invalid {
                key: "dashboard.history_hours",
                reason: format!("must be at least {LAG_DEPTH}"),
            });
        }
        if !self.lake.predictions_path.ends_with('/') {
            return Err(ConfigError::Invalid {
                key: "lake.predictions_path",
                reason: "must be a dataset prefix ending in '/'".to_string(),
            });
        }
        Ok(())
    }
}

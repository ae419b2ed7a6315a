//! Shared application state for the dashboard server

use crate::clock::{Clock, SystemClock};
use crate::config::{DashboardSettings, Settings};
use crate::demand::{sort_by_period, DateRange};
use crate::eia::{EiaClient, FetchError};
use crate::forecast::ForecastPoint;
use crate::scoring::{Scorer, ScoringClient, ScoringError};
use crate::secrets::{SecretError, SecretStore};
use chrono::Duration;
use std::sync::Arc;
use std::time::Duration as StdDuration;
use thiserror::Error;
use tracing::info;

/// Failures while building [`AppState`] or serving a dashboard request.
#[derive(Debug, Error)]
pub enum DashboardError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error(transparent)]
    Scoring(#[from] ScoringError),
    #[error(transparent)]
    Secret(#[from] SecretError),
}

/// Shared application state
///
/// Nothing is cached between requests: every view refetches the window from
/// the API.
#[derive(Clone)]
pub struct AppState {
    pub eia: EiaClient,
    pub secrets: Arc<dyn SecretStore>,
    pub scorer: Arc<dyn Scorer>,
    pub clock: Arc<dyn Clock>,
    pub settings: DashboardSettings,
    /// Name of the secret holding the API key.
    pub api_key_secret: String,
}

impl AppState {
    pub fn new(
        eia: EiaClient,
        secrets: Arc<dyn SecretStore>,
        scorer: Arc<dyn Scorer>,
        clock: Arc<dyn Clock>,
        settings: DashboardSettings,
        api_key_secret: impl Into<String>,
    ) -> Self {
        AppState {
            eia,
            secrets,
            scorer,
            clock,
            settings,
            api_key_secret: api_key_secret.into(),
        }
    }

    /// HTTP clients for the API and the scoring endpoint, wall clock.
    ///
    /// No secret is read here; the API key and the scoring token are looked up
    /// per request.
    pub fn from_settings(
        settings: &Settings,
        secrets: Arc<dyn SecretStore>,
    ) -> Result<Self, DashboardError> {
        let eia = EiaClient::with_config(settings.dashboard_client_config())?;

        let dashboard = &settings.dashboard;
        let timeout = dashboard.scoring_timeout_seconds.map(StdDuration::from_secs);
        let mut scorer = ScoringClient::new(dashboard.scoring_url.clone(), timeout)?;
        if let Some(name) = &dashboard.scoring_token_secret {
            scorer = scorer.with_token_secret(Arc::clone(&secrets), name.clone());
        }

        Ok(Self::new(
            eia,
            secrets,
            Arc::new(scorer),
            Arc::new(SystemClock),
            dashboard.clone(),
            settings.eia.api_key_secret.clone(),
        ))
    }

    /// The trailing `history_hours` demand values, oldest first.
    ///
    /// Fetches yesterday and today, keeps demand rows (`type` "D", or rows
    /// without a type) that carry a value.
    pub async fn fetch_history(&self) -> Result<Vec<ForecastPoint>, DashboardError> {
        let api_key = self.secrets.get(&self.api_key_secret)?;
        let today = self.clock.now().date_naive();
        let range = DateRange::new(today - Duration::days(1), today);

        let mut records = self.eia.fetch_demand(&api_key, &range).await?;
        records.retain(|r| r.series_type.as_deref().map_or(true, |t| t == "D"));
        sort_by_period(&mut records);

        let mut points: Vec<ForecastPoint> = records
            .iter()
            .filter_map(|r| {
                r.value.map(|value| ForecastPoint {
                    period: r.period,
                    value,
                })
            })
            .collect();
        points.dedup_by_key(|p| p.period);

        let keep = self.settings.history_hours;
        if points.len() > keep {
            points.drain(..points.len() - keep);
        }
        info!(points = points.len(), "dashboard history window loaded");
        Ok(points)
    }
}

//! HTTP request handlers for the dashboard

use axum::{
    body::Bytes,
    extract::State,
    http::Uri,
    response::Html,
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{info, warn};

use super::error::ApiError;
use super::state::AppState;
use crate::forecast::{forecast_horizon, ForecastPoint, ForecastState};

pub const DASHBOARD_TITLE: &str = "NYIS Energy Forecast Dashboard";
pub const PROMPT_MESSAGE: &str = "Click 'Run Forecast' to generate 3-hour predictions.";
/// Longest horizon a single request may ask for.
pub const MAX_HORIZON: usize = 48;

const INDEX_HTML: &str = include_str!("index.html");

/// Health check endpoint
pub async fn health_check() -> Json<Value> {
    Json(json!({
        "status": "ok"
    }))
}

/// GET / - HTML shell that renders the JSON views
pub async fn index() -> Html<&'static str> {
    Html(INDEX_HTML)
}

/// One chart trace
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChartSeries {
    pub name: String,
    pub points: Vec<ForecastPoint>,
}

/// Everything the page draws: the chart traces and a status line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DashboardView {
    pub title: String,
    pub historical: ChartSeries,
    /// Absent until a forecast succeeds.
    pub forecast: Option<ChartSeries>,
    pub message: String,
}

impl DashboardView {
    fn new(history: Vec<ForecastPoint>, message: impl Into<String>) -> Self {
        DashboardView {
            title: DASHBOARD_TITLE.to_string(),
            historical: ChartSeries {
                name: "Historical Demand".to_string(),
                points: history,
            },
            forecast: None,
            message: message.into(),
        }
    }

    fn with_forecast(mut self, horizon: usize, points: Vec<ForecastPoint>) -> Self {
        self.forecast = Some(ChartSeries {
            name: format!("{}-Hour Forecast", horizon),
            points,
        });
        self
    }
}

fn error_message(err: &dyn std::fmt::Display) -> String {
    format!("Error fetching data or predicting: {}", err)
}

/// GET /api/dashboard - historical trace only
///
/// Fetch failures are reported in `message` with an empty chart.
pub async fn dashboard(State(state): State<Arc<AppState>>) -> Json<DashboardView> {
    match state.fetch_history().await {
        Ok(history) => Json(DashboardView::new(history, PROMPT_MESSAGE)),
        Err(e) => {
            warn!(error = %e, "dashboard history fetch failed");
            Json(DashboardView::new(Vec::new(), error_message(&e)))
        }
    }
}

/// Body of `POST /api/forecast`; an empty body uses the configured horizon.
#[derive(Debug, Default, Deserialize)]
pub struct ForecastRequest {
    pub horizon: Option<usize>,
}

/// POST /api/forecast - history plus an autoregressive forecast
///
/// Any fetch or scoring failure degrades to the historical trace (possibly
/// empty) with the error in `message`.
pub async fn run_forecast(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<Json<DashboardView>, ApiError> {
    let request: ForecastRequest = if body.is_empty() {
        ForecastRequest::default()
    } else {
        serde_json::from_slice(&body)?
    };
    let horizon = request.horizon.unwrap_or(state.settings.horizon);
    if horizon == 0 || horizon > MAX_HORIZON {
        return Err(ApiError::InvalidParameter(format!(
            "horizon must be between 1 and {}, got {}",
            MAX_HORIZON, horizon
        )));
    }

    let history = match state.fetch_history().await {
        Ok(history) => history,
        Err(e) => {
            warn!(error = %e, "forecast history fetch failed");
            return Ok(Json(DashboardView::new(Vec::new(), error_message(&e))));
        }
    };

    let result = match ForecastState::seed(&history) {
        Ok(initial) => forecast_horizon(state.scorer.as_ref(), initial, horizon).await,
        Err(e) => Err(e),
    };

    let view = match result {
        Ok(points) => {
            info!(horizon, "forecast generated");
            DashboardView::new(
                history,
                format!("Generated {}-hour forecast using real EIA data.", horizon),
            )
            .with_forecast(horizon, points)
        }
        Err(e) => {
            warn!(error = %e, "forecast failed");
            DashboardView::new(history, error_message(&e))
        }
    };
    Ok(Json(view))
}

/// Fallback for unknown routes
pub async fn not_found(uri: Uri) -> ApiError {
    ApiError::NotFound(uri.path().to_string())
}

//! Forecast quality check gating the weekly retrain.

use crate::dag::TaskError;
use crate::lake::{Lake, LakeError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// RMSE above which a retrain is requested, in MW.
pub const DEFAULT_RMSE_THRESHOLD: f64 = 5000.0;

/// One scored hour as written by the training job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionRecord {
    pub period: Option<DateTime<Utc>>,
    pub forecast: Option<f64>,
    pub value: Option<f64>,
}

impl PredictionRecord {
    pub fn new(forecast: f64, value: f64) -> Self {
        PredictionRecord {
            period: None,
            forecast: Some(forecast),
            value: Some(value),
        }
    }
}

/// Outcome of the monitoring task, consumed by the graph's branching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetrainDecision {
    Retrain,
    NoOp,
}

/// Root-mean-square error over `(forecast, actual)` pairs; `None` when empty.
pub fn rmse<I>(pairs: I) -> Option<f64>
where
    I: IntoIterator<Item = (f64, f64)>,
{
    let (sum, count) = pairs
        .into_iter()
        .fold((0.0, 0usize), |(sum, count), (forecast, actual)| {
            let err = forecast - actual;
            (sum + err * err, count + 1)
        });
    (count > 0).then(|| (sum / count as f64).sqrt())
}

/// `Retrain` only when `rmse` is strictly above `threshold`.
pub fn decide(rmse: f64, threshold: f64) -> RetrainDecision {
    if rmse > threshold {
        RetrainDecision::Retrain
    } else {
        RetrainDecision::NoOp
    }
}

/// Scores every stored prediction against its actual value.
///
/// An empty or missing table, or one lacking `forecast` or `value`, means
/// there is nothing to monitor: the result is `NoOp`, not an error.
pub async fn compare_forecast_vs_actual(
    lake: &Lake,
    predictions_path: &str,
    threshold: f64,
) -> Result<RetrainDecision, TaskError> {
    let predictions: Vec<PredictionRecord> = match lake.read(predictions_path).await {
        Ok(rows) => rows,
        Err(LakeError::MissingColumn(column)) => {
            info!(path = predictions_path, column, "predictions lack a required column");
            return Ok(RetrainDecision::NoOp);
        }
        Err(e) => return Err(e.into()),
    };

    if predictions.is_empty() {
        info!(path = predictions_path, "no predictions available");
        return Ok(RetrainDecision::NoOp);
    }

    let pairs: Vec<(f64, f64)> = predictions
        .iter()
        .filter_map(|p| Some((p.forecast?, p.value?)))
        .collect();
    let skipped = predictions.len() - pairs.len();
    if skipped > 0 {
        warn!(skipped, "ignoring predictions with a null forecast or value");
    }

    let Some(score) = rmse(pairs) else {
        info!(path = predictions_path, "no complete prediction rows");
        return Ok(RetrainDecision::NoOp);
    };

    let decision = decide(score, threshold);
    info!(rmse = score, threshold, ?decision, "forecast error computed");
    Ok(decision)
}

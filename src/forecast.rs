//! Autoregressive short-horizon forecasting for the dashboard.
//!
//! The model scores one hour at a time from calendar features and the last
//! [`LAG_DEPTH`] demand values. Each prediction is pushed back into the lag
//! window to score the following hour.

use crate::features::{dayofweek, hour};
use crate::scoring::{Scorer, ScoringError};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use thiserror::Error;
use tracing::info;

/// Number of hourly lags the dashboard model consumes.
pub const LAG_DEPTH: usize = 24;

#[derive(Debug, Error)]
pub enum ForecastError {
    #[error("Insufficient history: need {needed} hourly values, have {available}")]
    InsufficientHistory { needed: usize, available: usize },
    #[error("Lag window capacity must be greater than 0")]
    ZeroCapacity,
    #[error(transparent)]
    Scoring(#[from] ScoringError),
}

/// Fixed-capacity window over a lagged series.
///
/// Values are kept oldest to newest; pushing into a full window evicts the
/// oldest value.
#[derive(Debug, Clone, PartialEq)]
pub struct LagWindow {
    data: VecDeque<f64>,
    capacity: usize,
}

impl LagWindow {
    pub fn new(capacity: usize) -> Result<Self, ForecastError> {
        if capacity == 0 {
            return Err(ForecastError::ZeroCapacity);
        }
        Ok(LagWindow {
            data: VecDeque::with_capacity(capacity),
            capacity,
        })
    }

    /// Window holding the trailing `capacity` entries of `values`.
    pub fn from_values(capacity: usize, values: &[f64]) -> Result<Self, ForecastError> {
        let mut window = Self::new(capacity)?;
        for &v in values {
            window.push(v);
        }
        Ok(window)
    }

    pub fn push(&mut self, value: f64) {
        if self.data.len() == self.capacity {
            self.data.pop_front();
        }
        self.data.push_back(value);
    }

    /// Value `k` steps back; `lag(1)` is the most recent.
    pub fn lag(&self, k: usize) -> Option<f64> {
        if k == 0 || k > self.data.len() {
            return None;
        }
        self.data.get(self.data.len() - k).copied()
    }

    /// Contents from oldest to newest.
    pub fn values(&self) -> Vec<f64> {
        self.data.iter().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.data.len() == self.capacity
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

/// Named feature values sent to the scoring endpoint as one record.
///
/// Serialises as a JSON object keyed by name in byte order; the endpoint
/// matches columns by name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FeatureRecord(BTreeMap<String, f64>);

impl FeatureRecord {
    pub fn insert(&mut self, name: impl Into<String>, value: f64) {
        self.0.insert(name.into(), value);
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        self.0.get(name).copied()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Every feature a scoring record carries, grouped by kind. This is not the
/// order a [`FeatureRecord`] serialises in.
pub fn feature_names() -> Vec<String> {
    let mut names: Vec<String> = ["DF", "NG", "TI", "hour", "dayofweek"]
        .into_iter()
        .map(String::from)
        .collect();
    for k in 1..=LAG_DEPTH {
        names.push(format!("lag_D_{k}"));
        names.push(format!("lag_DF_{k}"));
    }
    names
}

/// One hourly value on a chart trace.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ForecastPoint {
    pub period: DateTime<Utc>,
    pub value: f64,
}

/// Inputs for scoring the hour at `target`.
///
/// `DF` and `NG` mirror the last observed demand and stay fixed over the
/// horizon; `TI` is always 0. Demand lags advance with each prediction while
/// the `DF` lags advance with `DF` itself.
#[derive(Debug, Clone, PartialEq)]
pub struct ForecastState {
    pub target: DateTime<Utc>,
    pub df: f64,
    pub ng: f64,
    pub ti: f64,
    pub demand_lags: LagWindow,
    pub df_lags: LagWindow,
}

impl ForecastState {
    /// Seeds the state from history sorted by period. The first target is the
    /// hour after the last observation.
    pub fn seed(history: &[ForecastPoint]) -> Result<Self, ForecastError> {
        if history.len() < LAG_DEPTH {
            return Err(ForecastError::InsufficientHistory {
                needed: LAG_DEPTH,
                available: history.len(),
            });
        }
        let Some(last) = history.last() else {
            return Err(ForecastError::InsufficientHistory {
                needed: LAG_DEPTH,
                available: 0,
            });
        };

        let values: Vec<f64> = history.iter().map(|p| p.value).collect();
        Ok(ForecastState {
            target: last.period + Duration::hours(1),
            df: last.value,
            ng: last.value,
            ti: 0.0,
            demand_lags: LagWindow::from_values(LAG_DEPTH, &values)?,
            df_lags: LagWindow::from_values(LAG_DEPTH, &values)?,
        })
    }

    pub fn features(&self) -> FeatureRecord {
        let mut record = FeatureRecord::default();
        record.insert("DF", self.df);
        record.insert("NG", self.ng);
        record.insert("TI", self.ti);
        record.insert("hour", f64::from(hour(&self.target)));
        record.insert("dayofweek", f64::from(dayofweek(&self.target)));
        for k in 1..=LAG_DEPTH {
            if let Some(v) = self.demand_lags.lag(k) {
                record.insert(format!("lag_D_{k}"), v);
            }
            if let Some(v) = self.df_lags.lag(k) {
                record.insert(format!("lag_DF_{k}"), v);
            }
        }
        record
    }
}

/// State for the hour after `state.target`, given the prediction for it.
pub fn advance(state: &ForecastState, prediction: f64) -> ForecastState {
    let mut next = state.clone();
    next.target = state.target + Duration::hours(1);
    next.demand_lags.push(prediction);
    next.df_lags.push(state.df);
    next
}

/// Scores `horizon` consecutive hours, chaining each prediction into the
/// next request.
pub async fn forecast_horizon(
    scorer: &dyn Scorer,
    initial: ForecastState,
    horizon: usize,
) -> Result<Vec<ForecastPoint>, ForecastError> {
    let mut state = initial;
    let mut points = Vec::with_capacity(horizon);
    for step in 1..=horizon {
        let prediction = scorer.score(&state.features()).await?;
        info!(step, period = %state.target, prediction, "forecast step");
        points.push(ForecastPoint {
            period: state.target,
            value: prediction,
        });
        state = advance(&state, prediction);
    }
    Ok(points)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::TimeZone;
    use std::sync::Mutex;

    fn history(n: usize) -> Vec<ForecastPoint> {
        let start = Utc.with_ymd_and_hms(2025, 9, 1, 0, 0, 0).unwrap();
        (0..n)
            .map(|i| ForecastPoint {
                period: start + Duration::hours(i as i64),
                value: 1000.0 + i as f64,
            })
            .collect()
    }

    /// Returns a constant and remembers every record it saw.
    struct EchoScorer {
        value: f64,
        seen: Mutex<Vec<FeatureRecord>>,
    }

    #[async_trait]
    impl Scorer for EchoScorer {
        async fn score(&self, record: &FeatureRecord) -> Result<f64, ScoringError> {
            if let Ok(mut seen) = self.seen.lock() {
                seen.push(record.clone());
            }
            Ok(self.value)
        }
    }

    #[test]
    fn test_lag_window_wraparound() {
        let mut window = LagWindow::new(3).unwrap();
        for v in [1.0, 2.0, 3.0, 4.0] {
            window.push(v);
        }
        assert!(window.is_full());
        assert_eq!(window.values(), vec![2.0, 3.0, 4.0]);
        assert_eq!(window.lag(1), Some(4.0));
        assert_eq!(window.lag(3), Some(2.0));
        assert_eq!(window.lag(4), None);
        assert_eq!(window.lag(0), None);
        assert!(matches!(LagWindow::new(0), Err(ForecastError::ZeroCapacity)));
    }

    #[test]
    fn test_seed_requires_full_window() {
        let err = ForecastState::seed(&history(23)).unwrap_err();
        assert!(matches!(
            err,
            ForecastError::InsufficientHistory { needed: 24, available: 23 }
        ));
    }

    #[test]
    fn test_record_serialises_by_name() {
        let features = ForecastState::seed(&history(24)).unwrap().features();
        let json = serde_json::to_string(&features).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        let object = value.as_object().unwrap();

        let mut expected = feature_names();
        expected.sort();
        let mut keys: Vec<&String> = object.keys().collect();
        keys.sort();
        assert_eq!(keys, expected.iter().collect::<Vec<_>>());

        // key positions in the raw text follow byte order of the names
        let positions: Vec<usize> = expected
            .iter()
            .map(|name| json.find(&format!("\"{name}\":")).unwrap())
            .collect();
        assert!(positions.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_seed_features() {
        let state = ForecastState::seed(&history(30)).unwrap();
        let features = state.features();

        assert_eq!(features.len(), feature_names().len());
        // last observation is hour 29 = 2025-09-02T05, value 1029
        assert_eq!(features.get("hour"), Some(6.0));
        assert_eq!(features.get("dayofweek"), Some(1.0));
        assert_eq!(features.get("DF"), Some(1029.0));
        assert_eq!(features.get("TI"), Some(0.0));
        assert_eq!(features.get("lag_D_1"), Some(1029.0));
        assert_eq!(features.get("lag_D_24"), Some(1006.0));
        assert_eq!(features.get("lag_DF_24"), Some(1006.0));
    }

    #[test]
    fn test_advance_is_pure_shift() {
        let state = ForecastState::seed(&history(24)).unwrap();
        let next = advance(&state, 5000.0);

        assert_eq!(next.target, state.target + Duration::hours(1));
        assert_eq!(next.demand_lags.lag(1), Some(5000.0));
        assert_eq!(next.demand_lags.lag(2), state.demand_lags.lag(1));
        assert_eq!(next.df_lags.lag(1), Some(state.df));
        assert_eq!(next.df, state.df);
        // input untouched
        assert_eq!(state.demand_lags.lag(1), Some(1023.0));
    }

    #[tokio::test]
    async fn test_horizon_chains_predictions() {
        let hist = history(24);
        let last = hist[23].period;
        let scorer = EchoScorer {
            value: 777.0,
            seen: Mutex::new(Vec::new()),
        };

        let points = forecast_horizon(&scorer, ForecastState::seed(&hist).unwrap(), 3)
            .await
            .unwrap();

        assert_eq!(
            points.iter().map(|p| p.value).collect::<Vec<_>>(),
            vec![777.0; 3]
        );
        for (i, p) in points.iter().enumerate() {
            assert_eq!(p.period, last + Duration::hours(i as i64 + 1));
        }

        let seen = scorer.seen.lock().unwrap();
        assert_eq!(seen.len(), 3);
        assert_eq!(seen[1].get("lag_D_1"), Some(777.0));
        assert_eq!(seen[2].get("lag_D_2"), Some(777.0));
        assert_eq!(seen[2].get("lag_D_3"), Some(1023.0));
    }
}

//! Calendar and lag features shared by the batch and dashboard paths.

use crate::demand::DemandRecord;
use chrono::{DateTime, Datelike, Timelike, Utc};
use serde::{Deserialize, Serialize};

/// Hour of day, 0-23.
pub fn hour(period: &DateTime<Utc>) -> u32 {
    period.hour()
}

/// Day of week with Monday = 0 and Sunday = 6.
pub fn dayofweek(period: &DateTime<Utc>) -> u32 {
    period.weekday().num_days_from_monday()
}

/// Shifts `values` down by `k` rows; the first `k` entries become `None`.
pub fn lag(values: &[Option<f64>], k: usize) -> Vec<Option<f64>> {
    (0..values.len())
        .map(|i| if i >= k { values[i - k] } else { None })
        .collect()
}

/// A row of the curated snapshot. Rows with any missing column never make it
/// this far, so nothing here is optional.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CuratedRecord {
    pub period: DateTime<Utc>,
    pub respondent: String,
    pub respondent_name: String,
    pub series_type: String,
    pub type_name: String,
    pub value: f64,
    pub value_units: String,
    pub hour: u32,
    pub dayofweek: u32,
    pub lag_1h: f64,
}

/// Derives `hour`, `dayofweek` and `lag_1h` from rows already sorted by
/// period, then drops every row with a null anywhere.
///
/// The lag is positional: it is the previous row's value, whatever its
/// period. The first row therefore never survives.
pub fn curate(records: &[DemandRecord]) -> Vec<CuratedRecord> {
    let values: Vec<Option<f64>> = records.iter().map(|r| r.value).collect();
    let lagged = lag(&values, 1);

    records
        .iter()
        .zip(lagged)
        .filter_map(|(r, lag_1h)| {
            Some(CuratedRecord {
                period: r.period,
                respondent: r.respondent.clone(),
                respondent_name: r.respondent_name.clone()?,
                series_type: r.series_type.clone()?,
                type_name: r.type_name.clone()?,
                value: r.value?,
                value_units: r.value_units.clone()?,
                hour: hour(&r.period),
                dayofweek: dayofweek(&r.period),
                lag_1h: lag_1h?,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(day: u32, h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 9, day, h, 0, 0).unwrap()
    }

    #[test]
    fn test_calendar_features() {
        // 2025-09-01 is a Monday, 2025-09-07 a Sunday
        assert_eq!(dayofweek(&at(1, 0)), 0);
        assert_eq!(dayofweek(&at(7, 23)), 6);
        assert_eq!(hour(&at(7, 23)), 23);
    }

    #[test]
    fn test_lag_shifts_values() {
        let values = vec![Some(1.0), Some(2.0), None, Some(4.0)];
        assert_eq!(lag(&values, 1), vec![None, Some(1.0), Some(2.0), None]);
        assert_eq!(lag(&values, 5), vec![None; 4]);
        assert!(lag(&[], 1).is_empty());
    }

    #[test]
    fn test_curate_drops_first_row_and_nulls() {
        let mut rows: Vec<DemandRecord> = (0..5)
            .map(|h| DemandRecord::nyis_demand(at(2, h), 100.0 + h as f64))
            .collect();
        rows[2].value = None;

        let curated = curate(&rows);
        // row 0 has no lag, row 2 has no value, row 3 lags a null
        let hours: Vec<u32> = curated.iter().map(|r| r.hour).collect();
        assert_eq!(hours, vec![1, 4]);
        assert_eq!(curated[0].lag_1h, 100.0);
        assert_eq!(curated[1].lag_1h, 103.0);
        assert_eq!(curated[0].dayofweek, 1);
    }

    #[test]
    fn test_curate_drops_rows_missing_descriptive_columns() {
        let mut rows: Vec<DemandRecord> = (0..3)
            .map(|h| DemandRecord::nyis_demand(at(2, h), 1.0))
            .collect();
        rows[2].value_units = None;
        assert_eq!(curate(&rows).len(), 1);
    }
}

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use ordered_float::OrderedFloat;
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::HashSet;

/// Balancing authority every request is filtered to.
pub const RESPONDENT: &str = "NYIS";

/// One hourly observation from the region-data route.
///
/// Field names follow the API payload (`respondent-name`, `type`, ...). Only
/// `period` and `respondent` are required; everything else may be absent or
/// null in the upstream response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DemandRecord {
    #[serde(with = "eia_period")]
    pub period: DateTime<Utc>,
    pub respondent: String,
    #[serde(rename = "respondent-name", default)]
    pub respondent_name: Option<String>,
    #[serde(rename = "type", default)]
    pub series_type: Option<String>,
    #[serde(rename = "type-name", default)]
    pub type_name: Option<String>,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub value: Option<f64>,
    #[serde(rename = "value-units", default)]
    pub value_units: Option<String>,
}

impl DemandRecord {
    /// Creates a record carrying only the required columns and a value.
    pub fn new(period: DateTime<Utc>, respondent: impl Into<String>, value: Option<f64>) -> Self {
        DemandRecord {
            period,
            respondent: respondent.into(),
            respondent_name: None,
            series_type: None,
            type_name: None,
            value,
            value_units: None,
        }
    }

    /// Hourly demand row with every descriptive column populated, shaped like
    /// the `type=D` rows the API returns for the respondent.
    pub fn nyis_demand(period: DateTime<Utc>, value: f64) -> Self {
        DemandRecord {
            period,
            respondent: RESPONDENT.to_string(),
            respondent_name: Some("New York Independent System Operator".to_string()),
            series_type: Some("D".to_string()),
            type_name: Some("Demand".to_string()),
            value: Some(value),
            value_units: Some("megawatthours".to_string()),
        }
    }

    fn row_key(&self) -> RowKey {
        (
            self.period,
            self.respondent.clone(),
            self.respondent_name.clone(),
            self.series_type.clone(),
            self.type_name.clone(),
            self.value.map(OrderedFloat),
            self.value_units.clone(),
        )
    }
}

type RowKey = (
    DateTime<Utc>,
    String,
    Option<String>,
    Option<String>,
    Option<String>,
    Option<OrderedFloat<f64>>,
    Option<String>,
);

/// Date range for upstream queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DateRange {
    /// Start date (inclusive)
    pub start: NaiveDate,
    /// End date (inclusive)
    pub end: NaiveDate,
}

impl DateRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Self {
        DateRange { start, end }
    }

    /// Range covering a single day.
    pub fn single_day(day: NaiveDate) -> Self {
        DateRange {
            start: day,
            end: day,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.start <= self.end
    }
}

/// Removes rows that are equal in every column, keeping the first occurrence.
pub fn dedup_rows(records: Vec<DemandRecord>) -> Vec<DemandRecord> {
    let mut seen: HashSet<RowKey> = HashSet::with_capacity(records.len());
    records
        .into_iter()
        .filter(|r| seen.insert(r.row_key()))
        .collect()
}

/// Concatenates `old` and `new`, then drops full-row duplicates.
pub fn merge_unique(old: Vec<DemandRecord>, new: Vec<DemandRecord>) -> Vec<DemandRecord> {
    let mut all = old;
    all.extend(new);
    dedup_rows(all)
}

/// Stable ascending sort on `period`.
pub fn sort_by_period(records: &mut [DemandRecord]) {
    records.sort_by_key(|r| r.period);
}

/// Parses the API's hourly period (`2025-01-01T05`); RFC 3339 is accepted too.
pub fn parse_period(raw: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
    match NaiveDateTime::parse_from_str(&format!("{raw}:00"), "%Y-%m-%dT%H:%M") {
        Ok(naive) => Ok(naive.and_utc()),
        Err(hourly_err) => DateTime::parse_from_rfc3339(raw)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|_| hourly_err),
    }
}

/// Serialises periods the way the API formats them.
pub fn format_period(period: &DateTime<Utc>) -> String {
    period.format("%Y-%m-%dT%H").to_string()
}

mod eia_period {
    use super::{format_period, parse_period};
    use chrono::{DateTime, Utc};
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &DateTime<Utc>, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&format_period(value))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(d)?;
        parse_period(&raw).map_err(|e| de::Error::custom(format!("invalid period '{raw}': {e}")))
    }
}

/// The API reports `value` as a number, a numeric string or null.
fn lenient_f64<'de, D: Deserializer<'de>>(d: D) -> Result<Option<f64>, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Num(f64),
        Text(String),
    }

    match Option::<Raw>::deserialize(d)? {
        None => Ok(None),
        Some(Raw::Num(v)) => Ok(Some(v)),
        Some(Raw::Text(s)) if s.trim().is_empty() => Ok(None),
        Some(Raw::Text(s)) => s
            .trim()
            .parse::<f64>()
            .map(Some)
            .map_err(|e| serde::de::Error::custom(format!("invalid value '{s}': {e}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn record(hour: u32, value: f64) -> DemandRecord {
        DemandRecord::new(
            Utc.with_ymd_and_hms(2025, 1, 1, hour, 0, 0).unwrap(),
            RESPONDENT,
            Some(value),
        )
    }

    #[test]
    fn test_parse_hourly_period() {
        let parsed = parse_period("2025-01-01T05").unwrap();
        assert_eq!(parsed, Utc.with_ymd_and_hms(2025, 1, 1, 5, 0, 0).unwrap());
        assert_eq!(format_period(&parsed), "2025-01-01T05");
    }

    #[test]
    fn test_parse_rfc3339_period() {
        let parsed = parse_period("2025-01-01T05:00:00+00:00").unwrap();
        assert_eq!(parsed, Utc.with_ymd_and_hms(2025, 1, 1, 5, 0, 0).unwrap());
        assert!(parse_period("yesterday").is_err());
    }

    #[test]
    fn test_deserialize_api_row() {
        let json = r#"{
            "period": "2025-01-01T05",
            "respondent": "NYIS",
            "respondent-name": "New York Independent System Operator",
            "type": "D",
            "type-name": "Demand",
            "value": "15234",
            "value-units": "megawatthours"
        }"#;
        let rec: DemandRecord = serde_json::from_str(json).unwrap();
        assert_eq!(rec.value, Some(15234.0));
        assert_eq!(rec.series_type.as_deref(), Some("D"));
        assert_eq!(rec.respondent, "NYIS");
    }

    #[test]
    fn test_deserialize_numeric_and_null_values() {
        let numeric: DemandRecord =
            serde_json::from_str(r#"{"period":"2025-01-01T05","respondent":"NYIS","value":17000.5}"#)
                .unwrap();
        assert_eq!(numeric.value, Some(17000.5));

        let null: DemandRecord =
            serde_json::from_str(r#"{"period":"2025-01-01T05","respondent":"NYIS","value":null}"#)
                .unwrap();
        assert_eq!(null.value, None);
    }

    #[test]
    fn test_missing_period_is_an_error() {
        let result: Result<DemandRecord, _> =
            serde_json::from_str(r#"{"respondent":"NYIS","value":1}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_dedup_keeps_first_occurrence_and_distinct_rows() {
        let rows = vec![record(1, 10.0), record(2, 20.0), record(1, 10.0), record(1, 11.0)];
        let unique = dedup_rows(rows);
        assert_eq!(unique.len(), 3);
        assert_eq!(unique[0], record(1, 10.0));
        assert_eq!(unique[2], record(1, 11.0));
    }

    #[test]
    fn test_merge_unique_is_idempotent() {
        let day = vec![record(0, 1.0), record(1, 2.0), record(2, 3.0)];
        let once = merge_unique(Vec::new(), day.clone());
        let twice = merge_unique(once.clone(), day);
        assert_eq!(once.len(), 3);
        assert_eq!(twice.len(), once.len());
    }

    #[test]
    fn test_sort_by_period_ascending() {
        let mut rows = vec![record(3, 3.0), record(1, 1.0), record(2, 2.0)];
        sort_by_period(&mut rows);
        let hours: Vec<_> = rows.iter().map(|r| r.value.unwrap()).collect();
        assert_eq!(hours, vec![1.0, 2.0, 3.0]);
    }

    #[test]
    fn test_date_range_validity() {
        let day = NaiveDate::from_ymd_opt(2025, 1, 2).unwrap();
        assert!(DateRange::single_day(day).is_valid());
        let inverted = DateRange::new(day, NaiveDate::from_ymd_opt(2025, 1, 1).unwrap());
        assert!(!inverted.is_valid());
    }
}

//! Raw snapshot ingestion.

use crate::dag::TaskError;
use crate::demand::{merge_unique, DateRange, DemandRecord};
use crate::eia::EiaClient;
use crate::lake::Lake;
use chrono::{DateTime, Duration, Utc};
use secrecy::SecretString;
use tracing::info;

/// Days before "now" the historical window starts.
pub const HISTORY_START_DAYS: i64 = 30;
/// Days before "now" the historical window ends.
pub const HISTORY_END_DAYS: i64 = 2;

/// Inclusive window the historical task fetches: now-30d .. now-2d.
pub fn historical_range(now: DateTime<Utc>) -> DateRange {
    let today = now.date_naive();
    DateRange::new(
        today - Duration::days(HISTORY_START_DAYS),
        today - Duration::days(HISTORY_END_DAYS),
    )
}

/// The single day before `now`.
pub fn daily_range(now: DateTime<Utc>) -> DateRange {
    DateRange::single_day(now.date_naive() - Duration::days(1))
}

/// Fetches the historical window and overwrites the snapshot at `path`.
///
/// Not incremental: whatever the snapshot held before is replaced, including
/// when the fetch comes back empty.
pub async fn fetch_historical_data(
    client: &EiaClient,
    api_key: &SecretString,
    lake: &Lake,
    path: &str,
    now: DateTime<Utc>,
) -> Result<usize, TaskError> {
    let range = historical_range(now);
    let rows = client.fetch_demand(api_key, &range).await?;
    lake.write(path, &rows).await?;
    info!(path, rows = rows.len(), start = %range.start, end = %range.end, "historical snapshot replaced");
    Ok(rows.len())
}

/// Fetches yesterday, merges it into the snapshot at `path` and drops
/// full-row duplicates. Running it twice for the same day is a no-op.
pub async fn fetch_daily_block(
    client: &EiaClient,
    api_key: &SecretString,
    lake: &Lake,
    path: &str,
    now: DateTime<Utc>,
) -> Result<usize, TaskError> {
    let range = daily_range(now);
    let fetched = client.fetch_demand(api_key, &range).await?;
    let existing: Vec<DemandRecord> = lake.read(path).await?;
    let before = existing.len();

    let merged = merge_unique(existing, fetched);
    lake.write(path, &merged).await?;
    info!(
        path,
        day = %range.start,
        previous = before,
        rows = merged.len(),
        "daily snapshot merged"
    );
    Ok(merged.len())
}

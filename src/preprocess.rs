//! Curated snapshot construction.

use crate::dag::TaskError;
use crate::demand::{dedup_rows, sort_by_period, DemandRecord};
use crate::features::curate;
use crate::lake::Lake;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// Lake locations the preprocessing task reads and writes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreprocessPaths {
    pub historical: String,
    pub daily: String,
    pub curated: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PreprocessOutcome {
    /// Both raw snapshots were empty; nothing was written.
    NoInput,
    Written { rows: usize },
}

/// Unions both raw snapshots, derives features and overwrites the curated
/// snapshot. With no raw data at all the previous curated snapshot is left
/// untouched.
pub async fn preprocess_data(
    lake: &Lake,
    paths: &PreprocessPaths,
) -> Result<PreprocessOutcome, TaskError> {
    let historical: Vec<DemandRecord> = lake.read(&paths.historical).await?;
    let daily: Vec<DemandRecord> = lake.read(&paths.daily).await?;

    if historical.is_empty() && daily.is_empty() {
        warn!("no raw data available, curated snapshot not rebuilt");
        return Ok(PreprocessOutcome::NoInput);
    }

    let mut rows = historical;
    rows.extend(daily);
    let mut rows = dedup_rows(rows);
    sort_by_period(&mut rows);

    let curated = curate(&rows);
    lake.write(&paths.curated, &curated).await?;
    info!(
        input = rows.len(),
        rows = curated.len(),
        path = %paths.curated,
        "curated snapshot written"
    );
    Ok(PreprocessOutcome::Written {
        rows: curated.len(),
    })
}

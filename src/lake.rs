//! Data lake access.
//!
//! Every stage of the pipeline keeps its state as one Parquet snapshot per
//! logical location. Reads of a missing location yield an empty table, writes
//! overwrite unconditionally. A location ending in `/` is a dataset prefix: all
//! `.parquet` objects directly below it are read and concatenated.

mod codec;
mod store;

pub use codec::{decode, encode, ParquetTable};
pub use store::{InMemoryObjectStore, LocalObjectStore, ObjectStore};

use std::sync::Arc;
use thiserror::Error;
use tracing::info;

/// Errors raised by the lake and its stores.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LakeError {
    #[error("I/O error on {path}: {message}")]
    Io { path: String, message: String },
    #[error("Invalid lake path: {0}")]
    InvalidPath(String),
    #[error("Parquet error: {0}")]
    Parquet(String),
    #[error("Arrow error: {0}")]
    Arrow(String),
    /// A required column is absent from a stored snapshot.
    #[error("Missing column: {0}")]
    MissingColumn(String),
    /// A non-nullable column holds a null.
    #[error("Null value in column {column} at row {row}")]
    NullValue { column: String, row: usize },
}

impl From<parquet::errors::ParquetError> for LakeError {
    fn from(err: parquet::errors::ParquetError) -> Self {
        LakeError::Parquet(err.to_string())
    }
}

impl From<arrow::error::ArrowError> for LakeError {
    fn from(err: arrow::error::ArrowError) -> Self {
        LakeError::Arrow(err.to_string())
    }
}

/// Typed snapshot reader/writer over an [`ObjectStore`].
#[derive(Clone)]
pub struct Lake {
    store: Arc<dyn ObjectStore>,
}

impl std::fmt::Debug for Lake {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Lake").field("store", &self.store.describe()).finish()
    }
}

impl Lake {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Lake { store }
    }

    /// Lake backed by a directory on the local filesystem.
    pub fn local(root: impl Into<std::path::PathBuf>) -> Self {
        Self::new(Arc::new(LocalObjectStore::new(root)))
    }

    /// Lake held entirely in memory.
    pub fn in_memory() -> Self {
        Self::new(Arc::new(InMemoryObjectStore::new()))
    }

    pub fn store(&self) -> &Arc<dyn ObjectStore> {
        &self.store
    }

    /// Reads the snapshot at `path`; a missing object is an empty table.
    pub async fn read<T: ParquetTable>(&self, path: &str) -> Result<Vec<T>, LakeError> {
        if path.ends_with('/') {
            return self.read_dataset(path).await;
        }

        match self.store.get(path).await? {
            Some(bytes) => decode(bytes),
            None => {
                info!(path, "snapshot not found, using empty table");
                Ok(Vec::new())
            }
        }
    }

    async fn read_dataset<T: ParquetTable>(&self, prefix: &str) -> Result<Vec<T>, LakeError> {
        let objects = self.store.list(prefix).await?;
        if objects.is_empty() {
            info!(path = prefix, "dataset not found, using empty table");
            return Ok(Vec::new());
        }

        let mut rows = Vec::new();
        for object in objects {
            if let Some(bytes) = self.store.get(&object).await? {
                rows.extend(decode::<T>(bytes)?);
            }
        }
        Ok(rows)
    }

    /// Serialises `rows` and overwrites the object at `path`.
    pub async fn write<T: ParquetTable>(&self, path: &str, rows: &[T]) -> Result<(), LakeError> {
        if path.ends_with('/') {
            return Err(LakeError::InvalidPath(format!(
                "cannot write a single snapshot to dataset prefix '{path}'"
            )));
        }
        let bytes = encode(rows)?;
        self.store.put(path, bytes).await?;
        info!(path, rows = rows.len(), "snapshot written");
        Ok(())
    }

    pub async fn exists(&self, path: &str) -> Result<bool, LakeError> {
        if path.ends_with('/') {
            return Ok(!self.store.list(path).await?.is_empty());
        }
        Ok(self.store.get(path).await?.is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::demand::{DemandRecord, RESPONDENT};
    use chrono::{TimeZone, Utc};

    fn rows() -> Vec<DemandRecord> {
        (0..3)
            .map(|h| {
                DemandRecord::new(
                    Utc.with_ymd_and_hms(2025, 1, 1, h, 0, 0).unwrap(),
                    RESPONDENT,
                    Some(15000.0 + h as f64),
                )
            })
            .collect()
    }

    #[tokio::test]
    async fn test_read_missing_object_is_empty() {
        let lake = Lake::in_memory();
        let table: Vec<DemandRecord> = lake.read("raw/daily/hourly_data.parquet").await.unwrap();
        assert!(table.is_empty());
        assert!(!lake.exists("raw/daily/hourly_data.parquet").await.unwrap());
    }

    #[tokio::test]
    async fn test_write_then_read() {
        let lake = Lake::in_memory();
        lake.write("raw/daily/hourly_data.parquet", &rows()).await.unwrap();
        let back: Vec<DemandRecord> = lake.read("raw/daily/hourly_data.parquet").await.unwrap();
        assert_eq!(back, rows());
    }

    #[tokio::test]
    async fn test_write_overwrites() {
        let lake = Lake::in_memory();
        lake.write("x.parquet", &rows()).await.unwrap();
        lake.write("x.parquet", &rows()[..1]).await.unwrap();
        let back: Vec<DemandRecord> = lake.read("x.parquet").await.unwrap();
        assert_eq!(back.len(), 1);
    }

    #[tokio::test]
    async fn test_empty_table_is_written() {
        let lake = Lake::in_memory();
        lake.write::<DemandRecord>("empty.parquet", &[]).await.unwrap();
        assert!(lake.exists("empty.parquet").await.unwrap());
        let back: Vec<DemandRecord> = lake.read("empty.parquet").await.unwrap();
        assert!(back.is_empty());
    }

    #[tokio::test]
    async fn test_dataset_prefix_concatenates_parts() {
        let lake = Lake::in_memory();
        let all = rows();
        lake.write("predictions/part-0.parquet", &all[..2]).await.unwrap();
        lake.write("predictions/part-1.parquet", &all[2..]).await.unwrap();

        let back: Vec<DemandRecord> = lake.read("predictions/").await.unwrap();
        assert_eq!(back.len(), 3);
        assert!(lake.exists("predictions/").await.unwrap());
    }

    #[tokio::test]
    async fn test_write_to_prefix_rejected() {
        let lake = Lake::in_memory();
        let err = lake.write("predictions/", &rows()).await.unwrap_err();
        assert!(matches!(err, LakeError::InvalidPath(_)));
    }
}

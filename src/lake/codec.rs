//! Arrow/Parquet encoding of the lake's row types.

use super::LakeError;
use crate::demand::DemandRecord;
use crate::features::CuratedRecord;
use crate::monitor::PredictionRecord;
use arrow::array::{
    Array, ArrayRef, AsArray, Float64Array, Int32Array, StringArray, TimestampMicrosecondArray,
};
use arrow::compute::cast;
use arrow::datatypes::{
    DataType, Field, Float64Type, Int32Type, Schema, SchemaRef, TimeUnit, TimestampMicrosecondType,
};
use arrow::record_batch::RecordBatch;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::arrow::ArrowWriter;
use parquet::basic::Compression;
use parquet::file::properties::WriterProperties;
use std::sync::Arc;

/// A row type with a fixed Arrow schema.
pub trait ParquetTable: Sized {
    fn schema() -> SchemaRef;

    /// Columns in schema order.
    fn to_columns(rows: &[Self]) -> Vec<ArrayRef>;

    /// Rows of one decoded batch. Columns are looked up by name and cast, so
    /// snapshots written by other tools decode as long as the names match.
    fn from_batch(batch: &RecordBatch) -> Result<Vec<Self>, LakeError>;
}

/// Serialises rows into an in-memory Parquet file.
pub fn encode<T: ParquetTable>(rows: &[T]) -> Result<Bytes, LakeError> {
    let schema = T::schema();
    let batch = RecordBatch::try_new(schema.clone(), T::to_columns(rows))?;

    let props = WriterProperties::builder()
        .set_compression(Compression::SNAPPY)
        .build();
    let mut buffer = Vec::new();
    let mut writer = ArrowWriter::try_new(&mut buffer, schema, Some(props))?;
    if batch.num_rows() > 0 {
        writer.write(&batch)?;
    }
    writer.close()?;
    Ok(Bytes::from(buffer))
}

/// Decodes every row group of a Parquet file.
pub fn decode<T: ParquetTable>(bytes: Bytes) -> Result<Vec<T>, LakeError> {
    let reader = ParquetRecordBatchReaderBuilder::try_new(bytes)?.build()?;
    let mut rows = Vec::new();
    for batch in reader {
        rows.extend(T::from_batch(&batch?)?);
    }
    Ok(rows)
}

fn timestamp_type() -> DataType {
    DataType::Timestamp(TimeUnit::Microsecond, Some("UTC".into()))
}

fn column<'a>(batch: &'a RecordBatch, name: &str) -> Result<&'a ArrayRef, LakeError> {
    batch
        .column_by_name(name)
        .ok_or_else(|| LakeError::MissingColumn(name.to_string()))
}

fn f64_column(batch: &RecordBatch, name: &str) -> Result<Float64Array, LakeError> {
    let casted = cast(column(batch, name)?, &DataType::Float64)?;
    Ok(casted.as_primitive::<Float64Type>().clone())
}

fn i32_column(batch: &RecordBatch, name: &str) -> Result<Int32Array, LakeError> {
    let casted = cast(column(batch, name)?, &DataType::Int32)?;
    Ok(casted.as_primitive::<Int32Type>().clone())
}

fn str_column(batch: &RecordBatch, name: &str) -> Result<StringArray, LakeError> {
    let casted = cast(column(batch, name)?, &DataType::Utf8)?;
    Ok(casted.as_string::<i32>().clone())
}

fn ts_column(batch: &RecordBatch, name: &str) -> Result<TimestampMicrosecondArray, LakeError> {
    let casted = cast(
        column(batch, name)?,
        &DataType::Timestamp(TimeUnit::Microsecond, None),
    )?;
    Ok(casted.as_primitive::<TimestampMicrosecondType>().clone())
}

fn opt_f64(array: &Float64Array, row: usize) -> Option<f64> {
    (!array.is_null(row)).then(|| array.value(row))
}

fn opt_str(array: &StringArray, row: usize) -> Option<String> {
    (!array.is_null(row)).then(|| array.value(row).to_string())
}

fn opt_ts(array: &TimestampMicrosecondArray, row: usize) -> Option<DateTime<Utc>> {
    if array.is_null(row) {
        return None;
    }
    DateTime::from_timestamp_micros(array.value(row))
}

fn required<T>(value: Option<T>, column: &str, row: usize) -> Result<T, LakeError> {
    value.ok_or_else(|| LakeError::NullValue {
        column: column.to_string(),
        row,
    })
}

fn required_u32(array: &Int32Array, column: &str, row: usize) -> Result<u32, LakeError> {
    let value = required((!array.is_null(row)).then(|| array.value(row)), column, row)?;
    u32::try_from(value)
        .map_err(|_| LakeError::Arrow(format!("negative value {value} in column {column}")))
}

fn timestamps(values: impl Iterator<Item = Option<DateTime<Utc>>>) -> ArrayRef {
    let micros: Vec<Option<i64>> = values.map(|v| v.map(|d| d.timestamp_micros())).collect();
    Arc::new(TimestampMicrosecondArray::from(micros).with_timezone("UTC"))
}

fn strings<'a>(values: impl Iterator<Item = Option<&'a str>>) -> ArrayRef {
    Arc::new(StringArray::from(values.collect::<Vec<_>>()))
}

fn floats(values: impl Iterator<Item = Option<f64>>) -> ArrayRef {
    Arc::new(Float64Array::from(values.collect::<Vec<_>>()))
}

impl ParquetTable for DemandRecord {
    fn schema() -> SchemaRef {
        Arc::new(Schema::new(vec![
            Field::new("period", timestamp_type(), false),
            Field::new("respondent", DataType::Utf8, false),
            Field::new("respondent-name", DataType::Utf8, true),
            Field::new("type", DataType::Utf8, true),
            Field::new("type-name", DataType::Utf8, true),
            Field::new("value", DataType::Float64, true),
            Field::new("value-units", DataType::Utf8, true),
        ]))
    }

    fn to_columns(rows: &[Self]) -> Vec<ArrayRef> {
        vec![
            timestamps(rows.iter().map(|r| Some(r.period))),
            strings(rows.iter().map(|r| Some(r.respondent.as_str()))),
            strings(rows.iter().map(|r| r.respondent_name.as_deref())),
            strings(rows.iter().map(|r| r.series_type.as_deref())),
            strings(rows.iter().map(|r| r.type_name.as_deref())),
            floats(rows.iter().map(|r| r.value)),
            strings(rows.iter().map(|r| r.value_units.as_deref())),
        ]
    }

    fn from_batch(batch: &RecordBatch) -> Result<Vec<Self>, LakeError> {
        let period = ts_column(batch, "period")?;
        let respondent = str_column(batch, "respondent")?;
        let respondent_name = str_column(batch, "respondent-name")?;
        let series_type = str_column(batch, "type")?;
        let type_name = str_column(batch, "type-name")?;
        let value = f64_column(batch, "value")?;
        let value_units = str_column(batch, "value-units")?;

        (0..batch.num_rows())
            .map(|i| {
                Ok(DemandRecord {
                    period: required(opt_ts(&period, i), "period", i)?,
                    respondent: required(opt_str(&respondent, i), "respondent", i)?,
                    respondent_name: opt_str(&respondent_name, i),
                    series_type: opt_str(&series_type, i),
                    type_name: opt_str(&type_name, i),
                    value: opt_f64(&value, i),
                    value_units: opt_str(&value_units, i),
                })
            })
            .collect()
    }
}

impl ParquetTable for CuratedRecord {
    fn schema() -> SchemaRef {
        Arc::new(Schema::new(vec![
            Field::new("period", timestamp_type(), false),
            Field::new("respondent", DataType::Utf8, false),
            Field::new("respondent-name", DataType::Utf8, false),
            Field::new("type", DataType::Utf8, false),
            Field::new("type-name", DataType::Utf8, false),
            Field::new("value", DataType::Float64, false),
            Field::new("value-units", DataType::Utf8, false),
            Field::new("hour", DataType::Int32, false),
            Field::new("dayofweek", DataType::Int32, false),
            Field::new("lag_1h", DataType::Float64, false),
        ]))
    }

    fn to_columns(rows: &[Self]) -> Vec<ArrayRef> {
        vec![
            timestamps(rows.iter().map(|r| Some(r.period))),
            strings(rows.iter().map(|r| Some(r.respondent.as_str()))),
            strings(rows.iter().map(|r| Some(r.respondent_name.as_str()))),
            strings(rows.iter().map(|r| Some(r.series_type.as_str()))),
            strings(rows.iter().map(|r| Some(r.type_name.as_str()))),
            floats(rows.iter().map(|r| Some(r.value))),
            strings(rows.iter().map(|r| Some(r.value_units.as_str()))),
            Arc::new(Int32Array::from_iter_values(rows.iter().map(|r| r.hour as i32))),
            Arc::new(Int32Array::from_iter_values(rows.iter().map(|r| r.dayofweek as i32))),
            floats(rows.iter().map(|r| Some(r.lag_1h))),
        ]
    }

    fn from_batch(batch: &RecordBatch) -> Result<Vec<Self>, LakeError> {
        let period = ts_column(batch, "period")?;
        let respondent = str_column(batch, "respondent")?;
        let respondent_name = str_column(batch, "respondent-name")?;
        let series_type = str_column(batch, "type")?;
        let type_name = str_column(batch, "type-name")?;
        let value = f64_column(batch, "value")?;
        let value_units = str_column(batch, "value-units")?;
        let hour = i32_column(batch, "hour")?;
        let dayofweek = i32_column(batch, "dayofweek")?;
        let lag_1h = f64_column(batch, "lag_1h")?;

        (0..batch.num_rows())
            .map(|i| {
                Ok(CuratedRecord {
                    period: required(opt_ts(&period, i), "period", i)?,
                    respondent: required(opt_str(&respondent, i), "respondent", i)?,
                    respondent_name: required(opt_str(&respondent_name, i), "respondent-name", i)?,
                    series_type: required(opt_str(&series_type, i), "type", i)?,
                    type_name: required(opt_str(&type_name, i), "type-name", i)?,
                    value: required(opt_f64(&value, i), "value", i)?,
                    value_units: required(opt_str(&value_units, i), "value-units", i)?,
                    hour: required_u32(&hour, "hour", i)?,
                    dayofweek: required_u32(&dayofweek, "dayofweek", i)?,
                    lag_1h: required(opt_f64(&lag_1h, i), "lag_1h", i)?,
                })
            })
            .collect()
    }
}

impl ParquetTable for PredictionRecord {
    fn schema() -> SchemaRef {
        Arc::new(Schema::new(vec![
            Field::new("period", timestamp_type(), true),
            Field::new("forecast", DataType::Float64, true),
            Field::new("value", DataType::Float64, true),
        ]))
    }

    fn to_columns(rows: &[Self]) -> Vec<ArrayRef> {
        vec![
            timestamps(rows.iter().map(|r| r.period)),
            floats(rows.iter().map(|r| r.forecast)),
            floats(rows.iter().map(|r| r.value)),
        ]
    }

    /// `forecast` and `value` are required; `period` is carried when present
    /// and readable, and any extra columns are ignored.
    fn from_batch(batch: &RecordBatch) -> Result<Vec<Self>, LakeError> {
        let forecast = f64_column(batch, "forecast")?;
        let value = f64_column(batch, "value")?;
        let period = ts_column(batch, "period").ok();

        Ok((0..batch.num_rows())
            .map(|i| PredictionRecord {
                period: period.as_ref().and_then(|p| opt_ts(p, i)),
                forecast: opt_f64(&forecast, i),
                value: opt_f64(&value, i),
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn hour(h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 1, h, 0, 0).unwrap()
    }

    #[test]
    fn test_demand_nulls_survive_encoding() {
        let mut row = DemandRecord::new(hour(1), "NYIS", None);
        row.series_type = Some("D".to_string());
        let decoded: Vec<DemandRecord> = decode(encode(&[row.clone()]).unwrap()).unwrap();
        assert_eq!(decoded, vec![row]);
    }

    #[test]
    fn test_curated_columns() {
        let row = CuratedRecord {
            period: hour(5),
            respondent: "NYIS".into(),
            respondent_name: "New York Independent System Operator".into(),
            series_type: "D".into(),
            type_name: "Demand".into(),
            value: 16000.0,
            value_units: "megawatthours".into(),
            hour: 5,
            dayofweek: 5,
            lag_1h: 15500.0,
        };
        let bytes = encode(&[row.clone()]).unwrap();
        let reader = ParquetRecordBatchReaderBuilder::try_new(bytes.clone()).unwrap();
        let names: Vec<String> = reader
            .schema()
            .fields()
            .iter()
            .map(|f| f.name().clone())
            .collect();
        assert!(names.contains(&"lag_1h".to_string()));
        assert!(names.contains(&"dayofweek".to_string()));

        let decoded: Vec<CuratedRecord> = decode(bytes).unwrap();
        assert_eq!(decoded, vec![row]);
    }

    #[test]
    fn test_predictions_require_forecast_column() {
        // a snapshot that only has `value`
        let rows = vec![DemandRecord::new(hour(1), "NYIS", Some(1.0))];
        let err = decode::<PredictionRecord>(encode(&rows).unwrap()).unwrap_err();
        assert_eq!(err, LakeError::MissingColumn("forecast".to_string()));
    }

    #[test]
    fn test_predictions_without_period() {
        let schema = Arc::new(Schema::new(vec![
            Field::new("forecast", DataType::Float32, true),
            Field::new("value", DataType::Int64, true),
        ]));
        let batch = RecordBatch::try_new(
            schema,
            vec![
                Arc::new(arrow::array::Float32Array::from(vec![Some(1.5), None])),
                Arc::new(arrow::array::Int64Array::from(vec![Some(2), Some(3)])),
            ],
        )
        .unwrap();

        let rows = PredictionRecord::from_batch(&batch).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].forecast, Some(1.5));
        assert_eq!(rows[0].value, Some(2.0));
        assert_eq!(rows[1].forecast, None);
        assert!(rows.iter().all(|r| r.period.is_none()));
    }
}

use crate::error::Result;
use crate::structs::{Batch, Value};
use arrow_array::{ArrayRef, Date32Array, Float64Array, Int64Array, RecordBatch, StringArray};
use arrow_schema::{DataType, Field, Schema};
use chrono::Datelike;
use csv::Writer;
use log::debug;
use parquet::arrow::ArrowWriter;
use parquet::file::properties::WriterProperties;
use serde_json::Map;
use std::{fs, fs::File, path::Path, sync::Arc};

/// Days between 0001-01-01 (CE day 1) and the Unix epoch.
const UNIX_EPOCH_DAYS_FROM_CE: i32 = 719_163;

/// Writes a cleaned batch to a CSV file with a header row.
///
/// Nulls are written as empty cells and dates as `YYYY-MM-DD`, so the file
/// reads back with [`crate::extract::read_csv`] into the same records modulo
/// typing.
///
/// # Errors
/// Returns error if file cannot be created or written to.
pub fn write_csv(batch: &Batch, output_path: &Path) -> Result<()> {
    create_parent(output_path)?;
    let file = File::create(output_path)?;
    let mut writer = Writer::from_writer(file);

    writer.write_record(&batch.columns)?;
    for row in &batch.rows {
        writer.write_record(row.iter().map(Value::to_string))?;
    }

    writer.flush()?;
    debug!("Wrote {} rows to {}", batch.len(), output_path.display());
    Ok(())
}

/// Writes a cleaned batch as a pretty-printed JSON array of objects.
///
/// # Errors
/// Returns error if file cannot be created or serialization fails.
pub fn write_json(batch: &Batch, output_path: &Path) -> Result<()> {
    create_parent(output_path)?;
    let mut records = Vec::with_capacity(batch.len());
    for row in &batch.rows {
        let mut record = Map::new();
        for (column, value) in batch.columns.iter().zip(row) {
            record.insert(column.clone(), serde_json::to_value(value)?);
        }
        records.push(record);
    }

    let file = File::create(output_path)?;
    serde_json::to_writer_pretty(file, &records)?;
    Ok(())
}

/// Writes a cleaned batch to a Parquet file.
///
/// Column types are inferred from the non-null values: all integers become
/// `Int64`, any mix of integers and floats `Float64`, all dates `Date32`, and
/// everything else `Utf8`. Every column is nullable.
///
/// # Errors
/// Returns error if file cannot be created, schema is invalid, or Arrow operations fail.
pub fn write_parquet(batch: &Batch, output_path: &Path) -> Result<()> {
    create_parent(output_path)?;
    let mut fields = Vec::with_capacity(batch.columns.len());
    let mut arrays: Vec<ArrayRef> = Vec::with_capacity(batch.columns.len());

    for (idx, name) in batch.columns.iter().enumerate() {
        let values: Vec<&Value> = batch.rows.iter().map(|row| &row[idx]).collect();
        let (data_type, array) = column_array(&values);
        fields.push(Field::new(name, data_type, true));
        arrays.push(array);
    }

    let schema = Arc::new(Schema::new(fields));
    let record_batch = RecordBatch::try_new(schema.clone(), arrays)?;

    let file = File::create(output_path)?;
    let props = WriterProperties::builder().build();
    let mut writer = ArrowWriter::try_new(file, schema, Some(props))?;
    writer.write(&record_batch)?;
    writer.close()?;

    Ok(())
}

fn column_array(values: &[&Value]) -> (DataType, ArrayRef) {
    let non_null = || values.iter().filter(|v| !v.is_null());

    if non_null().all(|v| matches!(v, Value::Int(_))) && non_null().next().is_some() {
        let array: Int64Array = values
            .iter()
            .map(|v| match v {
                Value::Int(i) => Some(*i),
                _ => None,
            })
            .collect();
        return (DataType::Int64, Arc::new(array));
    }

    if non_null().all(|v| matches!(v, Value::Int(_) | Value::Float(_)))
        && non_null().next().is_some()
    {
        let array: Float64Array = values.iter().map(|v| v.as_f64()).collect();
        return (DataType::Float64, Arc::new(array));
    }

    if non_null().all(|v| matches!(v, Value::Date(_))) && non_null().next().is_some() {
        let array: Date32Array = values
            .iter()
            .map(|v| match v {
                Value::Date(d) => Some(d.num_days_from_ce() - UNIX_EPOCH_DAYS_FROM_CE),
                _ => None,
            })
            .collect();
        return (DataType::Date32, Arc::new(array));
    }

    let array: StringArray = values
        .iter()
        .map(|v| (!v.is_null()).then(|| v.to_string()))
        .collect();
    (DataType::Utf8, Arc::new(array))
}

fn create_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    Ok(())
}

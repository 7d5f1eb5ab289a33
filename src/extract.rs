use crate::error::{PipelineError, Result};
use crate::structs::{Batch, Entity, Value};
use csv::ReaderBuilder;
use log::debug;
use std::path::Path;

/// Cell contents read as missing values.
const NA_MARKERS: [&str; 5] = ["na", "n/a", "nan", "null", "none"];

/// Reads a headered CSV file into a batch of text values.
///
/// Empty cells and the usual missing-value markers (`NA`, `N/A`, `NaN`, `null`,
/// `None`) become [`Value::Null`]; everything else is kept as [`Value::Str`]
/// so that typing is left to the cleaning rules. Short rows are padded with
/// nulls and long rows truncated to the header width.
///
/// # Errors
///
/// Returns `PipelineError::MissingInputFile` if `path` does not exist, or a
/// CSV error if the file cannot be parsed.
pub fn read_csv(entity: Entity, path: &Path) -> Result<Batch> {
    if !path.exists() {
        return Err(PipelineError::MissingInputFile {
            entity: entity.to_string(),
            path: path.to_path_buf(),
        });
    }

    debug!("Reading {} records from {}", entity, path.display());
    let mut reader = ReaderBuilder::new().flexible(true).from_path(path)?;
    let columns: Vec<String> = reader
        .headers()?
        .iter()
        .map(|h| h.trim().to_string())
        .collect();
    let width = columns.len();

    let mut batch = Batch::new(columns);
    for record in reader.records() {
        let record = record?;
        let mut row: Vec<Value> = record.iter().take(width).map(parse_cell).collect();
        row.resize(width, Value::Null);
        batch.rows.push(row);
    }

    debug!(
        "Loaded {} rows x {} columns for {}",
        batch.len(),
        width,
        entity
    );
    Ok(batch)
}

fn parse_cell(raw: &str) -> Value {
    let trimmed = raw.trim();
    if trimmed.is_empty() || NA_MARKERS.contains(&trimmed.to_ascii_lowercase().as_str()) {
        Value::Null
    } else {
        Value::Str(raw.to_string())
    }
}

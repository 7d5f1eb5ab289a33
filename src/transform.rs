use crate::error::{PipelineError, Result};
use crate::rules::{Case, Rule};
use crate::structs::{Batch, ColumnPolicy, DATE_FORMAT, Entity, Value};
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use log::{debug, warn};
use serde::Serialize;
use std::collections::HashSet;

/// Accepted calendar date layouts, tried in order.
const DATE_FORMATS: [&str; 4] = [DATE_FORMAT, "%m/%d/%Y", "%Y/%m/%d", "%d.%m.%Y"];
/// Timestamp layouts whose date part is kept.
const DATETIME_FORMATS: [&str; 3] = ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%m/%d/%Y %H:%M"];

/// Null and duplicate counts of a batch at one point in time.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Consistency {
    /// Null cells per column, in column order.
    pub null_counts: Vec<(String, usize)>,
    /// Rows identical to an earlier row.
    pub duplicate_rows: usize,
}

impl Consistency {
    pub fn of(batch: &Batch) -> Self {
        let null_counts = batch
            .columns
            .iter()
            .enumerate()
            .map(|(idx, column)| {
                let nulls = batch.rows.iter().filter(|row| row[idx].is_null()).count();
                (column.clone(), nulls)
            })
            .collect();
        let unique: HashSet<&Vec<Value>> = batch.rows.iter().collect();
        Self {
            null_counts,
            duplicate_rows: batch.len() - unique.len(),
        }
    }

    pub fn total_nulls(&self) -> usize {
        self.null_counts.iter().map(|(_, n)| n).sum()
    }
}

/// Summary of one cleaning pass
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CleanReport {
    pub entity: String,
    pub rows_in: usize,
    pub rows_out: usize,
    pub before: Consistency,
    pub after: Consistency,
    /// Rows removed by each filtering rule, in application order.
    pub removed_by_rule: Vec<(String, usize)>,
    /// Non-null values turned into null by a coercion rule.
    pub coercion_failures: usize,
    /// Rules skipped because their column was absent.
    pub skipped_rules: Vec<String>,
}

impl CleanReport {
    pub fn rows_removed(&self) -> usize {
        self.rows_in - self.rows_out
    }
}

/// Cleans a raw record batch by applying an ordered list of rules.
///
/// Each rule sees only the output of the rules before it. Rules are never
/// reordered or retried. Values that fail numeric or date coercion become
/// null and are counted in the report rather than surfaced as errors.
///
/// # Arguments
///
/// * `entity` - Entity the batch belongs to, used for error context and logs
/// * `batch` - Raw records to clean
/// * `rules` - Rules to apply, in order
/// * `policy` - What to do when a rule names a column the batch does not have
///
/// # Returns
///
/// Returns the cleaned batch together with a [`CleanReport`].
///
/// # Errors
///
/// Returns `PipelineError::ColumnNotFound` if a rule references a missing
/// column and `policy` is [`ColumnPolicy::Fail`].
pub fn clean(
    entity: Entity,
    mut batch: Batch,
    rules: &[Rule],
    policy: ColumnPolicy,
) -> Result<(Batch, CleanReport)> {
    let mut report = CleanReport {
        entity: entity.to_string(),
        rows_in: batch.len(),
        before: Consistency::of(&batch),
        ..CleanReport::default()
    };

    for rule in rules {
        if let Some(missing) = rule
            .columns()
            .into_iter()
            .find(|c| batch.column_index(c).is_none())
        {
            match policy {
                ColumnPolicy::Fail => {
                    return Err(PipelineError::ColumnNotFound {
                        entity: entity.to_string(),
                        column: missing.to_string(),
                    });
                }
                ColumnPolicy::Skip => {
                    warn!(
                        "Skipping {} for {}: column {} not found",
                        rule.name(),
                        entity,
                        missing
                    );
                    report.skipped_rules.push(rule.name().to_string());
                    continue;
                }
            }
        }

        let before = batch.len();
        report.coercion_failures += apply_rule(&mut batch, rule);
        let removed = before - batch.len();
        if removed > 0 {
            debug!("{} removed {} rows from {}", rule.name(), removed, entity);
            report.removed_by_rule.push((rule.name().to_string(), removed));
        }
    }

    report.rows_out = batch.len();
    report.after = Consistency::of(&batch);
    debug!(
        "Cleaned {}: {} rows in, {} rows out, {} coercion failures",
        entity, report.rows_in, report.rows_out, report.coercion_failures
    );
    debug!(
        "{} nulls/duplicates: {}/{} before, {}/{} after",
        entity,
        report.before.total_nulls(),
        report.before.duplicate_rows,
        report.after.total_nulls(),
        report.after.duplicate_rows
    );
    Ok((batch, report))
}

/// Applies one rule in place, returning the number of failed coercions.
/// All referenced columns are known to exist.
fn apply_rule(batch: &mut Batch, rule: &Rule) -> usize {
    match rule {
        Rule::DropDuplicates => {
            let mut seen: HashSet<Vec<Value>> = HashSet::with_capacity(batch.len());
            batch.rows.retain(|row| seen.insert(row.clone()));
            0
        }
        Rule::DropNulls { columns } => {
            let indices: Vec<usize> = if columns.is_empty() {
                (0..batch.columns.len()).collect()
            } else {
                columns.iter().filter_map(|c| batch.column_index(c)).collect()
            };
            batch
                .rows
                .retain(|row| !indices.iter().any(|&i| row[i].is_null()));
            0
        }
        Rule::FillNull { column, value } => {
            map_column(batch, column, |v| {
                if v.is_null() {
                    *v = value.clone();
                }
                false
            })
        }
        Rule::ToNumeric { column } => map_column(batch, column, |v| {
            let coerced = v.to_numeric();
            let failed = !v.is_null() && coerced.is_null();
            *v = coerced;
            failed
        }),
        Rule::Range { column, low, high } => {
            if let Some(idx) = batch.column_index(column) {
                batch.rows.retain(|row| {
                    row[idx]
                        .as_f64()
                        .is_some_and(|x| (*low..=*high).contains(&x))
                });
            }
            0
        }
        Rule::NormalizeCase { column, case } => map_column(batch, column, |v| {
            if let Value::Str(s) = v {
                let trimmed = s.trim();
                *s = match case {
                    Case::Upper => trimmed.to_uppercase(),
                    Case::Lower => trimmed.to_lowercase(),
                };
            }
            false
        }),
        Rule::ParseDate { column } => map_column(batch, column, |v| {
            let parsed = match v {
                Value::Null => return false,
                Value::Date(d) => Some(*d),
                Value::Str(s) => parse_date(s),
                Value::Int(_) | Value::Float(_) => None,
            };
            match parsed {
                Some(date) => {
                    *v = Value::Date(date);
                    false
                }
                None => {
                    *v = Value::Null;
                    true
                }
            }
        }),
        Rule::DropColumns { columns } => {
            let keep: Vec<bool> = batch
                .columns
                .iter()
                .map(|c| !columns.contains(c))
                .collect();
            batch.columns = retain_mask(std::mem::take(&mut batch.columns), &keep);
            batch.rows = std::mem::take(&mut batch.rows)
                .into_iter()
                .map(|row| retain_mask(row, &keep))
                .collect();
            0
        }
        Rule::RenameColumns { mapping } => {
            for column in batch.columns.iter_mut() {
                if let Some(new_name) = mapping.get(column) {
                    *column = new_name.clone();
                }
            }
            0
        }
        Rule::ReorderColumns { columns } => {
            let order: Vec<usize> = columns
                .iter()
                .filter_map(|c| batch.column_index(c))
                .collect();
            batch.columns = order.iter().map(|&i| batch.columns[i].clone()).collect();
            for row in batch.rows.iter_mut() {
                *row = order.iter().map(|&i| row[i].clone()).collect();
            }
            0
        }
    }
}

/// Runs `f` over every value of `column`, counting how often it reports a failure.
fn map_column<F>(batch: &mut Batch, column: &str, mut f: F) -> usize
where
    F: FnMut(&mut Value) -> bool,
{
    let Some(idx) = batch.column_index(column) else {
        return 0;
    };
    batch
        .rows
        .iter_mut()
        .map(|row| f(&mut row[idx]))
        .filter(|&failed| failed)
        .count()
}

fn retain_mask<T>(items: Vec<T>, keep: &[bool]) -> Vec<T> {
    items
        .into_iter()
        .zip(keep)
        .filter_map(|(item, &k)| k.then_some(item))
        .collect()
}

/// Parses a calendar date from the common layouts found in raw exports.
///
/// Plain dates are tried first, then timestamps (whose time part is
/// discarded), then RFC 3339.
pub fn parse_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(raw, fmt).ok())
        .or_else(|| {
            DATETIME_FORMATS
                .iter()
                .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
                .map(|dt| dt.date())
        })
        .or_else(|| {
            DateTime::parse_from_rfc3339(raw)
                .ok()
                .map(|dt| dt.date_naive())
        })
}

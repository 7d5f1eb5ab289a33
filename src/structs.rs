use crate::rules::RuleBook;
use chrono::NaiveDate;
use log::{Log, Metadata, Record as LogRecord};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::path::PathBuf;

pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// Simple logger implementation
pub struct SimpleLogger;

impl Log for SimpleLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &LogRecord) {
        if self.enabled(record.metadata()) {
            eprintln!(
                "[{} {}] {}",
                chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
                record.level(),
                record.args()
            );
        }
    }

    fn flush(&self) {}
}

/// A single typed cell of a record batch.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    #[default]
    Null,
    Int(i64),
    Float(f64),
    Date(NaiveDate),
    Str(String),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Numeric view of the value. Text is parsed; dates and nulls have none.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) if f.is_finite() => Some(*f),
            Value::Str(s) => s.trim().parse::<f64>().ok().filter(|f| f.is_finite()),
            _ => None,
        }
    }

    /// Best-effort numeric coercion: integer first, then float, otherwise null.
    pub fn to_numeric(&self) -> Value {
        match self {
            Value::Int(i) => Value::Int(*i),
            Value::Float(f) if f.is_finite() => Value::Float(*f),
            Value::Str(s) => {
                let s = s.trim();
                if let Ok(i) = s.parse::<i64>() {
                    Value::Int(i)
                } else {
                    match s.parse::<f64>() {
                        Ok(f) if f.is_finite() => Value::Float(f),
                        _ => Value::Null,
                    }
                }
            }
            _ => Value::Null,
        }
    }

    /// Integer view used for warehouse keys; accepts integral floats like `7.0`.
    pub fn as_key(&self) -> Option<i64> {
        match self.to_numeric() {
            Value::Int(i) => Some(i),
            Value::Float(f) if f.fract() == 0.0 && f.abs() < i64::MAX as f64 => Some(f as i64),
            _ => None,
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a.to_bits() == b.to_bits(),
            (Value::Date(a), Value::Date(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for Value {}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            Value::Null => {}
            Value::Int(i) => i.hash(state),
            Value::Float(f) => f.to_bits().hash(state),
            Value::Date(d) => d.hash(state),
            Value::Str(s) => s.hash(state),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => Ok(()),
            Value::Int(i) => write!(f, "{}", i),
            Value::Float(x) => write!(f, "{}", x),
            Value::Date(d) => write!(f, "{}", d.format(DATE_FORMAT)),
            Value::Str(s) => f.write_str(s),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_string())
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Value::Int(i64::from(i))
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

/// Ordered batch of records sharing one column header.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Batch {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

impl Batch {
    pub fn new(columns: Vec<String>) -> Self {
        Self {
            columns,
            rows: Vec::new(),
        }
    }

    pub fn from_rows<S: Into<String>>(columns: Vec<S>, rows: Vec<Vec<Value>>) -> Self {
        Self {
            columns: columns.into_iter().map(Into::into).collect(),
            rows,
        }
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Cell at `row` for the named column.
    pub fn get(&self, row: usize, column: &str) -> Option<&Value> {
        let idx = self.column_index(column)?;
        self.rows.get(row).and_then(|r| r.get(idx))
    }
}

/// The three entities the warehouse knows about.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum Entity {
    Customer,
    Product,
    Sale,
}

impl Entity {
    /// Dependency order: dimensions before the fact table.
    pub const ALL: [Entity; 3] = [Entity::Customer, Entity::Product, Entity::Sale];

    pub fn name(&self) -> &'static str {
        match self {
            Entity::Customer => "customer",
            Entity::Product => "product",
            Entity::Sale => "sale",
        }
    }

    pub fn raw_file_name(&self) -> &'static str {
        match self {
            Entity::Customer => "customers_data.csv",
            Entity::Product => "products_data.csv",
            Entity::Sale => "sales_data.csv",
        }
    }

    pub fn cleaned_file_name(&self) -> &'static str {
        match self {
            Entity::Customer => "customers_data_cleaned.csv",
            Entity::Product => "products_data_cleaned.csv",
            Entity::Sale => "sales_data_cleaned.csv",
        }
    }

    pub fn table_name(&self) -> &'static str {
        self.name()
    }
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// What the cleaner does when a rule names a column the batch lacks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ColumnPolicy {
    #[default]
    Skip,
    Fail,
}

/// Which pipeline stages to run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum Stage {
    #[default]
    All,
    Clean,
    Load,
}

impl Stage {
    pub fn cleans(&self) -> bool {
        matches!(self, Stage::All | Stage::Clean)
    }

    pub fn loads(&self) -> bool {
        matches!(self, Stage::All | Stage::Load)
    }
}

/// Extra intermediate formats written next to the cleaned CSV.
#[derive(Debug, Clone, Copy, Default)]
pub struct OutputFormats {
    pub json: bool,
    pub parquet: bool,
}

/// Configuration for one pipeline run
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub raw_dir: PathBuf,
    pub processed_dir: PathBuf,
    pub warehouse_path: PathBuf,
    pub column_policy: ColumnPolicy,
    pub formats: OutputFormats,
    pub rules: RuleBook,
}

impl PipelineConfig {
    pub fn raw_path(&self, entity: Entity) -> PathBuf {
        self.raw_dir.join(entity.raw_file_name())
    }

    pub fn cleaned_path(&self, entity: Entity) -> PathBuf {
        self.processed_dir.join(entity.cleaned_file_name())
    }

    /// Same stem as the cleaned CSV with another extension.
    pub fn cleaned_path_with_extension(&self, entity: Entity, ext: &str) -> PathBuf {
        self.cleaned_path(entity).with_extension(ext)
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            raw_dir: PathBuf::from("data/raw"),
            processed_dir: PathBuf::from("data/processed"),
            warehouse_path: PathBuf::from("data_warehouse/datawarehouse.db"),
            column_policy: ColumnPolicy::default(),
            formats: OutputFormats::default(),
            rules: RuleBook::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_coercion_prefers_integers() {
        assert_eq!(Value::from(" 5 ").to_numeric(), Value::Int(5));
        assert_eq!(Value::from("2.5").to_numeric(), Value::Float(2.5));
        assert_eq!(Value::from("abc").to_numeric(), Value::Null);
        assert_eq!(Value::from("inf").to_numeric(), Value::Null);
        assert_eq!(Value::Null.to_numeric(), Value::Null);
    }

    #[test]
    fn key_accepts_integral_floats_only() {
        assert_eq!(Value::from("7").as_key(), Some(7));
        assert_eq!(Value::Float(7.0).as_key(), Some(7));
        assert_eq!(Value::Float(7.5).as_key(), None);
        assert_eq!(Value::from("x").as_key(), None);
    }

    #[test]
    fn int_and_text_are_distinct_values() {
        assert_ne!(Value::Int(5), Value::from("5"));
        assert_eq!(Value::Float(1.5), Value::Float(1.5));
    }

    #[test]
    fn display_renders_csv_cells() {
        assert_eq!(Value::Null.to_string(), "");
        assert_eq!(Value::Float(12.5).to_string(), "12.5");
        let date = NaiveDate::from_ymd_opt(2024, 3, 9).unwrap();
        assert_eq!(Value::Date(date).to_string(), "2024-03-09");
    }

    #[test]
    fn json_values_deserialize_to_the_narrowest_type() {
        let values: Vec<Value> =
            serde_json::from_str(r#"[null, 3, 2.5, "2024-01-02", "Unknown"]"#).unwrap();
        assert_eq!(
            values,
            vec![
                Value::Null,
                Value::Int(3),
                Value::Float(2.5),
                Value::Date(NaiveDate::from_ymd_opt(2024, 1, 2).unwrap()),
                Value::from("Unknown"),
            ]
        );
    }

    #[test]
    fn entity_paths_follow_file_conventions() {
        let config = PipelineConfig::default();
        assert_eq!(
            config.raw_path(Entity::Sale),
            PathBuf::from("data/raw/sales_data.csv")
        );
        assert_eq!(
            config.cleaned_path_with_extension(Entity::Product, "parquet"),
            PathBuf::from("data/processed/products_data_cleaned.parquet")
        );
    }
}

pub mod error;
pub mod extract;
pub mod load;
pub mod pipeline;
pub mod rules;
pub mod structs;
pub mod transform;
pub mod warehouse;

// Re-export public API
pub use error::{PipelineError, Result};
pub use extract::read_csv;
pub use load::{write_csv, write_json, write_parquet};
pub use pipeline::{RunSummary, clean_entity, load_entities, run};
pub use rules::{Case, Rule, RuleBook, default_rules};
pub use structs::{
    Batch, ColumnPolicy, Entity, OutputFormats, PipelineConfig, SimpleLogger, Stage, Value,
};
pub use transform::{CleanReport, Consistency, clean};
pub use warehouse::{LoadReport, Warehouse};

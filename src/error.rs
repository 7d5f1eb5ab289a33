use arrow_schema::ArrowError;
use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("Missing input file for {entity}: {}", path.display())]
    MissingInputFile { entity: String, path: PathBuf },
    #[error("Column not found in {entity} batch: {column}")]
    ColumnNotFound { entity: String, column: String },
    #[error("Cannot open warehouse at {}: {source}", path.display())]
    StoreConnection {
        path: PathBuf,
        #[source]
        source: rusqlite::Error,
    },
    #[error("I/O Error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Parquet Error: {0}")]
    Parquet(#[from] parquet::errors::ParquetError),
    #[error("Arrow Error: {0}")]
    Arrow(#[from] ArrowError),
    #[error("SQLite Error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Rulebook Error: {0}")]
    Rules(String),
    #[error("CSV Error: {0}")]
    Csv(#[from] csv::Error),
    #[error("JSON Error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, PipelineError>;

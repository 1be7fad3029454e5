use std::path::PathBuf;

use time::Date;

/// Fatal failures of an extraction run.
///
/// Recoverable derivation faults (division by zero, empty windows, null
/// inputs) never appear here; they become null feature values.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("schema error: missing required column '{0}'")]
    Schema(String),
    #[error("duplicate date {date} for symbol {symbol}")]
    DuplicateDate { symbol: String, date: Date },
    #[error("invalid date (expected YYYY-MM-DD): {0}")]
    InvalidDate(String),
    #[error("invalid value in column '{column}' at row {row}: {value}")]
    InvalidValue {
        column: String,
        row: usize,
        value: String,
    },
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("io error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[cfg(feature = "io")]
    #[error("arrow error: {0}")]
    Arrow(#[from] arrow::error::ArrowError),
    #[cfg(feature = "io")]
    #[error("parquet error: {0}")]
    Parquet(#[from] parquet::errors::ParquetError),
    #[cfg(feature = "io")]
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("derivation failed for symbol {symbol}: {reason}")]
    GroupFailed { symbol: String, reason: String },
    #[error("worker error: {0}")]
    Worker(String),
    #[error("run cancelled before output commit")]
    Cancelled,
}

impl Error {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::Io {
            path: path.into(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

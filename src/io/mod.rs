//! Dataset input and output.

pub mod batch;
pub mod csv_sink;
pub mod csv_source;
pub mod parquet_source;
pub mod partition;
pub mod sink;

use std::path::Path;

use crate::bar::Bar;
use crate::error::Result;

pub use csv_sink::write_csv;
pub use csv_source::read_csv_bars;
pub use parquet_source::read_parquet_bars;
pub use sink::{Manifest, PartitionedParquetWriter};

/// Input formats understood by [`read_bars`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputFormat {
    Csv,
    Parquet,
}

impl InputFormat {
    /// Parquet when `path` is a `.parquet` file or a directory holding any
    /// parquet files; CSV otherwise.
    pub fn detect(path: &Path) -> Self {
        if path.is_dir() {
            if contains_parquet(path) {
                InputFormat::Parquet
            } else {
                InputFormat::Csv
            }
        } else if path.extension().and_then(|e| e.to_str()) == Some("parquet") {
            InputFormat::Parquet
        } else {
            InputFormat::Csv
        }
    }
}

fn contains_parquet(dir: &Path) -> bool {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return false;
    };
    entries.flatten().any(|entry| {
        let path = entry.path();
        if path.is_dir() {
            contains_parquet(&path)
        } else {
            path.extension().and_then(|e| e.to_str()) == Some("parquet")
        }
    })
}

/// Reads bars from a CSV or Parquet file or directory.
pub fn read_bars(path: impl AsRef<Path>) -> Result<Vec<Bar>> {
    let path = path.as_ref();
    match InputFormat::detect(path) {
        InputFormat::Parquet => read_parquet_bars(path),
        InputFormat::Csv => read_csv_bars(path),
    }
}

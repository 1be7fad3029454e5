//! Daily bar Parquet input.
//!
//! Reads a single file or a directory tree of `*.parquet` files, such as the
//! `Symbol=<sym>/part-*.parquet` layout written by the ingestion step. Column
//! types are normalized with arrow's cast kernels so `Float32` prices, `Int32`
//! volumes and string or timestamp dates are all accepted.

use std::fs::File;
use std::path::{Path, PathBuf};

use arrow::array::{Array, ArrayRef, Date32Array, Float64Array, Int64Array, StringArray};
use arrow::compute::cast;
use arrow::datatypes::DataType;
use arrow::record_batch::RecordBatch;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;

use crate::bar::{from_epoch_days, parse_date, Bar};
use crate::error::{Error, Result};
use crate::io::partition;

const READ_BATCH_SIZE: usize = 8192;
const PRICE_COLUMNS: [&str; 5] = ["Open", "High", "Low", "Close", "Adj Close"];

/// Reads every bar under `path`.
pub fn read_parquet_bars(path: impl AsRef<Path>) -> Result<Vec<Bar>> {
    let path = path.as_ref();
    let mut files = Vec::new();
    collect_parquet_files(path, &mut files)?;
    files.sort();

    let mut bars = Vec::new();
    for file in &files {
        let symbol = symbol_from_partition_path(path, file);
        let mut part = read_parquet_file(file, symbol.as_deref())?;
        log::debug!("read {} bars from {}", part.len(), file.display());
        bars.append(&mut part);
    }
    log::info!(
        "read {} bars from {} parquet files under {}",
        bars.len(),
        files.len(),
        path.display()
    );
    Ok(bars)
}

/// Reads one file; `partition_symbol` fills in a missing `Symbol` column.
pub fn read_parquet_file(path: &Path, partition_symbol: Option<&str>) -> Result<Vec<Bar>> {
    let file = File::open(path).map_err(|e| Error::io(path, e))?;
    let reader = ParquetRecordBatchReaderBuilder::try_new(file)?
        .with_batch_size(READ_BATCH_SIZE)
        .build()?;

    let mut bars = Vec::new();
    let mut row_offset = 0;
    for batch in reader {
        let batch = batch?;
        append_batch(&batch, partition_symbol, row_offset, &mut bars)?;
        row_offset += batch.num_rows();
    }
    Ok(bars)
}

fn append_batch(
    batch: &RecordBatch,
    partition_symbol: Option<&str>,
    row_offset: usize,
    out: &mut Vec<Bar>,
) -> Result<()> {
    let symbols = optional_column(batch, "Symbol", &DataType::Utf8)?;
    let symbols = symbols.as_ref().map(|a| downcast::<StringArray>(a, "Symbol")).transpose()?;
    if symbols.is_none() && partition_symbol.is_none() {
        return Err(Error::Schema("Symbol".to_string()));
    }

    let dates = DateColumn::from_batch(batch)?;
    let prices = PRICE_COLUMNS
        .iter()
        .map(|name| required_column(batch, name, &DataType::Float64))
        .collect::<Result<Vec<_>>>()?;
    let prices = PRICE_COLUMNS
        .iter()
        .zip(&prices)
        .map(|(name, array)| downcast::<Float64Array>(array, name))
        .collect::<Result<Vec<_>>>()?;
    let volume = required_column(batch, "Volume", &DataType::Int64)?;
    let volume = downcast::<Int64Array>(&volume, "Volume")?;

    out.reserve(batch.num_rows());
    for i in 0..batch.num_rows() {
        let row = row_offset + i;
        let symbol = match symbols {
            Some(array) if array.is_valid(i) && !array.value(i).is_empty() => array.value(i),
            _ => partition_symbol.unwrap_or_default(),
        };
        if symbol.is_empty() {
            return Err(invalid("Symbol", row, ""));
        }
        let date = dates.value(i, row)?;

        let mut values = [None; 5];
        for (slot, (name, array)) in values.iter_mut().zip(PRICE_COLUMNS.iter().zip(&prices)) {
            if array.is_valid(i) {
                let v = array.value(i);
                if v.is_nan() {
                    continue;
                }
                if v < 0.0 || v.is_infinite() {
                    return Err(invalid(name, row, &v.to_string()));
                }
                *slot = Some(v);
            }
        }
        let [open, high, low, close, adj_close] = values;
        let vol = if volume.is_valid(i) {
            let v = volume.value(i);
            if v < 0 {
                return Err(invalid("Volume", row, &v.to_string()));
            }
            Some(v)
        } else {
            None
        };

        out.push(
            Bar::new(symbol, date)
                .with_prices(open, high, low, close, adj_close)
                .with_volume(vol),
        );
    }
    Ok(())
}

enum DateColumn {
    Days(Date32Array),
    Text(StringArray),
}

impl DateColumn {
    fn from_batch(batch: &RecordBatch) -> Result<Self> {
        let (idx, field) = batch
            .schema()
            .column_with_name("Date")
            .map(|(idx, field)| (idx, field.data_type().clone()))
            .ok_or_else(|| Error::Schema("Date".to_string()))?;
        let array = batch.column(idx);
        match field {
            DataType::Utf8 | DataType::LargeUtf8 | DataType::Utf8View => {
                let text = cast(array, &DataType::Utf8)?;
                Ok(Self::Text(downcast::<StringArray>(&text, "Date")?.clone()))
            }
            _ => {
                let days = cast(array, &DataType::Date32)?;
                Ok(Self::Days(downcast::<Date32Array>(&days, "Date")?.clone()))
            }
        }
    }

    fn value(&self, i: usize, row: usize) -> Result<time::Date> {
        match self {
            Self::Days(array) if array.is_valid(i) => from_epoch_days(array.value(i))
                .map_err(|_| invalid("Date", row, &array.value(i).to_string())),
            Self::Text(array) if array.is_valid(i) => {
                let raw = array.value(i);
                parse_date(raw.get(..10).unwrap_or(raw)).map_err(|_| invalid("Date", row, raw))
            }
            _ => Err(invalid("Date", row, "null")),
        }
    }
}

fn optional_column(batch: &RecordBatch, name: &str, to: &DataType) -> Result<Option<ArrayRef>> {
    match batch.schema().column_with_name(name) {
        Some((idx, _)) => Ok(Some(cast(batch.column(idx), to)?)),
        None => Ok(None),
    }
}

fn required_column(batch: &RecordBatch, name: &str, to: &DataType) -> Result<ArrayRef> {
    optional_column(batch, name, to)?.ok_or_else(|| Error::Schema(name.to_string()))
}

fn downcast<'a, T: 'static>(array: &'a ArrayRef, name: &str) -> Result<&'a T> {
    array.as_any().downcast_ref::<T>().ok_or_else(|| Error::InvalidValue {
        column: name.to_string(),
        row: 0,
        value: format!("unexpected type {}", array.data_type()),
    })
}

fn invalid(column: &str, row: usize, value: &str) -> Error {
    Error::InvalidValue {
        column: column.to_string(),
        row,
        value: value.to_string(),
    }
}

fn symbol_from_partition_path(root: &Path, file: &Path) -> Option<String> {
    file.ancestors()
        .skip(1)
        .take_while(|dir| dir.starts_with(root))
        .filter_map(|dir| dir.file_name()?.to_str())
        .find_map(partition::symbol_from_directory)
}

fn collect_parquet_files(path: &Path, out: &mut Vec<PathBuf>) -> Result<()> {
    if path.is_file() {
        out.push(path.to_path_buf());
        return Ok(());
    }
    let entries = std::fs::read_dir(path).map_err(|e| Error::io(path, e))?;
    for entry in entries {
        let entry = entry.map_err(|e| Error::io(path, e))?;
        let child = entry.path();
        let hidden = child
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.starts_with('.') || n.starts_with('_'));
        if hidden {
            continue;
        }
        if child.is_dir() {
            collect_parquet_files(&child, out)?;
        } else if child.extension().and_then(|e| e.to_str()) == Some("parquet") {
            out.push(child);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partition_directories_name_the_symbol() {
        let root = Path::new("/data/daily");
        let file = Path::new("/data/daily/Symbol=AAA/part-0.parquet");
        assert_eq!(symbol_from_partition_path(root, file).as_deref(), Some("AAA"));

        let outside = Path::new("/Symbol=ZZZ/daily/part-0.parquet");
        assert_eq!(symbol_from_partition_path(Path::new("/Symbol=ZZZ/daily"), outside), None);
    }

    #[test]
    fn missing_directory_is_an_io_error() {
        let mut files = Vec::new();
        let err = collect_parquet_files(Path::new("/nonexistent/stockfeat"), &mut files);
        assert!(matches!(err, Err(Error::Io { .. })));
    }
}

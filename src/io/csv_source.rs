//! Daily bar CSV input.
//!
//! Accepts a single file or a directory of `*.csv` / `*.csv.gz` files, one
//! symbol per file as produced by the usual per-ticker price dumps. When the
//! file has no `Symbol` column the symbol is taken from the file name.

use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use csv::{ReaderBuilder, StringRecord, Trim};
use flate2::read::GzDecoder;

use crate::bar::{parse_date, Bar};
use crate::error::{Error, Result};

const DATE: &str = "Date";
const OPEN: &str = "Open";
const HIGH: &str = "High";
const LOW: &str = "Low";
const CLOSE: &str = "Close";
const ADJ_CLOSE: &str = "Adj Close";
const VOLUME: &str = "Volume";
const SYMBOL: &str = "Symbol";

struct ColumnIndices {
    symbol: Option<usize>,
    date: usize,
    open: usize,
    high: usize,
    low: usize,
    close: usize,
    adj_close: usize,
    volume: usize,
}

impl ColumnIndices {
    fn from_headers(headers: &StringRecord) -> Result<Self> {
        let find = |name: &str| headers.iter().position(|h| h == name);
        let require = |name: &str| find(name).ok_or_else(|| Error::Schema(name.to_string()));
        Ok(Self {
            symbol: find(SYMBOL),
            date: require(DATE)?,
            open: require(OPEN)?,
            high: require(HIGH)?,
            low: require(LOW)?,
            close: require(CLOSE)?,
            adj_close: require(ADJ_CLOSE)?,
            volume: require(VOLUME)?,
        })
    }
}

/// Reads every bar under `path`.
pub fn read_csv_bars(path: impl AsRef<Path>) -> Result<Vec<Bar>> {
    let path = path.as_ref();
    let mut bars = Vec::new();
    for file in list_inputs(path)? {
        let mut part = read_csv_file(&file)?;
        log::debug!("read {} bars from {}", part.len(), file.display());
        bars.append(&mut part);
    }
    log::info!("read {} bars from {}", bars.len(), path.display());
    Ok(bars)
}

/// Reads one CSV or CSV.GZ file.
pub fn read_csv_file(path: &Path) -> Result<Vec<Bar>> {
    let reader = open_input(path)?;
    let fallback_symbol = symbol_from_file_name(path);
    read_csv_from(reader, fallback_symbol.as_deref())
        .map_err(|err| annotate(err, path))
}

/// Parses bars from any reader; `fallback_symbol` is used when the header
/// has no `Symbol` column.
pub fn read_csv_from<R: Read>(reader: R, fallback_symbol: Option<&str>) -> Result<Vec<Bar>> {
    let mut csv = ReaderBuilder::new()
        .trim(Trim::All)
        .flexible(true)
        .from_reader(reader);
    let headers = csv.headers()?.clone();
    let indices = ColumnIndices::from_headers(&headers)?;
    if indices.symbol.is_none() && fallback_symbol.is_none() {
        return Err(Error::Schema(SYMBOL.to_string()));
    }

    let mut bars = Vec::new();
    for (row, record) in csv.records().enumerate() {
        let record = record?;
        bars.push(parse_row(&record, &indices, row, fallback_symbol)?);
    }
    Ok(bars)
}

fn parse_row(
    record: &StringRecord,
    indices: &ColumnIndices,
    row: usize,
    fallback_symbol: Option<&str>,
) -> Result<Bar> {
    let symbol = match indices.symbol.map(|idx| field(record, idx)) {
        Some(value) if !value.is_empty() => value,
        _ => fallback_symbol.unwrap_or_default(),
    };
    if symbol.is_empty() {
        return Err(invalid(SYMBOL, row, symbol));
    }

    let raw_date = field(record, indices.date);
    // Timestamps like `2020-01-02 00:00:00` keep only their date part.
    let date = parse_date(raw_date.get(..10).unwrap_or(raw_date))
        .map_err(|_| invalid(DATE, row, raw_date))?;

    let price = |name: &str, idx: usize| parse_price(field(record, idx), name, row);
    Ok(Bar::new(symbol, date)
        .with_prices(
            price(OPEN, indices.open)?,
            price(HIGH, indices.high)?,
            price(LOW, indices.low)?,
            price(CLOSE, indices.close)?,
            price(ADJ_CLOSE, indices.adj_close)?,
        )
        .with_volume(parse_volume(field(record, indices.volume), row)?))
}

fn field(record: &StringRecord, idx: usize) -> &str {
    record.get(idx).unwrap_or("")
}

fn is_null(value: &str) -> bool {
    value.is_empty()
        || value.eq_ignore_ascii_case("nan")
        || value.eq_ignore_ascii_case("null")
        || value.eq_ignore_ascii_case("na")
}

fn parse_price(value: &str, column: &str, row: usize) -> Result<Option<f64>> {
    if is_null(value) {
        return Ok(None);
    }
    match value.parse::<f64>() {
        Ok(v) if v.is_finite() && v >= 0.0 => Ok(Some(v)),
        _ => Err(invalid(column, row, value)),
    }
}

fn parse_volume(value: &str, row: usize) -> Result<Option<i64>> {
    if is_null(value) {
        return Ok(None);
    }
    if let Ok(v) = value.parse::<i64>() {
        return if v >= 0 {
            Ok(Some(v))
        } else {
            Err(invalid(VOLUME, row, value))
        };
    }
    // Some dumps write volume as `1234.0`.
    match value.parse::<f64>() {
        Ok(v) if v >= 0.0 && v.fract() == 0.0 && v <= i64::MAX as f64 => Ok(Some(v as i64)),
        _ => Err(invalid(VOLUME, row, value)),
    }
}

fn invalid(column: &str, row: usize, value: &str) -> Error {
    Error::InvalidValue {
        column: column.to_string(),
        row,
        value: value.to_string(),
    }
}

fn annotate(err: Error, path: &Path) -> Error {
    match err {
        Error::Csv(source) => Error::io(
            path,
            std::io::Error::new(std::io::ErrorKind::InvalidData, source),
        ),
        other => other,
    }
}

fn open_input(path: &Path) -> Result<Box<dyn Read>> {
    let file = File::open(path).map_err(|e| Error::io(path, e))?;
    if path.extension().and_then(|ext| ext.to_str()) == Some("gz") {
        Ok(Box::new(GzDecoder::new(file)))
    } else {
        Ok(Box::new(file))
    }
}

/// `AAPL.csv` and `AAPL.csv.gz` both name symbol `AAPL`.
pub fn symbol_from_file_name(path: &Path) -> Option<String> {
    let name = path.file_name()?.to_str()?;
    let name = name.strip_suffix(".gz").unwrap_or(name);
    let stem = name.strip_suffix(".csv").unwrap_or(name);
    (!stem.is_empty()).then(|| stem.to_string())
}

fn is_csv_input(path: &Path) -> bool {
    path.file_name()
        .and_then(|name| name.to_str())
        .is_some_and(|name| name.ends_with(".csv") || name.ends_with(".csv.gz"))
}

fn list_inputs(path: &Path) -> Result<Vec<PathBuf>> {
    if !path.is_dir() {
        if !path.exists() {
            return Err(Error::io(
                path,
                std::io::Error::new(std::io::ErrorKind::NotFound, "input not found"),
            ));
        }
        return Ok(vec![path.to_path_buf()]);
    }
    let mut files = Vec::new();
    let entries = std::fs::read_dir(path).map_err(|e| Error::io(path, e))?;
    for entry in entries {
        let entry = entry.map_err(|e| Error::io(path, e))?;
        let file = entry.path();
        if file.is_file() && is_csv_input(&file) {
            files.push(file);
        }
    }
    files.sort();
    Ok(files)
}

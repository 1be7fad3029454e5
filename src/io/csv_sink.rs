//! Flat CSV export of a feature table, for inspection outside Parquet tools.

use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::bar::format_date;
use crate::error::{Error, Result};
use crate::feature::FeatureValue;
use crate::output::FeatureTable;

/// Writes `table` to `path` with a header row; nulls become empty cells.
///
/// The file is written under a temporary name and renamed on success.
pub fn write_csv(table: &FeatureTable, path: impl AsRef<Path>) -> Result<()> {
    let path = path.as_ref();
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|e| Error::io(parent, e))?;
    }
    let tmp = tmp_path(path);
    let result = write_to(table, &tmp).and_then(|()| {
        std::fs::rename(&tmp, path).map_err(|e| Error::io(path, e))
    });
    if result.is_err() {
        let _ = std::fs::remove_file(&tmp);
    }
    result?;
    log::info!("exported {} rows to {}", table.len(), path.display());
    Ok(())
}

fn write_to(table: &FeatureTable, path: &Path) -> Result<()> {
    let file = File::create(path).map_err(|e| Error::io(path, e))?;
    let mut writer = csv::WriterBuilder::new().has_headers(false).from_writer(file);
    writer.write_record(table.columns().iter().map(|c| c.name()))?;
    let mut record = Vec::with_capacity(table.columns().len());
    for row in table.rows() {
        record.clear();
        record.extend(table.columns().iter().map(|col| render(row.value(*col))));
        writer.write_record(&record)?;
    }
    let mut file = writer
        .into_inner()
        .map_err(|e| Error::io(path, e.error().kind().into()))?;
    file.flush().map_err(|e| Error::io(path, e))?;
    file.sync_all().map_err(|e| Error::io(path, e))?;
    Ok(())
}

fn render(value: FeatureValue<'_>) -> String {
    match value {
        FeatureValue::Null => String::new(),
        FeatureValue::Text(v) => v.to_string(),
        FeatureValue::Date(v) => format_date(v),
        FeatureValue::Float(v) => v.to_string(),
        FeatureValue::Int(v) => v.to_string(),
    }
}

fn tmp_path(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!(".{name}.tmp-{}", std::process::id()))
}

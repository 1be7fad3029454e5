//! Symbol-partitioned Parquet output.
//!
//! A run writes the whole dataset into a staging directory next to the
//! destination and renames it into place only after every partition and the
//! manifest are on disk. A failed or cancelled run removes the staging
//! directory, so readers see either the previous dataset or the complete new
//! one.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{Seek, Write};
use std::path::{Path, PathBuf};

use arrow::datatypes::SchemaRef;
use arrow::record_batch::RecordBatch;
use parquet::arrow::ArrowWriter;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::feature::FeatureColumn;
use crate::io::batch::{schema_for, RowBuffer};
use crate::io::partition;
use crate::output::FeatureTable;
use crate::pipeline::CancelHandle;

pub const MANIFEST_FILE: &str = "_manifest.json";
pub const PART_FILE: &str = "part-00000.parquet";
const DEFAULT_BATCH_SIZE: usize = 8192;

pub trait RowSink {
    fn write_batch(&mut self, batch: RecordBatch) -> Result<()>;

    fn finish(&mut self) -> Result<()> {
        Ok(())
    }
}

pub struct ParquetSink<W: Write + Seek + Send> {
    writer: Option<ArrowWriter<W>>,
}

impl<W: Write + Seek + Send> ParquetSink<W> {
    pub fn from_writer(writer: W, schema: SchemaRef) -> Result<Self> {
        let writer = ArrowWriter::try_new(writer, schema, None)?;
        Ok(Self {
            writer: Some(writer),
        })
    }
}

impl<W: Write + Seek + Send> RowSink for ParquetSink<W> {
    fn write_batch(&mut self, batch: RecordBatch) -> Result<()> {
        let Some(writer) = self.writer.as_mut() else {
            return Err(Error::Config("parquet sink is closed".to_string()));
        };
        writer.write(&batch)?;
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        if let Some(writer) = self.writer.take() {
            let _ = writer.close()?;
        }
        Ok(())
    }
}

/// Summary written next to the partitions as `_manifest.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    pub partition_key: String,
    pub columns: Vec<String>,
    pub symbols: BTreeMap<String, usize>,
    pub total_rows: usize,
    /// blake3 over every part file, in partition order.
    pub fingerprint: String,
    pub complete: bool,
}

impl Manifest {
    pub fn load(dataset: impl AsRef<Path>) -> Result<Self> {
        let path = dataset.as_ref().join(MANIFEST_FILE);
        let data = std::fs::read(&path).map_err(|e| Error::io(&path, e))?;
        Ok(serde_json::from_slice(&data)?)
    }
}

/// Writes a [`FeatureTable`] as `<root>/Symbol=<symbol>/part-00000.parquet`.
#[derive(Debug, Clone)]
pub struct PartitionedParquetWriter {
    root: PathBuf,
    batch_size: usize,
    cancel: Option<CancelHandle>,
}

impl PartitionedParquetWriter {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            batch_size: DEFAULT_BATCH_SIZE,
            cancel: None,
        }
    }

    /// Rows per Arrow record batch inside each part file.
    pub fn batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Abort before commit once `cancel` fires.
    pub fn cancel_with(mut self, cancel: CancelHandle) -> Self {
        self.cancel = Some(cancel);
        self
    }

    /// Replaces the dataset at `root` with `table`.
    pub fn write(&self, table: &FeatureTable) -> Result<Manifest> {
        let staging = StagingDir::create(&self.root)?;
        let manifest = self.write_partitions(table, staging.path())?;
        if let Some(cancel) = &self.cancel {
            cancel.check()?;
        }
        staging.commit(&self.root)?;
        log::info!(
            "wrote {} rows for {} symbols to {}",
            manifest.total_rows,
            manifest.symbols.len(),
            self.root.display()
        );
        Ok(manifest)
    }

    fn write_partitions(&self, table: &FeatureTable, dir: &Path) -> Result<Manifest> {
        let file_columns: Vec<FeatureColumn> = table
            .columns()
            .iter()
            .copied()
            .filter(|col| *col != FeatureColumn::Symbol)
            .collect();
        if file_columns.is_empty() {
            return Err(Error::Config(
                "projection has no columns besides the partition key".to_string(),
            ));
        }

        let mut hasher = blake3::Hasher::new();
        let mut symbols = BTreeMap::new();
        for (symbol, rows) in table.partitions() {
            if let Some(cancel) = &self.cancel {
                cancel.check()?;
            }
            let part_dir = dir.join(partition::directory_name(symbol));
            std::fs::create_dir_all(&part_dir).map_err(|e| Error::io(&part_dir, e))?;
            let part_path = part_dir.join(PART_FILE);

            let file = File::create(&part_path).map_err(|e| Error::io(&part_path, e))?;
            let mut sink = ParquetSink::from_writer(file, schema_for(&file_columns))?;
            let mut buffer = RowBuffer::new(&file_columns, self.batch_size)?;
            for row in rows {
                buffer.push_row(row)?;
                if buffer.should_flush() {
                    sink.write_batch(buffer.flush()?)?;
                }
            }
            if !buffer.is_empty() {
                sink.write_batch(buffer.flush()?)?;
            }
            sink.finish()?;

            let bytes = std::fs::read(&part_path).map_err(|e| Error::io(&part_path, e))?;
            hasher.update(symbol.as_bytes());
            hasher.update(&bytes);
            symbols.insert(symbol.to_string(), rows.len());
            log::debug!("partition {symbol}: {} rows", rows.len());
        }

        let manifest = Manifest {
            partition_key: FeatureColumn::Symbol.name().to_string(),
            columns: table.columns().iter().map(|c| c.name().to_string()).collect(),
            total_rows: symbols.values().sum(),
            symbols,
            fingerprint: hasher.finalize().to_hex().to_string(),
            complete: true,
        };
        let manifest_path = dir.join(MANIFEST_FILE);
        let json = serde_json::to_vec_pretty(&manifest)?;
        std::fs::write(&manifest_path, json).map_err(|e| Error::io(&manifest_path, e))?;
        Ok(manifest)
    }
}

/// Staging directory removed on drop unless committed.
struct StagingDir {
    path: PathBuf,
    committed: bool,
}

impl StagingDir {
    fn create(dest: &Path) -> Result<Self> {
        let path = sibling_path(dest, "staging")?;
        remove_dir_if_exists(&path)?;
        std::fs::create_dir_all(&path).map_err(|e| Error::io(&path, e))?;
        Ok(Self {
            path,
            committed: false,
        })
    }

    fn path(&self) -> &Path {
        &self.path
    }

    fn commit(mut self, dest: &Path) -> Result<()> {
        let backup = sibling_path(dest, "previous")?;
        remove_dir_if_exists(&backup)?;
        let had_previous = dest.exists();
        if had_previous {
            std::fs::rename(dest, &backup).map_err(|e| Error::io(dest, e))?;
        }
        if let Err(err) = std::fs::rename(&self.path, dest) {
            if had_previous {
                let _ = std::fs::rename(&backup, dest);
            }
            return Err(Error::io(dest, err));
        }
        self.committed = true;
        if had_previous {
            remove_dir_if_exists(&backup)?;
        }
        if let Some(parent) = dest.parent().filter(|p| !p.as_os_str().is_empty()) {
            fsync_dir(parent)?;
        }
        Ok(())
    }
}

impl Drop for StagingDir {
    fn drop(&mut self) {
        if !self.committed {
            if let Err(err) = std::fs::remove_dir_all(&self.path) {
                if err.kind() != std::io::ErrorKind::NotFound {
                    log::warn!("failed to clean staging dir {}: {err}", self.path.display());
                }
            }
        }
    }
}

fn sibling_path(dest: &Path, tag: &str) -> Result<PathBuf> {
    let name = dest
        .file_name()
        .ok_or_else(|| Error::Config(format!("missing directory name for {}", dest.display())))?
        .to_string_lossy();
    Ok(dest.with_file_name(format!(".{name}.{tag}-{}", std::process::id())))
}

fn remove_dir_if_exists(path: &Path) -> Result<()> {
    match std::fs::remove_dir_all(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(Error::io(path, err)),
    }
}

#[cfg(unix)]
fn fsync_dir(path: &Path) -> Result<()> {
    let dir = File::open(path).map_err(|e| Error::io(path, e))?;
    dir.sync_all().map_err(|e| Error::io(path, e))?;
    Ok(())
}

#[cfg(not(unix))]
fn fsync_dir(_path: &Path) -> Result<()> {
    Ok(())
}

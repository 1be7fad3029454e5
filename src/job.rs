//! Runs the feature step of an ETL job file.

use std::path::{Path, PathBuf};
use std::time::Instant;

use crate::config::{EtlStep, JobConfig};
use crate::error::{Error, Result};
use crate::io::{read_bars, write_csv, Manifest, PartitionedParquetWriter};
use crate::pipeline::{CancelHandle, FeaturePipeline};

/// Outcome of one `Stock_Data` entry.
#[derive(Debug, Clone)]
pub struct JobReport {
    pub stock_type: String,
    pub input: PathBuf,
    pub output: PathBuf,
    pub manifest: Manifest,
    pub csv_export: Option<PathBuf>,
}

/// Runs every `Stock_Data` entry of `job`, writing under `data_dir`.
///
/// `data_dir` must already exist. Each asset type reads the ingestion output
/// `<Model_Name>-<type>_IngestData` when present and the raw `Stock_Data`
/// path otherwise.
pub fn run_job(job: &JobConfig, data_dir: &Path) -> Result<Vec<JobReport>> {
    run_job_with_cancel(job, data_dir, &CancelHandle::default())
}

pub fn run_job_with_cancel(
    job: &JobConfig,
    data_dir: &Path,
    cancel: &CancelHandle,
) -> Result<Vec<JobReport>> {
    if !data_dir.is_dir() {
        return Err(Error::Config(format!(
            "output path {} does not exist",
            data_dir.display()
        )));
    }
    let config = job.pipeline_config()?;

    for step in [EtlStep::Step1, EtlStep::Step3] {
        if job.runs_step(step) {
            log::info!("{step:?} is handled by another stage; skipping");
        }
    }
    if !job.runs_step(EtlStep::Step2) {
        log::info!("job {} does not request feature extraction", job.model_name);
        return Ok(Vec::new());
    }

    let mut reports = Vec::with_capacity(job.stock_data.len());
    for (stock_type, raw_input) in &job.stock_data {
        cancel.check()?;
        let start = Instant::now();
        let ingested = job.ingest_path(data_dir, stock_type);
        let input = if ingested.exists() {
            ingested
        } else {
            raw_input.clone()
        };
        let output = job.staging_path(data_dir, stock_type);
        log::info!(
            "[{}] {stock_type}: {} -> {}",
            job.model_name,
            input.display(),
            output.display()
        );

        let pipeline = FeaturePipeline::with_cancel(config.clone(), cancel.clone())?;
        let bars = read_bars(&input)?;
        let table = pipeline.extract(bars)?;
        let manifest = PartitionedParquetWriter::new(&output)
            .cancel_with(cancel.clone())
            .write(&table)?;

        let csv_export = if job.export_csv {
            let path = csv_export_path(&output);
            write_csv(&table, &path)?;
            Some(path)
        } else {
            None
        };

        log::info!(
            "[{}] {stock_type}: {} rows in {:.2?}",
            job.model_name,
            manifest.total_rows,
            start.elapsed()
        );
        reports.push(JobReport {
            stock_type: stock_type.clone(),
            input,
            output,
            manifest,
            csv_export,
        });
    }
    Ok(reports)
}

fn csv_export_path(output: &Path) -> PathBuf {
    let mut name = output.as_os_str().to_os_string();
    name.push(".csv");
    PathBuf::from(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn csv_export_sits_next_to_dataset() {
        let path = csv_export_path(Path::new("/out/M-Stock_StageData"));
        assert_eq!(path, Path::new("/out/M-Stock_StageData.csv"));
    }
}

//! Pipeline and job configuration.
//!
//! Configuration is an immutable value handed to the pipeline constructor.
//! Nothing here is process-wide state.

use std::collections::BTreeMap;
use std::ffi::OsString;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::bar::DateRange;
use crate::derive::{MedianMethod, TRADING_DAYS_PER_YEAR};
use crate::error::{Error, Result};
use crate::feature::FeatureColumn;

pub const DEFAULT_WINDOW_DAYS: u32 = 30;

pub const STOCK_CONFIG_ENV: &str = "STOCK_CONFIG";
/// Mixed-case name still exported by older deployment scripts.
pub const STOCK_CONFIG_LEGACY_ENV: &str = "Stock_Config";
pub const DEFAULT_STOCK_CONFIG: &str = "stock_data/input/stock-config.json";
pub const DATA_PATH_ENV: &str = "ETL_DATA_PATH";
pub const DATA_PATH_LEGACY_ENV: &str = "ETL_Data_Path";
pub const DEFAULT_DATA_PATH: &str = "stock_data/output_data";

/// Where backward-fill is applied when labelling market trend.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "cli", derive(clap::ValueEnum))]
#[serde(rename_all = "snake_case")]
pub enum TrendFill {
    /// Label from raw sign flags, then carry the last label forward.
    #[default]
    MarketTrend,
    /// Carry both sign flags forward, then label.
    SignFlags,
    /// No filling.
    None,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Calendar span of the trailing range window.
    pub window_days: u32,
    pub trading_days_per_year: f64,
    pub median_method: MedianMethod,
    pub trend_fill: TrendFill,
    /// Truncate `vol_moving_avg` toward zero.
    pub integral_volume_average: bool,
    pub output_columns: Vec<FeatureColumn>,
    pub workers: usize,
    #[serde(skip)]
    pub date_range: DateRange,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            window_days: DEFAULT_WINDOW_DAYS,
            trading_days_per_year: TRADING_DAYS_PER_YEAR,
            median_method: MedianMethod::default(),
            trend_fill: TrendFill::default(),
            integral_volume_average: false,
            output_columns: FeatureColumn::ALL.to_vec(),
            workers: default_workers(),
            date_range: DateRange::unbounded(),
        }
    }
}

impl PipelineConfig {
    pub fn with_date_range(mut self, date_range: DateRange) -> Self {
        self.date_range = date_range;
        self
    }

    pub fn with_window_days(mut self, days: u32) -> Self {
        self.window_days = days;
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn with_trend_fill(mut self, trend_fill: TrendFill) -> Self {
        self.trend_fill = trend_fill;
        self
    }

    pub fn with_median_method(mut self, method: MedianMethod) -> Self {
        self.median_method = method;
        self
    }

    pub fn with_output_columns(mut self, columns: Vec<FeatureColumn>) -> Self {
        self.output_columns = columns;
        self
    }

    pub fn with_integral_volume_average(mut self, enabled: bool) -> Self {
        self.integral_volume_average = enabled;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            return Err(Error::Config("workers must be > 0".to_string()));
        }
        if !(self.trading_days_per_year.is_finite() && self.trading_days_per_year > 0.0) {
            return Err(Error::Config(format!(
                "trading_days_per_year must be positive, got {}",
                self.trading_days_per_year
            )));
        }
        if !self.output_columns.contains(&FeatureColumn::Symbol) {
            return Err(Error::Config(
                "output columns must include the Symbol partition key".to_string(),
            ));
        }
        for (idx, col) in self.output_columns.iter().enumerate() {
            if self.output_columns[..idx].contains(col) {
                return Err(Error::Config(format!("output column '{col}' listed twice")));
            }
        }
        Ok(())
    }
}

fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get().saturating_sub(1).max(1))
        .unwrap_or(1)
}

/// ETL stages named in a job file. Only feature extraction runs here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EtlStep {
    Step1,
    Step2,
    Step3,
}

fn default_steps() -> Vec<EtlStep> {
    vec![EtlStep::Step1, EtlStep::Step2, EtlStep::Step3]
}

/// Job file shared with the ingestion and training stages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobConfig {
    #[serde(rename = "Model_Name")]
    pub model_name: String,
    #[serde(rename = "Stock_Desc", default)]
    pub stock_desc: Option<PathBuf>,
    /// Asset type (e.g. `Stock`, `ETF`) to ingested dataset path.
    #[serde(rename = "Stock_Data")]
    pub stock_data: BTreeMap<String, PathBuf>,
    #[serde(rename = "Start_Date", default)]
    pub start_date: Option<String>,
    #[serde(rename = "End_Date", default)]
    pub end_date: Option<String>,
    #[serde(rename = "ETL_Steps", default = "default_steps")]
    pub etl_steps: Vec<EtlStep>,
    #[serde(rename = "Features", default)]
    pub features: Option<PipelineConfig>,
    /// Also write `<staging>.csv` next to the Parquet dataset.
    #[serde(rename = "Export_Csv", default)]
    pub export_csv: bool,
}

impl JobConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let data = std::fs::read(path).map_err(|e| Error::io(path, e))?;
        let config: JobConfig = serde_json::from_slice(&data)?;
        if config.model_name.trim().is_empty() {
            return Err(Error::Config("Model_Name must not be empty".to_string()));
        }
        Ok(config)
    }

    pub fn runs_step(&self, step: EtlStep) -> bool {
        self.etl_steps.contains(&step)
    }

    /// Pipeline settings with the job's date bounds applied.
    pub fn pipeline_config(&self) -> Result<PipelineConfig> {
        let date_range = DateRange::parse(self.start_date.as_deref(), self.end_date.as_deref())?;
        let config = self
            .features
            .clone()
            .unwrap_or_default()
            .with_date_range(date_range);
        config.validate()?;
        Ok(config)
    }

    /// Dataset written by the ingestion step for one asset type.
    pub fn ingest_path(&self, data_dir: &Path, stock_type: &str) -> PathBuf {
        data_dir.join(format!("{}-{}_IngestData", self.model_name, stock_type))
    }

    /// Staging dataset path for one asset type.
    pub fn staging_path(&self, data_dir: &Path, stock_type: &str) -> PathBuf {
        data_dir.join(format!("{}-{}_StageData", self.model_name, stock_type))
    }
}

/// Job file path: explicit argument, then `STOCK_CONFIG` (or `Stock_Config`),
/// then the default.
pub fn resolve_job_path(explicit: Option<PathBuf>) -> PathBuf {
    resolve_path(
        explicit,
        &[STOCK_CONFIG_ENV, STOCK_CONFIG_LEGACY_ENV],
        DEFAULT_STOCK_CONFIG,
        |name: &str| std::env::var_os(name),
    )
}

/// Output data root: explicit argument, then `ETL_DATA_PATH` (or
/// `ETL_Data_Path`), then the default.
pub fn resolve_data_dir(explicit: Option<PathBuf>) -> PathBuf {
    resolve_path(
        explicit,
        &[DATA_PATH_ENV, DATA_PATH_LEGACY_ENV],
        DEFAULT_DATA_PATH,
        |name: &str| std::env::var_os(name),
    )
}

fn resolve_path(
    explicit: Option<PathBuf>,
    vars: &[&str],
    default: &str,
    lookup: impl Fn(&str) -> Option<OsString>,
) -> PathBuf {
    explicit
        .or_else(|| {
            vars.iter()
                .filter_map(|var| lookup(var))
                .find(|value| !value.is_empty())
                .map(PathBuf::from)
        })
        .unwrap_or_else(|| PathBuf::from(default))
}

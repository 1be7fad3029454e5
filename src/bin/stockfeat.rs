use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use stockfeat::config::{resolve_data_dir, resolve_job_path};
use stockfeat::io::{read_bars, write_csv, PartitionedParquetWriter};
use stockfeat::job::run_job;
use stockfeat::{
    DateRange, FeatureColumn, FeaturePipeline, JobConfig, MedianMethod, PipelineConfig, TrendFill,
};

#[derive(Parser)]
#[command(name = "stockfeat")]
#[command(about = "Rolling feature extraction for daily stock bars")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Extract features from one dataset into a Symbol-partitioned Parquet dataset
    Extract {
        /// Input CSV file, CSV directory, or Parquet file/directory
        #[arg(long)]
        input: PathBuf,

        /// Output dataset directory (replaced on success)
        #[arg(long)]
        output: PathBuf,

        /// Keep rows on or after this date (YYYY-MM-DD)
        #[arg(long)]
        start_date: Option<String>,

        /// Keep rows on or before this date (YYYY-MM-DD)
        #[arg(long)]
        end_date: Option<String>,

        /// Trailing window length in calendar days
        #[arg(long, default_value_t = stockfeat::config::DEFAULT_WINDOW_DAYS)]
        window_days: u32,

        /// Worker threads (defaults to available cores minus one)
        #[arg(long)]
        workers: Option<usize>,

        /// Where backward-fill applies when labelling market trend
        #[arg(long, value_enum, default_value_t = TrendFill::MarketTrend)]
        trend_fill: TrendFill,

        /// Median of an even-sized window
        #[arg(long, value_enum, default_value_t = MedianMethod::Midpoint)]
        median: MedianMethod,

        /// Truncate vol_moving_avg to whole shares
        #[arg(long)]
        integral_volume_average: bool,

        /// Comma-separated output columns (Symbol is always required)
        #[arg(long, value_delimiter = ',')]
        columns: Vec<String>,

        /// Also export the table as CSV
        #[arg(long)]
        csv: Option<PathBuf>,
    },
    /// Run the feature step of an ETL job file
    Run {
        /// Job file (falls back to STOCK_CONFIG or Stock_Config, then stock_data/input/stock-config.json)
        #[arg(long)]
        config: Option<PathBuf>,

        /// Output data root (falls back to ETL_DATA_PATH or ETL_Data_Path, then stock_data/output_data)
        #[arg(long)]
        data_dir: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Extract {
            input,
            output,
            start_date,
            end_date,
            window_days,
            workers,
            trend_fill,
            median,
            integral_volume_average,
            columns,
            csv,
        } => {
            let date_range = DateRange::parse(start_date.as_deref(), end_date.as_deref())
                .context("parse date range")?;
            let mut config = PipelineConfig::default()
                .with_date_range(date_range)
                .with_window_days(window_days)
                .with_trend_fill(trend_fill)
                .with_median_method(median)
                .with_integral_volume_average(integral_volume_average);
            if let Some(workers) = workers {
                config = config.with_workers(workers);
            }
            if !columns.is_empty() {
                let columns = columns
                    .iter()
                    .map(|name| name.trim().parse::<FeatureColumn>())
                    .collect::<stockfeat::Result<Vec<_>>>()
                    .context("parse --columns")?;
                config = config.with_output_columns(columns);
            }

            let pipeline = FeaturePipeline::new(config)?;
            let bars = read_bars(&input)
                .with_context(|| format!("read input {}", input.display()))?;
            let table = pipeline.extract(bars)?;
            let manifest = PartitionedParquetWriter::new(&output)
                .write(&table)
                .with_context(|| format!("write output {}", output.display()))?;
            if let Some(csv) = csv {
                write_csv(&table, &csv)
                    .with_context(|| format!("export csv {}", csv.display()))?;
            }
            println!(
                "wrote {} rows for {} symbols to {} (fingerprint {})",
                manifest.total_rows,
                manifest.symbols.len(),
                output.display(),
                manifest.fingerprint
            );
        }
        Commands::Run { config, data_dir } => {
            let job_path = resolve_job_path(config);
            let data_dir = resolve_data_dir(data_dir);
            let job = JobConfig::load(&job_path)
                .with_context(|| format!("load job config {}", job_path.display()))?;
            let reports = run_job(&job, &data_dir)?;
            for report in reports {
                println!(
                    "{}: {} rows -> {}",
                    report.stock_type,
                    report.manifest.total_rows,
                    report.output.display()
                );
            }
        }
    }

    Ok(())
}

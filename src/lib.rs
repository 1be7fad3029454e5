//! Partition-aware rolling feature extraction for daily stock and ETF bars.
//!
//! Bars are grouped by symbol and ordered by date; every feature is derived
//! over trailing calendar-range or unbounded row windows that never cross a
//! symbol boundary. With the `io` feature the crate also reads CSV/Parquet
//! inputs and writes a `Symbol`-partitioned Parquet dataset.

pub mod bar;
pub mod config;
pub mod derive;
pub mod error;
pub mod feature;
pub mod output;
pub mod pipeline;
pub mod series;
pub mod window;

#[cfg(feature = "io")]
pub mod io;
#[cfg(feature = "io")]
pub mod job;

pub use bar::{Bar, DateRange};
pub use config::{JobConfig, PipelineConfig, TrendFill};
pub use derive::{MarketTrend, MedianMethod};
pub use error::{Error, Result};
pub use feature::{FeatureColumn, FeatureRow, Features};
pub use output::FeatureTable;
pub use pipeline::{CancelHandle, Extraction, FeaturePipeline, GroupFailure};
pub use series::SymbolSeries;
pub use window::{WindowFrame, WindowSpec};

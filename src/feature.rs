//! Output schema of the feature table.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use time::Date;

use crate::bar::Bar;
use crate::derive::MarketTrend;
use crate::error::{Error, Result};

/// Physical value kind of an output column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnKind {
    Utf8,
    Date,
    Float64,
    Int64,
    Int32,
}

/// Every column the extraction stage can emit, named as written to disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FeatureColumn {
    Symbol,
    Date,
    Open,
    High,
    Low,
    Close,
    #[serde(rename = "Adj Close")]
    AdjClose,
    Volume,
    #[serde(rename = "vol_moving_avg")]
    VolMovingAvg,
    #[serde(rename = "vol_moving_avg_log")]
    VolMovingAvgLog,
    #[serde(rename = "adj_close_rolling_med")]
    AdjCloseRollingMed,
    #[serde(rename = "adj_close_return")]
    AdjCloseReturn,
    #[serde(rename = "adj_close_daily_std")]
    AdjCloseDailyStd,
    #[serde(rename = "adj_close_annual_std")]
    AdjCloseAnnualStd,
    #[serde(rename = "adj_close_trend_flag")]
    AdjCloseTrendFlag,
    #[serde(rename = "high_vol_ratio")]
    HighVolRatio,
    #[serde(rename = "vol_trend_flag")]
    VolTrendFlag,
    #[serde(rename = "market_trend")]
    MarketTrend,
    #[serde(rename = "future_adj_close")]
    FutureAdjClose,
    #[serde(rename = "future_volume")]
    FutureVolume,
    #[serde(rename = "future_volume_log")]
    FutureVolumeLog,
}

impl FeatureColumn {
    pub const ALL: [FeatureColumn; 21] = [
        FeatureColumn::Symbol,
        FeatureColumn::Date,
        FeatureColumn::Open,
        FeatureColumn::High,
        FeatureColumn::Low,
        FeatureColumn::Close,
        FeatureColumn::AdjClose,
        FeatureColumn::Volume,
        FeatureColumn::VolMovingAvg,
        FeatureColumn::VolMovingAvgLog,
        FeatureColumn::AdjCloseRollingMed,
        FeatureColumn::AdjCloseReturn,
        FeatureColumn::AdjCloseDailyStd,
        FeatureColumn::AdjCloseAnnualStd,
        FeatureColumn::AdjCloseTrendFlag,
        FeatureColumn::HighVolRatio,
        FeatureColumn::VolTrendFlag,
        FeatureColumn::MarketTrend,
        FeatureColumn::FutureAdjClose,
        FeatureColumn::FutureVolume,
        FeatureColumn::FutureVolumeLog,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            FeatureColumn::Symbol => "Symbol",
            FeatureColumn::Date => "Date",
            FeatureColumn::Open => "Open",
            FeatureColumn::High => "High",
            FeatureColumn::Low => "Low",
            FeatureColumn::Close => "Close",
            FeatureColumn::AdjClose => "Adj Close",
            FeatureColumn::Volume => "Volume",
            FeatureColumn::VolMovingAvg => "vol_moving_avg",
            FeatureColumn::VolMovingAvgLog => "vol_moving_avg_log",
            FeatureColumn::AdjCloseRollingMed => "adj_close_rolling_med",
            FeatureColumn::AdjCloseReturn => "adj_close_return",
            FeatureColumn::AdjCloseDailyStd => "adj_close_daily_std",
            FeatureColumn::AdjCloseAnnualStd => "adj_close_annual_std",
            FeatureColumn::AdjCloseTrendFlag => "adj_close_trend_flag",
            FeatureColumn::HighVolRatio => "high_vol_ratio",
            FeatureColumn::VolTrendFlag => "vol_trend_flag",
            FeatureColumn::MarketTrend => "market_trend",
            FeatureColumn::FutureAdjClose => "future_adj_close",
            FeatureColumn::FutureVolume => "future_volume",
            FeatureColumn::FutureVolumeLog => "future_volume_log",
        }
    }

    pub fn kind(&self) -> ColumnKind {
        match self {
            FeatureColumn::Symbol | FeatureColumn::MarketTrend => ColumnKind::Utf8,
            FeatureColumn::Date => ColumnKind::Date,
            FeatureColumn::Volume | FeatureColumn::FutureVolume => ColumnKind::Int64,
            FeatureColumn::AdjCloseTrendFlag | FeatureColumn::VolTrendFlag => ColumnKind::Int32,
            _ => ColumnKind::Float64,
        }
    }

    /// Identity columns are never null in the output.
    pub fn nullable(&self) -> bool {
        !matches!(self, FeatureColumn::Symbol | FeatureColumn::Date)
    }
}

impl fmt::Display for FeatureColumn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for FeatureColumn {
    type Err = Error;

    fn from_str(name: &str) -> Result<Self> {
        FeatureColumn::ALL
            .iter()
            .copied()
            .find(|col| col.name() == name)
            .ok_or_else(|| Error::Config(format!("unknown output column '{name}'")))
    }
}

/// Derived values of one row.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Features {
    pub vol_moving_avg: Option<f64>,
    pub vol_moving_avg_log: Option<f64>,
    pub adj_close_rolling_med: Option<f64>,
    pub adj_close_return: Option<f64>,
    pub adj_close_daily_std: Option<f64>,
    pub adj_close_annual_std: Option<f64>,
    pub adj_close_trend_flag: Option<i8>,
    pub high_vol_ratio: Option<f64>,
    pub vol_trend_flag: Option<i8>,
    pub market_trend: Option<MarketTrend>,
    pub future_adj_close: Option<f64>,
    pub future_volume: Option<i64>,
    pub future_volume_log: Option<f64>,
}

/// One output record: the input bar plus its derived features.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureRow {
    pub bar: Bar,
    pub features: Features,
}

/// A single cell, borrowed from its row.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FeatureValue<'a> {
    Null,
    Text(&'a str),
    Date(Date),
    Float(f64),
    Int(i64),
}

impl<'a> FeatureValue<'a> {
    fn float(value: Option<f64>) -> Self {
        value.map_or(FeatureValue::Null, FeatureValue::Float)
    }

    fn int(value: Option<i64>) -> Self {
        value.map_or(FeatureValue::Null, FeatureValue::Int)
    }

    pub fn is_null(&self) -> bool {
        matches!(self, FeatureValue::Null)
    }
}

impl FeatureRow {
    pub fn symbol(&self) -> &str {
        &self.bar.symbol
    }

    pub fn date(&self) -> Date {
        self.bar.date
    }

    pub fn value(&self, column: FeatureColumn) -> FeatureValue<'_> {
        let bar = &self.bar;
        let f = &self.features;
        match column {
            FeatureColumn::Symbol => FeatureValue::Text(&bar.symbol),
            FeatureColumn::Date => FeatureValue::Date(bar.date),
            FeatureColumn::Open => FeatureValue::float(bar.open),
            FeatureColumn::High => FeatureValue::float(bar.high),
            FeatureColumn::Low => FeatureValue::float(bar.low),
            FeatureColumn::Close => FeatureValue::float(bar.close),
            FeatureColumn::AdjClose => FeatureValue::float(bar.adj_close),
            FeatureColumn::Volume => FeatureValue::int(bar.volume),
            FeatureColumn::VolMovingAvg => FeatureValue::float(f.vol_moving_avg),
            FeatureColumn::VolMovingAvgLog => FeatureValue::float(f.vol_moving_avg_log),
            FeatureColumn::AdjCloseRollingMed => FeatureValue::float(f.adj_close_rolling_med),
            FeatureColumn::AdjCloseReturn => FeatureValue::float(f.adj_close_return),
            FeatureColumn::AdjCloseDailyStd => FeatureValue::float(f.adj_close_daily_std),
            FeatureColumn::AdjCloseAnnualStd => FeatureValue::float(f.adj_close_annual_std),
            FeatureColumn::AdjCloseTrendFlag => {
                FeatureValue::int(f.adj_close_trend_flag.map(i64::from))
            }
            FeatureColumn::HighVolRatio => FeatureValue::float(f.high_vol_ratio),
            FeatureColumn::VolTrendFlag => FeatureValue::int(f.vol_trend_flag.map(i64::from)),
            FeatureColumn::MarketTrend => f
                .market_trend
                .map_or(FeatureValue::Null, |t| FeatureValue::Text(t.as_str())),
            FeatureColumn::FutureAdjClose => FeatureValue::float(f.future_adj_close),
            FeatureColumn::FutureVolume => FeatureValue::int(f.future_volume),
            FeatureColumn::FutureVolumeLog => FeatureValue::float(f.future_volume_log),
        }
    }
}

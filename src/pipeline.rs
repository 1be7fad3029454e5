//! Feature extraction orchestrator.
//!
//! Groups bars by symbol, derives every feature column of each group in
//! dependency order, then filters by date and projects the output columns.
//! Groups are independent, so they are spread over a pool of worker threads
//! keyed by symbol hash; results are reassembled in symbol order so the
//! output never depends on scheduling.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::{Duration, Instant};

use crate::bar::Bar;
use crate::config::{PipelineConfig, TrendFill};
use crate::derive::{
    annualize_with, backward_fill, lead, ln_positive, moving_average, period_return,
    price_volume_ratio, rolling_median, rolling_stddev_sample, sign, sign_of_change, trend_label,
};
use crate::error::{Error, Result};
use crate::feature::{FeatureRow, Features};
use crate::output::FeatureTable;
use crate::series::{group_by_symbol, SymbolSeries};
use crate::window::{WindowFrame, WindowSpec};

/// Shared flag that stops a run before its output is committed.
#[derive(Debug, Clone, Default)]
pub struct CancelHandle(Arc<AtomicBool>);

impl CancelHandle {
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            return Err(Error::Cancelled);
        }
        Ok(())
    }
}

/// One symbol group whose derivation failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupFailure {
    pub symbol: String,
    pub reason: String,
}

impl From<GroupFailure> for Error {
    fn from(failure: GroupFailure) -> Self {
        Error::GroupFailed {
            symbol: failure.symbol,
            reason: failure.reason,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ExtractionStats {
    pub symbols: usize,
    pub input_rows: usize,
    pub derived_rows: usize,
    pub output_rows: usize,
    pub workers: usize,
    pub duration: Duration,
}

/// Result of a run that tolerates failed groups.
///
/// `table` holds every group that derived cleanly; `failures` lists the rest.
#[derive(Debug, Clone)]
pub struct Extraction {
    pub table: FeatureTable,
    pub failures: Vec<GroupFailure>,
    pub stats: ExtractionStats,
}

impl Extraction {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }

    /// The table, or the first failed group as an error.
    pub fn into_complete(self) -> Result<FeatureTable> {
        match self.failures.into_iter().next() {
            Some(failure) => Err(failure.into()),
            None => Ok(self.table),
        }
    }
}

pub type GroupOutcome = std::result::Result<Vec<FeatureRow>, GroupFailure>;

pub struct FeaturePipeline {
    config: PipelineConfig,
    cancel: CancelHandle,
}

impl FeaturePipeline {
    pub fn new(config: PipelineConfig) -> Result<Self> {
        Self::with_cancel(config, CancelHandle::default())
    }

    /// Pipeline observing an existing cancel flag.
    pub fn with_cancel(config: PipelineConfig, cancel: CancelHandle) -> Result<Self> {
        config.validate()?;
        Ok(Self { config, cancel })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    /// Extracts features, failing the whole run if any group fails.
    pub fn extract(&self, bars: Vec<Bar>) -> Result<FeatureTable> {
        self.extract_partial(bars)?.into_complete()
    }

    /// Extracts features, reporting failed groups alongside the good ones.
    ///
    /// Schema-level problems (duplicate dates, empty symbols) and
    /// cancellation still abort the run.
    pub fn extract_partial(&self, bars: Vec<Bar>) -> Result<Extraction> {
        let start = Instant::now();
        let input_rows = bars.len();
        let groups = group_by_symbol(bars)?;
        let symbols = groups.len();
        let workers = self.config.workers.min(symbols).max(1);
        log::info!(
            "extracting features: symbols={} rows={} workers={}",
            symbols,
            input_rows,
            workers
        );

        let outcomes = if workers == 1 {
            self.derive_inline(&groups)?
        } else {
            self.derive_parallel(&groups, workers)?
        };
        self.cancel.check()?;

        let mut rows = Vec::with_capacity(input_rows);
        let mut failures = Vec::new();
        let mut derived_rows = 0usize;
        for outcome in outcomes {
            match outcome {
                Ok(group_rows) => {
                    derived_rows += group_rows.len();
                    let range = self.config.date_range;
                    rows.extend(group_rows.into_iter().filter(|row| range.contains(row.date())));
                }
                Err(failure) => {
                    log::warn!("group {} failed: {}", failure.symbol, failure.reason);
                    failures.push(failure);
                }
            }
        }

        let stats = ExtractionStats {
            symbols,
            input_rows,
            derived_rows,
            output_rows: rows.len(),
            workers,
            duration: start.elapsed(),
        };
        log::info!(
            "extracted {} rows ({} after date filter) for {} symbols in {:?}",
            stats.derived_rows,
            stats.output_rows,
            stats.symbols,
            stats.duration
        );

        Ok(Extraction {
            table: FeatureTable::new(self.config.output_columns.clone(), rows),
            failures,
            stats,
        })
    }

    fn derive_inline(&self, groups: &[SymbolSeries]) -> Result<Vec<GroupOutcome>> {
        groups
            .iter()
            .map(|series| {
                self.cancel.check()?;
                Ok(self.derive_guarded(series))
            })
            .collect()
    }

    fn derive_parallel(
        &self,
        groups: &[SymbolSeries],
        workers: usize,
    ) -> Result<Vec<GroupOutcome>> {
        let mut outcomes: Vec<Option<GroupOutcome>> = vec![None; groups.len()];

        thread::scope(|scope| -> Result<()> {
            let (result_tx, result_rx) = mpsc::channel::<(usize, GroupOutcome)>();
            let mut worker_txs = Vec::with_capacity(workers);
            let mut handles = Vec::with_capacity(workers);

            for worker_id in 0..workers {
                let (tx, rx) = mpsc::channel::<usize>();
                worker_txs.push(tx);
                let result_tx = result_tx.clone();
                let handle = thread::Builder::new()
                    .name(format!("feature-worker-{worker_id}"))
                    .spawn_scoped(scope, move || {
                        let mut processed = 0usize;
                        while let Ok(idx) = rx.recv() {
                            if self.cancel.is_cancelled() {
                                break;
                            }
                            let outcome = self.derive_guarded(&groups[idx]);
                            if result_tx.send((idx, outcome)).is_err() {
                                break;
                            }
                            processed += 1;
                        }
                        log::debug!("feature-worker-{worker_id} processed {processed} groups");
                    })
                    .map_err(|e| Error::Worker(format!("failed to spawn worker thread: {e}")))?;
                handles.push(handle);
            }
            drop(result_tx);

            for (idx, series) in groups.iter().enumerate() {
                let worker_id = hash_symbol_to_worker(series.symbol(), workers);
                if worker_txs[worker_id].send(idx).is_err() {
                    // A worker that stopped on cancellation is not a group failure.
                    self.cancel.check()?;
                    return Err(Error::GroupFailed {
                        symbol: series.symbol().to_string(),
                        reason: format!("worker {worker_id} exited early"),
                    });
                }
            }
            drop(worker_txs);

            for (idx, outcome) in result_rx {
                outcomes[idx] = Some(outcome);
            }
            for handle in handles {
                handle
                    .join()
                    .map_err(|_| Error::Worker("feature worker panicked".to_string()))?;
            }
            Ok(())
        })?;

        self.cancel.check()?;
        groups
            .iter()
            .zip(outcomes)
            .map(|(series, outcome)| {
                outcome.ok_or_else(|| Error::GroupFailed {
                    symbol: series.symbol().to_string(),
                    reason: "group was never processed".to_string(),
                })
            })
            .collect()
    }

    // A panic inside one group's derivation is contained to that group.
    fn derive_guarded(&self, series: &SymbolSeries) -> GroupOutcome {
        match panic::catch_unwind(AssertUnwindSafe(|| self.derive_series(series))) {
            Ok(outcome) => outcome,
            Err(payload) => Err(GroupFailure {
                symbol: series.symbol().to_string(),
                reason: panic_message(payload.as_ref()),
            }),
        }
    }

    /// Derives every feature column of one series, one row per input bar.
    pub fn derive_series(&self, series: &SymbolSeries) -> GroupOutcome {
        let config = &self.config;
        let trailing = WindowFrame::build(series, WindowSpec::trailing_days(config.window_days));
        let backward = WindowFrame::build(series, WindowSpec::TrailingAll);

        let volume = series.volume();
        let adj_close = series.adj_close();
        let high = series.high();

        let mut vol_moving_avg = moving_average(&volume, &trailing);
        if config.integral_volume_average {
            vol_moving_avg.iter_mut().flatten().for_each(|v| *v = v.trunc());
        }
        let vol_moving_avg_log = ln_positive(&vol_moving_avg);
        let adj_close_rolling_med = rolling_median(&adj_close, &trailing, config.median_method);
        let adj_close_return = period_return(&adj_close);
        let adj_close_daily_std = rolling_stddev_sample(&adj_close_return, &trailing);
        let adj_close_annual_std =
            annualize_with(&adj_close_daily_std, config.trading_days_per_year);
        let mut adj_close_trend_flag = sign(&adj_close_return);
        let high_vol_ratio = price_volume_ratio(&high, &volume);
        let mut vol_trend_flag = sign_of_change(&volume);
        if config.trend_fill == TrendFill::SignFlags {
            adj_close_trend_flag = backward_fill(&adj_close_trend_flag, &backward);
            vol_trend_flag = backward_fill(&vol_trend_flag, &backward);
        }
        let mut market_trend = trend_label(&adj_close_trend_flag, &vol_trend_flag);
        if config.trend_fill == TrendFill::MarketTrend {
            market_trend = backward_fill(&market_trend, &backward);
        }
        let future_adj_close = lead(&adj_close);
        let raw_volume: Vec<Option<i64>> = series.bars().iter().map(|bar| bar.volume).collect();
        let future_volume = lead(&raw_volume);
        let future_volume_f64: Vec<Option<f64>> =
            future_volume.iter().map(|v| v.map(|v| v as f64)).collect();
        let future_volume_log = ln_positive(&future_volume_f64);

        let len = series.len();
        let lengths = [
            vol_moving_avg.len(),
            adj_close_rolling_med.len(),
            adj_close_daily_std.len(),
            adj_close_annual_std.len(),
            adj_close_trend_flag.len(),
            high_vol_ratio.len(),
            vol_trend_flag.len(),
            market_trend.len(),
            future_adj_close.len(),
            future_volume_log.len(),
        ];
        if let Some(bad) = lengths.iter().find(|n| **n != len) {
            return Err(GroupFailure {
                symbol: series.symbol().to_string(),
                reason: format!("derived column has {bad} rows, series has {len}"),
            });
        }

        let rows = series
            .bars()
            .iter()
            .enumerate()
            .map(|(i, bar)| FeatureRow {
                bar: bar.clone(),
                features: Features {
                    vol_moving_avg: vol_moving_avg[i],
                    vol_moving_avg_log: vol_moving_avg_log[i],
                    adj_close_rolling_med: adj_close_rolling_med[i],
                    adj_close_return: adj_close_return[i],
                    adj_close_daily_std: adj_close_daily_std[i],
                    adj_close_annual_std: adj_close_annual_std[i],
                    adj_close_trend_flag: adj_close_trend_flag[i],
                    high_vol_ratio: high_vol_ratio[i],
                    vol_trend_flag: vol_trend_flag[i],
                    market_trend: market_trend[i],
                    future_adj_close: future_adj_close[i],
                    future_volume: future_volume[i],
                    future_volume_log: future_volume_log[i],
                },
            })
            .collect();
        Ok(rows)
    }
}

/// Consistent symbol-to-worker routing.
fn hash_symbol_to_worker(symbol: &str, worker_count: usize) -> usize {
    let mut hasher = DefaultHasher::new();
    symbol.hash(&mut hasher);
    (hasher.finish() as usize) % worker_count
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "derivation panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bar::{parse_date, DateRange};
    use crate::derive::MarketTrend;

    fn bar(symbol: &str, date: &str, adj_close: f64, volume: i64) -> Bar {
        Bar::new(symbol, parse_date(date).unwrap())
            .with_prices(
                Some(adj_close),
                Some(adj_close + 1.0),
                Some(adj_close - 1.0),
                Some(adj_close),
                Some(adj_close),
            )
            .with_volume(Some(volume))
    }

    fn pipeline(config: PipelineConfig) -> FeaturePipeline {
        FeaturePipeline::new(config.with_workers(1)).unwrap()
    }

    #[test]
    fn volume_scenario_matches_expected_flags_and_average() {
        let bars = vec![
            bar("AAA", "2020-01-01", 10.0, 100),
            bar("AAA", "2020-01-02", 11.0, 200),
            bar("AAA", "2020-01-03", 10.5, 150),
        ];
        let table = pipeline(PipelineConfig::default()).extract(bars).unwrap();
        let rows = table.rows_for("AAA");
        let flags: Vec<_> = rows.iter().map(|r| r.features.vol_trend_flag).collect();
        assert_eq!(flags, vec![None, Some(1), Some(-1)]);
        assert_eq!(rows[2].features.vol_moving_avg, Some(150.0));
        assert_eq!(rows[0].features.adj_close_return, None);
        assert_eq!(rows[0].features.adj_close_daily_std, None);
        assert_eq!(rows[1].features.adj_close_daily_std, None);
        assert!(rows[2].features.adj_close_daily_std.is_some());
        assert_eq!(rows[1].features.market_trend, Some(MarketTrend::Bullish));
        assert_eq!(rows[2].features.market_trend, Some(MarketTrend::WeakSelling));
        assert_eq!(rows[0].features.future_volume, Some(200));
        assert_eq!(rows[2].features.future_volume, None);
        assert_eq!(rows[2].features.future_adj_close, None);
    }

    #[test]
    fn trend_fill_variants_differ_on_flat_days() {
        // Day 3 has a flat price, so its raw label is null.
        let bars = vec![
            bar("AAA", "2020-01-01", 10.0, 100),
            bar("AAA", "2020-01-02", 11.0, 200),
            bar("AAA", "2020-01-03", 11.0, 100),
        ];
        let label = |fill| {
            pipeline(PipelineConfig::default().with_trend_fill(fill))
                .extract(bars.clone())
                .unwrap()
                .rows()[2]
                .features
                .market_trend
        };
        assert_eq!(label(TrendFill::None), None);
        assert_eq!(label(TrendFill::MarketTrend), Some(MarketTrend::Bullish));
        // Sign flags are only carried over nulls, the zero price flag stays.
        assert_eq!(label(TrendFill::SignFlags), None);
    }

    #[test]
    fn integral_average_truncates() {
        let bars = vec![
            bar("AAA", "2020-01-01", 10.0, 100),
            bar("AAA", "2020-01-02", 10.0, 101),
        ];
        let config = PipelineConfig::default().with_integral_volume_average(true);
        let table = pipeline(config).extract(bars).unwrap();
        assert_eq!(table.rows()[1].features.vol_moving_avg, Some(100.0));
    }

    #[test]
    fn date_filter_runs_after_derivation() {
        let bars = vec![
            bar("AAA", "2019-05-30", 10.0, 100),
            bar("AAA", "2019-05-31", 12.0, 300),
            bar("AAA", "2019-06-01", 12.0, 200),
        ];
        let range = DateRange::parse(Some("2019-06-01"), None).unwrap();
        let table = pipeline(PipelineConfig::default().with_date_range(range))
            .extract(bars)
            .unwrap();
        assert_eq!(table.len(), 1);
        let row = &table.rows()[0];
        assert_eq!(row.features.vol_moving_avg, Some(200.0));
        assert_eq!(row.features.vol_trend_flag, Some(-1));
        assert_eq!(row.features.adj_close_return, Some(0.0));
    }

    #[test]
    fn duplicate_dates_abort_the_run() {
        let bars = vec![
            bar("AAA", "2020-01-01", 10.0, 100),
            bar("AAA", "2020-01-01", 11.0, 200),
        ];
        let err = pipeline(PipelineConfig::default()).extract(bars).unwrap_err();
        assert!(matches!(err, Error::DuplicateDate { .. }));
    }

    #[test]
    fn cancelled_pipeline_produces_nothing() {
        let p = pipeline(PipelineConfig::default());
        p.cancel_handle().cancel();
        let err = p.extract(vec![bar("AAA", "2020-01-01", 10.0, 100)]).unwrap_err();
        assert!(matches!(err, Error::Cancelled));
    }

    #[test]
    fn cancelled_parallel_run_reports_cancellation() {
        let bars: Vec<Bar> = (0..64)
            .map(|i| bar(&format!("S{i:02}"), "2020-01-01", 10.0, 100))
            .collect();
        let p = FeaturePipeline::new(PipelineConfig::default().with_workers(4)).unwrap();
        p.cancel_handle().cancel();
        let err = p.extract_partial(bars).unwrap_err();
        assert!(matches!(err, Error::Cancelled), "got {err:?}");
    }

    #[test]
    fn clean_partial_run_reports_stats() {
        let bars = vec![
            bar("AAA", "2019-05-31", 10.0, 100),
            bar("AAA", "2019-06-01", 11.0, 200),
            bar("BBB", "2019-06-01", 20.0, 300),
        ];
        let range = DateRange::parse(Some("2019-06-01"), None).unwrap();
        let config = PipelineConfig::default().with_workers(2).with_date_range(range);
        let extraction = FeaturePipeline::new(config).unwrap().extract_partial(bars).unwrap();
        assert!(extraction.is_complete());
        assert_eq!(extraction.stats.symbols, 2);
        assert_eq!(extraction.stats.input_rows, 3);
        assert_eq!(extraction.stats.derived_rows, 3);
        assert_eq!(extraction.stats.output_rows, 2);
        let table = extraction.into_complete().unwrap();
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn worker_routing_is_stable() {
        for workers in 1..8 {
            let a = hash_symbol_to_worker("AAPL", workers);
            assert_eq!(a, hash_symbol_to_worker("AAPL", workers));
            assert!(a < workers);
        }
    }

    #[test]
    fn empty_input_gives_empty_table() {
        let table = pipeline(PipelineConfig::default()).extract(Vec::new()).unwrap();
        assert!(table.is_empty());
    }
}

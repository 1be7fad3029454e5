//! Feature derivation library.
//!
//! Every operator is a pure function of a value column (one entry per row of
//! a single symbol's series, in chronological order) and, where relevant, a
//! [`WindowFrame`] over that same series. Operators are total over nullable
//! input: faults that a columnar engine would raise are recovered locally and
//! surface as `None`.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::window::WindowFrame;

/// Trading days per year used to annualize daily volatility.
pub const TRADING_DAYS_PER_YEAR: f64 = 252.0;

pub type Column = Vec<Option<f64>>;

/// Locally recoverable derivation faults.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DeriveFault {
    DivisionByZero,
    EmptyWindow,
    NullPropagation,
    NonPositiveLog,
}

type Derived<T> = std::result::Result<T, DeriveFault>;

fn recover<T>(value: Derived<T>) -> Option<T> {
    match value {
        Ok(value) => Some(value),
        Err(fault) => {
            log::trace!("derivation fault recovered as null: {fault:?}");
            None
        }
    }
}

fn present(value: Option<f64>) -> Derived<f64> {
    value.ok_or(DeriveFault::NullPropagation)
}

fn divide(numerator: f64, denominator: f64) -> Derived<f64> {
    if denominator == 0.0 {
        return Err(DeriveFault::DivisionByZero);
    }
    Ok(numerator / denominator)
}

fn non_null(col: &[Option<f64>], frame: &WindowFrame, idx: usize) -> Vec<f64> {
    col[frame.window(idx)].iter().flatten().copied().collect()
}

/// How the 0.5 quantile is taken from an even-sized window.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "cli", derive(clap::ValueEnum))]
#[serde(rename_all = "snake_case")]
pub enum MedianMethod {
    /// Mean of the two middle values.
    #[default]
    Midpoint,
    /// Lower middle value; always an observed value.
    Lower,
}

/// Arithmetic mean of the non-null values in each window.
pub fn moving_average(col: &[Option<f64>], frame: &WindowFrame) -> Column {
    (0..frame.len())
        .map(|idx| {
            let values = non_null(col, frame, idx);
            recover(mean(&values))
        })
        .collect()
}

fn mean(values: &[f64]) -> Derived<f64> {
    if values.is_empty() {
        return Err(DeriveFault::EmptyWindow);
    }
    Ok(values.iter().sum::<f64>() / values.len() as f64)
}

/// Median of the non-null values in each window.
pub fn rolling_median(col: &[Option<f64>], frame: &WindowFrame, method: MedianMethod) -> Column {
    (0..frame.len())
        .map(|idx| {
            let mut values = non_null(col, frame, idx);
            recover(median(&mut values, method))
        })
        .collect()
}

fn median(values: &mut [f64], method: MedianMethod) -> Derived<f64> {
    if values.is_empty() {
        return Err(DeriveFault::EmptyWindow);
    }
    values.sort_by(f64::total_cmp);
    let mid = values.len() / 2;
    if values.len() % 2 == 1 {
        return Ok(values[mid]);
    }
    Ok(match method {
        MedianMethod::Midpoint => (values[mid - 1] + values[mid]) / 2.0,
        MedianMethod::Lower => values[mid - 1],
    })
}

/// `col[r] / col[r-1] - 1`; null at the first row.
pub fn period_return(col: &[Option<f64>]) -> Column {
    (0..col.len())
        .map(|idx| recover(return_at(col, idx)))
        .collect()
}

fn return_at(col: &[Option<f64>], idx: usize) -> Derived<f64> {
    let prev = idx.checked_sub(1).ok_or(DeriveFault::NullPropagation)?;
    let ratio = divide(present(col[idx])?, present(col[prev])?)?;
    Ok(ratio - 1.0)
}

/// Bessel-corrected standard deviation of the non-null values in each window.
pub fn rolling_stddev_sample(col: &[Option<f64>], frame: &WindowFrame) -> Column {
    (0..frame.len())
        .map(|idx| {
            let values = non_null(col, frame, idx);
            recover(stddev_sample(&values))
        })
        .collect()
}

fn stddev_sample(values: &[f64]) -> Derived<f64> {
    if values.len() < 2 {
        return Err(DeriveFault::EmptyWindow);
    }
    let avg = mean(values)?;
    let sum_sq: f64 = values.iter().map(|v| (v - avg).powi(2)).sum();
    Ok((sum_sq / (values.len() - 1) as f64).sqrt())
}

/// Scales daily volatility by `sqrt(252)`.
pub fn annualize(col: &[Option<f64>]) -> Column {
    annualize_with(col, TRADING_DAYS_PER_YEAR)
}

pub fn annualize_with(col: &[Option<f64>], periods_per_year: f64) -> Column {
    let factor = periods_per_year.sqrt();
    col.iter().map(|v| v.map(|v| v * factor)).collect()
}

pub fn sign_of(value: f64) -> i8 {
    (value > 0.0) as i8 - (value < 0.0) as i8
}

/// -1, 0 or +1 per row; null stays null.
pub fn sign(col: &[Option<f64>]) -> Vec<Option<i8>> {
    col.iter().map(|v| v.map(sign_of)).collect()
}

/// Sign of the day-over-day change `col[r] - col[r-1]`; null at the first row.
pub fn sign_of_change(col: &[Option<f64>]) -> Vec<Option<i8>> {
    (0..col.len())
        .map(|idx| recover(change_sign_at(col, idx)))
        .collect()
}

fn change_sign_at(col: &[Option<f64>], idx: usize) -> Derived<i8> {
    let prev = idx.checked_sub(1).ok_or(DeriveFault::NullPropagation)?;
    Ok(sign_of(present(col[idx])? - present(col[prev])?))
}

/// Joint price/volume direction label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum MarketTrend {
    Bullish,
    WeakBuying,
    Bearish,
    WeakSelling,
}

impl MarketTrend {
    pub fn as_str(&self) -> &'static str {
        match self {
            MarketTrend::Bullish => "Bullish",
            MarketTrend::WeakBuying => "Weak Buying",
            MarketTrend::Bearish => "Bearish",
            MarketTrend::WeakSelling => "Weak Selling",
        }
    }

    /// Label for a pair of signs; null or zero on either side gives `None`.
    pub fn classify(price_sign: Option<i8>, volume_sign: Option<i8>) -> Option<Self> {
        let price = price_sign.filter(|s| *s != 0)?;
        let volume = volume_sign.filter(|s| *s != 0)?;
        Some(match (price > 0, volume > 0) {
            (true, true) => MarketTrend::Bullish,
            (true, false) => MarketTrend::WeakBuying,
            (false, true) => MarketTrend::Bearish,
            (false, false) => MarketTrend::WeakSelling,
        })
    }
}

impl fmt::Display for MarketTrend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub fn trend_label(price_sign: &[Option<i8>], volume_sign: &[Option<i8>]) -> Vec<Option<MarketTrend>> {
    price_sign
        .iter()
        .zip(volume_sign)
        .map(|(&price, &volume)| MarketTrend::classify(price, volume))
        .collect()
}

/// `price / volume`; null when either side is null or volume is zero.
pub fn price_volume_ratio(price: &[Option<f64>], volume: &[Option<f64>]) -> Column {
    price
        .iter()
        .zip(volume)
        .map(|(&price, &volume)| recover(ratio_of(price, volume)))
        .collect()
}

fn ratio_of(numerator: Option<f64>, denominator: Option<f64>) -> Derived<f64> {
    divide(present(numerator)?, present(denominator)?)
}

/// Last non-null value inside each window, usually a trailing-all frame.
pub fn backward_fill<T: Clone>(col: &[Option<T>], frame: &WindowFrame) -> Vec<Option<T>> {
    let mut last_seen: Vec<Option<usize>> = Vec::with_capacity(col.len());
    let mut latest = None;
    for (idx, value) in col.iter().enumerate() {
        if value.is_some() {
            latest = Some(idx);
        }
        last_seen.push(latest);
    }

    frame
        .iter()
        .map(|window| {
            let end = window.end.checked_sub(1)?;
            let found = last_seen[end].filter(|found| *found >= window.start)?;
            col[found].clone()
        })
        .collect()
}

/// First non-null value inside each window, usually a leading-all frame.
pub fn forward_fill<T: Clone>(col: &[Option<T>], frame: &WindowFrame) -> Vec<Option<T>> {
    let mut next_seen: Vec<Option<usize>> = vec![None; col.len()];
    let mut earliest = None;
    for (idx, value) in col.iter().enumerate().rev() {
        if value.is_some() {
            earliest = Some(idx);
        }
        next_seen[idx] = earliest;
    }

    frame
        .iter()
        .map(|window| {
            if window.is_empty() {
                return None;
            }
            let found = next_seen[window.start].filter(|found| *found < window.end)?;
            col[found].clone()
        })
        .collect()
}

/// Value at the next row; null at the last row.
pub fn lead<T: Clone>(col: &[Option<T>]) -> Vec<Option<T>> {
    (0..col.len())
        .map(|idx| col.get(idx + 1).cloned().flatten())
        .collect()
}

/// Natural log of strictly positive values.
pub fn ln_positive(col: &[Option<f64>]) -> Column {
    col.iter()
        .map(|&value| {
            recover(present(value).and_then(|v| {
                if v <= 0.0 {
                    Err(DeriveFault::NonPositiveLog)
                } else {
                    Ok(v.ln())
                }
            }))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bar::{parse_date, Bar};
    use crate::series::SymbolSeries;
    use crate::window::WindowSpec;

    fn consecutive_series(len: usize) -> SymbolSeries {
        let start = parse_date("2020-01-01").unwrap();
        let bars = (0..len)
            .map(|i| Bar::new("AAA", start + time::Duration::days(i as i64)))
            .collect();
        SymbolSeries::new("AAA", bars).unwrap()
    }

    fn frame(len: usize, spec: WindowSpec) -> WindowFrame {
        WindowFrame::build(&consecutive_series(len), spec)
    }

    fn approx(a: Option<f64>, b: f64) -> bool {
        a.map_or(false, |a| (a - b).abs() < 1e-9)
    }

    #[test]
    fn single_row_average_is_the_value() {
        let avg = moving_average(&[Some(42.5)], &frame(1, WindowSpec::trailing_days(30)));
        assert_eq!(avg, vec![Some(42.5)]);
    }

    #[test]
    fn average_skips_nulls_and_empty_windows_are_null() {
        let col = [None, Some(2.0), None, Some(4.0)];
        let avg = moving_average(&col, &frame(4, WindowSpec::TrailingAll));
        assert_eq!(avg, vec![None, Some(2.0), Some(2.0), Some(3.0)]);
    }

    #[test]
    fn median_methods_agree_on_odd_windows() {
        let col = [Some(3.0), Some(1.0), Some(2.0)];
        let f = frame(3, WindowSpec::TrailingAll);
        assert_eq!(rolling_median(&col, &f, MedianMethod::Midpoint)[2], Some(2.0));
        assert_eq!(rolling_median(&col, &f, MedianMethod::Lower)[2], Some(2.0));
    }

    #[test]
    fn median_methods_differ_on_even_windows() {
        let col = [Some(4.0), Some(1.0)];
        let f = frame(2, WindowSpec::TrailingAll);
        assert_eq!(rolling_median(&col, &f, MedianMethod::Midpoint)[1], Some(2.5));
        assert_eq!(rolling_median(&col, &f, MedianMethod::Lower)[1], Some(1.0));
    }

    #[test]
    fn period_return_is_null_at_first_row_and_on_zero_divisor() {
        let ret = period_return(&[Some(10.0), Some(11.0), Some(0.0), Some(5.0), None, Some(1.0)]);
        assert_eq!(ret[0], None);
        assert!(approx(ret[1], 0.1));
        assert!(approx(ret[2], -1.0));
        assert_eq!(ret[3], None);
        assert_eq!(ret[4], None);
        assert_eq!(ret[5], None);
    }

    #[test]
    fn stddev_needs_two_values() {
        let f = frame(3, WindowSpec::TrailingAll);
        let std = rolling_stddev_sample(&[Some(1.0), None, Some(3.0)], &f);
        assert_eq!(std[0], None);
        assert_eq!(std[1], None);
        assert!(approx(std[2], 2f64.sqrt()));
    }

    #[test]
    fn annualize_scales_by_root_252_and_keeps_nulls() {
        let out = annualize(&[Some(1.0), None]);
        assert!(approx(out[0], 252f64.sqrt()));
        assert_eq!(out[1], None);
    }

    #[test]
    fn sign_table() {
        assert_eq!(
            sign(&[Some(5.0), Some(-3.0), Some(0.0), None]),
            vec![Some(1), Some(-1), Some(0), None]
        );
    }

    #[test]
    fn sign_of_change_follows_volume_direction() {
        let signs = sign_of_change(&[Some(100.0), Some(200.0), Some(150.0), Some(150.0)]);
        assert_eq!(signs, vec![None, Some(1), Some(-1), Some(0)]);
    }

    #[test]
    fn trend_rule_table_is_exact() {
        let cases = [
            (Some(1), Some(1), Some("Bullish")),
            (Some(1), Some(-1), Some("Weak Buying")),
            (Some(-1), Some(1), Some("Bearish")),
            (Some(-1), Some(-1), Some("Weak Selling")),
            (Some(0), Some(1), None),
            (Some(1), Some(0), None),
            (None, Some(1), None),
            (Some(-1), None, None),
        ];
        for (price, volume, expected) in cases {
            let got = MarketTrend::classify(price, volume).map(|t| t.as_str());
            assert_eq!(got, expected, "price={price:?} volume={volume:?}");
        }
    }

    #[test]
    fn ratio_by_zero_volume_is_null() {
        let out = price_volume_ratio(&[Some(10.0), Some(10.0), None], &[Some(0.0), Some(4.0), Some(1.0)]);
        assert_eq!(out, vec![None, Some(2.5), None]);
    }

    #[test]
    fn backward_fill_carries_last_seen_value() {
        let col = [None, Some(1), None, None, Some(-1), None];
        let out = backward_fill(&col, &frame(6, WindowSpec::TrailingAll));
        assert_eq!(out, vec![None, Some(1), Some(1), Some(1), Some(-1), Some(-1)]);
    }

    #[test]
    fn backward_fill_respects_bounded_windows() {
        let col = [Some(1.0), None, None];
        let out = backward_fill(&col, &frame(3, WindowSpec::trailing_days(1)));
        assert_eq!(out, vec![Some(1.0), Some(1.0), None]);
    }

    #[test]
    fn forward_fill_takes_next_seen_value() {
        let col = [None, Some(2.0), None];
        let out = forward_fill(&col, &frame(3, WindowSpec::LeadingAll));
        assert_eq!(out, vec![Some(2.0), Some(2.0), None]);
    }

    #[test]
    fn lead_shifts_up_and_ends_null() {
        assert_eq!(lead(&[Some(1), Some(2), None, Some(4)]), vec![Some(2), None, Some(4), None]);
        assert!(lead::<f64>(&[]).is_empty());
    }

    #[test]
    fn log_of_non_positive_is_null() {
        let out = ln_positive(&[Some(1.0), Some(0.0), Some(-2.0), None]);
        assert_eq!(out, vec![Some(0.0), None, None, None]);
    }
}

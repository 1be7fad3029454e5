//! Immutable per-symbol record store.
//!
//! Every window and every lag/lead operation is defined relative to the
//! strict chronological order established here.

use std::collections::BTreeMap;

use time::Date;

use crate::bar::Bar;
use crate::error::{Error, Result};

/// Ordered bars of one symbol, ascending by date with no ties.
#[derive(Debug, Clone, PartialEq)]
pub struct SymbolSeries {
    symbol: String,
    bars: Vec<Bar>,
}

impl SymbolSeries {
    /// Builds a series from bars of a single symbol in any order.
    pub fn new(symbol: impl Into<String>, mut bars: Vec<Bar>) -> Result<Self> {
        let symbol = symbol.into();
        if let Some(stray) = bars.iter().find(|bar| bar.symbol != symbol) {
            return Err(Error::GroupFailed {
                symbol,
                reason: format!("bar for symbol {} in wrong group", stray.symbol),
            });
        }
        bars.sort_by_key(|bar| bar.date);
        if let Some(pair) = bars.windows(2).find(|pair| pair[0].date == pair[1].date) {
            return Err(Error::DuplicateDate {
                symbol,
                date: pair[1].date,
            });
        }
        Ok(Self { symbol, bars })
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn bars(&self) -> &[Bar] {
        &self.bars
    }

    pub fn len(&self) -> usize {
        self.bars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bars.is_empty()
    }

    pub fn dates(&self) -> impl Iterator<Item = Date> + '_ {
        self.bars.iter().map(|bar| bar.date)
    }

    pub fn high(&self) -> Vec<Option<f64>> {
        self.bars.iter().map(|bar| bar.high).collect()
    }

    pub fn adj_close(&self) -> Vec<Option<f64>> {
        self.bars.iter().map(|bar| bar.adj_close).collect()
    }

    /// Volume widened to `f64` so it can flow through the derivation library.
    pub fn volume(&self) -> Vec<Option<f64>> {
        self.bars
            .iter()
            .map(|bar| bar.volume.map(|v| v as f64))
            .collect()
    }
}

/// Groups bars by symbol, ordering each group chronologically.
///
/// Groups come back sorted by symbol. A duplicated `(symbol, date)` pair
/// aborts the whole run because ordering can no longer be trusted.
pub fn group_by_symbol(bars: Vec<Bar>) -> Result<Vec<SymbolSeries>> {
    let mut groups: BTreeMap<String, Vec<Bar>> = BTreeMap::new();
    for (row, bar) in bars.into_iter().enumerate() {
        if bar.symbol.is_empty() {
            return Err(Error::InvalidValue {
                column: "Symbol".to_string(),
                row,
                value: String::new(),
            });
        }
        groups.entry(bar.symbol.clone()).or_default().push(bar);
    }

    groups
        .into_iter()
        .map(|(symbol, bars)| SymbolSeries::new(symbol, bars))
        .collect()
}

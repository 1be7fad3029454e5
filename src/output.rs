//! Projected, filtered feature table handed to sinks.

use crate::feature::{FeatureColumn, FeatureRow};

/// Feature rows ordered by `(symbol, date)` plus the projected column list.
///
/// Rows of one symbol are contiguous, so each symbol maps to a single slice.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureTable {
    columns: Vec<FeatureColumn>,
    rows: Vec<FeatureRow>,
}

impl FeatureTable {
    pub(crate) fn new(columns: Vec<FeatureColumn>, rows: Vec<FeatureRow>) -> Self {
        debug_assert!(rows
            .windows(2)
            .all(|w| (w[0].symbol(), w[0].date()) < (w[1].symbol(), w[1].date())));
        Self { columns, rows }
    }

    pub fn columns(&self) -> &[FeatureColumn] {
        &self.columns
    }

    pub fn rows(&self) -> &[FeatureRow] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Rows of one symbol, in date order.
    pub fn rows_for(&self, symbol: &str) -> &[FeatureRow] {
        let start = self.rows.partition_point(|row| row.symbol() < symbol);
        let end = self.rows.partition_point(|row| row.symbol() <= symbol);
        &self.rows[start..end]
    }

    /// `(symbol, rows)` partitions in symbol order.
    pub fn partitions(&self) -> Partitions<'_> {
        Partitions { rest: &self.rows }
    }

    pub fn symbols(&self) -> Vec<&str> {
        self.partitions().map(|(symbol, _)| symbol).collect()
    }
}

pub struct Partitions<'a> {
    rest: &'a [FeatureRow],
}

impl<'a> Iterator for Partitions<'a> {
    type Item = (&'a str, &'a [FeatureRow]);

    fn next(&mut self) -> Option<Self::Item> {
        let first = self.rest.first()?;
        let symbol = first.symbol();
        let len = self.rest.partition_point(|row| row.symbol() == symbol);
        let (head, tail) = self.rest.split_at(len);
        self.rest = tail;
        Some((symbol, head))
    }
}

//! Window definitions over a [`SymbolSeries`].
//!
//! A frame materializes, for each row of one series, the contiguous index
//! range visible to that row. Frames never cross symbol boundaries because
//! they are built from a single series.

use std::ops::Range;

use crate::series::SymbolSeries;

/// Declarative window shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WindowSpec {
    /// Rows dated within `[date(r) - days, date(r)]`, current row included.
    TrailingRange { days: u32 },
    /// Series start through the current row.
    TrailingAll,
    /// Current row through series end.
    LeadingAll,
}

impl WindowSpec {
    pub fn trailing_days(days: u32) -> Self {
        WindowSpec::TrailingRange { days }
    }
}

/// Per-row index ranges of one [`WindowSpec`] over one series.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowFrame {
    spec: WindowSpec,
    bounds: Vec<Range<usize>>,
}

impl WindowFrame {
    pub fn build(series: &SymbolSeries, spec: WindowSpec) -> Self {
        let len = series.len();
        let bounds = match spec {
            WindowSpec::TrailingRange { days } => trailing_range_bounds(series, days),
            WindowSpec::TrailingAll => (0..len).map(|idx| 0..idx + 1).collect(),
            WindowSpec::LeadingAll => (0..len).map(|idx| idx..len).collect(),
        };
        Self { spec, bounds }
    }

    pub fn spec(&self) -> WindowSpec {
        self.spec
    }

    pub fn len(&self) -> usize {
        self.bounds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bounds.is_empty()
    }

    /// Index range visible to row `idx`.
    pub fn window(&self, idx: usize) -> Range<usize> {
        self.bounds[idx].clone()
    }

    pub fn iter(&self) -> impl Iterator<Item = Range<usize>> + '_ {
        self.bounds.iter().cloned()
    }
}

// Dates are strictly increasing, so the window start only ever moves forward.
fn trailing_range_bounds(series: &SymbolSeries, days: u32) -> Vec<Range<usize>> {
    let day_numbers: Vec<i64> = series
        .dates()
        .map(|date| i64::from(date.to_julian_day()))
        .collect();
    let span = i64::from(days);
    let mut bounds = Vec::with_capacity(day_numbers.len());
    let mut start = 0usize;
    for (idx, &day) in day_numbers.iter().enumerate() {
        while day_numbers[start] < day - span {
            start += 1;
        }
        bounds.push(start..idx + 1);
    }
    bounds
}

//! Daily bar records and calendar helpers.

use time::{Date, Month};

use crate::error::{Error, Result};

/// Julian day number of 1970-01-01, used for Arrow `Date32` conversion.
const UNIX_EPOCH_JULIAN_DAY: i32 = 2_440_588;

/// One day's OHLCV observation for one symbol.
#[derive(Debug, Clone, PartialEq)]
pub struct Bar {
    pub symbol: String,
    pub date: Date,
    pub open: Option<f64>,
    pub high: Option<f64>,
    pub low: Option<f64>,
    pub close: Option<f64>,
    pub adj_close: Option<f64>,
    pub volume: Option<i64>,
}

impl Bar {
    /// Bar with identity fields only; prices and volume start out null.
    pub fn new(symbol: impl Into<String>, date: Date) -> Self {
        Self {
            symbol: symbol.into(),
            date,
            open: None,
            high: None,
            low: None,
            close: None,
            adj_close: None,
            volume: None,
        }
    }

    pub fn with_prices(
        mut self,
        open: Option<f64>,
        high: Option<f64>,
        low: Option<f64>,
        close: Option<f64>,
        adj_close: Option<f64>,
    ) -> Self {
        self.open = open;
        self.high = high;
        self.low = low;
        self.close = close;
        self.adj_close = adj_close;
        self
    }

    pub fn with_volume(mut self, volume: Option<i64>) -> Self {
        self.volume = volume;
        self
    }
}

/// Inclusive `[start, end]` date filter; either bound may be open.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DateRange {
    pub start: Option<Date>,
    pub end: Option<Date>,
}

impl DateRange {
    pub fn new(start: Option<Date>, end: Option<Date>) -> Result<Self> {
        if let (Some(start), Some(end)) = (start, end) {
            if start > end {
                return Err(Error::Config(format!(
                    "start date {} is after end date {}",
                    format_date(start),
                    format_date(end)
                )));
            }
        }
        Ok(Self { start, end })
    }

    /// Parses optional `YYYY-MM-DD` bounds.
    pub fn parse(start: Option<&str>, end: Option<&str>) -> Result<Self> {
        let start = start.map(parse_date).transpose()?;
        let end = end.map(parse_date).transpose()?;
        Self::new(start, end)
    }

    pub fn unbounded() -> Self {
        Self::default()
    }

    pub fn contains(&self, date: Date) -> bool {
        self.start.map_or(true, |start| date >= start) && self.end.map_or(true, |end| date <= end)
    }
}

/// Parses a strict `YYYY-MM-DD` calendar date.
pub fn parse_date(value: &str) -> Result<Date> {
    let invalid = || Error::InvalidDate(value.to_string());
    let bytes = value.as_bytes();
    if bytes.len() != 10 || bytes[4] != b'-' || bytes[7] != b'-' {
        return Err(invalid());
    }
    for (idx, byte) in bytes.iter().enumerate() {
        if idx == 4 || idx == 7 {
            continue;
        }
        if !byte.is_ascii_digit() {
            return Err(invalid());
        }
    }

    let year: i32 = value[0..4].parse().map_err(|_| invalid())?;
    let month: u8 = value[5..7].parse().map_err(|_| invalid())?;
    let day: u8 = value[8..10].parse().map_err(|_| invalid())?;
    let month = Month::try_from(month).map_err(|_| invalid())?;
    Date::from_calendar_date(year, month, day).map_err(|_| invalid())
}

pub fn format_date(date: Date) -> String {
    format!(
        "{:04}-{:02}-{:02}",
        date.year(),
        u8::from(date.month()),
        date.day()
    )
}

/// Days since 1970-01-01.
pub fn to_epoch_days(date: Date) -> i32 {
    date.to_julian_day() - UNIX_EPOCH_JULIAN_DAY
}

pub fn from_epoch_days(days: i32) -> Result<Date> {
    Date::from_julian_day(days + UNIX_EPOCH_JULIAN_DAY)
        .map_err(|_| Error::InvalidDate(format!("epoch day {days}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_iso_dates() {
        let date = parse_date("2019-06-01").unwrap();
        assert_eq!(date.year(), 2019);
        assert_eq!(date.month(), Month::June);
        assert_eq!(date.day(), 1);
        assert_eq!(format_date(date), "2019-06-01");
    }

    #[test]
    fn rejects_malformed_dates() {
        for bad in ["2019-6-01", "2019/06/01", "2019-02-30", "20190601", "abcd-ef-gh"] {
            assert!(matches!(parse_date(bad), Err(Error::InvalidDate(_))), "{bad}");
        }
    }

    #[test]
    fn epoch_days_round_trip_at_epoch() {
        let epoch = parse_date("1970-01-01").unwrap();
        assert_eq!(to_epoch_days(epoch), 0);
        assert_eq!(from_epoch_days(1).unwrap(), parse_date("1970-01-02").unwrap());
    }

    #[test]
    fn date_range_bounds_are_inclusive() {
        let range = DateRange::parse(Some("2019-06-01"), Some("2019-06-30")).unwrap();
        assert!(range.contains(parse_date("2019-06-01").unwrap()));
        assert!(range.contains(parse_date("2019-06-30").unwrap()));
        assert!(!range.contains(parse_date("2019-05-31").unwrap()));
        assert!(!range.contains(parse_date("2019-07-01").unwrap()));
    }

    #[test]
    fn open_bounds_accept_everything_on_that_side() {
        let range = DateRange::parse(Some("2019-06-01"), None).unwrap();
        assert!(range.contains(parse_date("2030-01-01").unwrap()));
        assert!(!range.contains(parse_date("2019-05-31").unwrap()));
        assert!(DateRange::unbounded().contains(parse_date("1900-01-01").unwrap()));
    }

    #[test]
    fn inverted_range_is_a_config_error() {
        let err = DateRange::parse(Some("2020-01-02"), Some("2020-01-01")).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }
}

//! Storage-level row and partition records.
//!
//! These types carry primitive values only; domain validation lives in
//! `tickvault-core`. The checks here are the last guard before a batch is
//! committed to a partition file.

use std::fmt::{Display, Formatter};
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use time::{Date, Month, OffsetDateTime};

/// Dataset stored by a partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Dataset {
    Bars1m,
    Bars5m,
    Bars1h,
    Bars1d,
    Options,
}

impl Dataset {
    pub const ALL: [Self; 5] = [
        Self::Bars1m,
        Self::Bars5m,
        Self::Bars1h,
        Self::Bars1d,
        Self::Options,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Bars1m => "bars_1m",
            Self::Bars5m => "bars_5m",
            Self::Bars1h => "bars_1h",
            Self::Bars1d => "bars_1d",
            Self::Options => "options",
        }
    }

    pub const fn is_bars(self) -> bool {
        !matches!(self, Self::Options)
    }

    /// Default partition window containing `date`.
    ///
    /// Daily and hourly bars are partitioned per calendar year, minute bars
    /// and option chains per calendar month.
    pub fn window_for(self, date: Date) -> DateRange {
        match self {
            Self::Bars1d | Self::Bars1h => {
                let year = date.year();
                DateRange {
                    start: date_or_min(Date::from_calendar_date(year, Month::January, 1)),
                    end: date_or_max(Date::from_calendar_date(year, Month::December, 31)),
                }
            }
            Self::Bars1m | Self::Bars5m | Self::Options => {
                let start = date_or_min(Date::from_calendar_date(date.year(), date.month(), 1));
                let end = date_or_max(Date::from_calendar_date(
                    date.year(),
                    date.month(),
                    date.month().length(date.year()),
                ));
                DateRange { start, end }
            }
        }
    }
}

fn date_or_min(result: Result<Date, time::error::ComponentRange>) -> Date {
    result.unwrap_or(Date::MIN)
}

fn date_or_max(result: Result<Date, time::error::ComponentRange>) -> Date {
    result.unwrap_or(Date::MAX)
}

impl Display for Dataset {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Dataset {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|dataset| dataset.as_str() == value)
            .ok_or_else(|| format!("unknown dataset '{value}'"))
    }
}

/// Inclusive calendar date range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DateRange {
    pub start: Date,
    pub end: Date,
}

impl DateRange {
    pub fn new(start: Date, end: Date) -> Option<Self> {
        (start <= end).then_some(Self { start, end })
    }

    pub fn single(date: Date) -> Self {
        Self {
            start: date,
            end: date,
        }
    }

    pub fn contains(&self, date: Date) -> bool {
        self.start <= date && date <= self.end
    }

    pub fn intersects(&self, other: &DateRange) -> bool {
        self.start <= other.end && other.start <= self.end
    }

    pub fn intersection(&self, other: &DateRange) -> Option<DateRange> {
        DateRange::new(self.start.max(other.start), self.end.min(other.end))
    }

    /// Unix-second bounds covering every minute of the range.
    pub fn unix_bounds(&self) -> (i64, i64) {
        let start = self.start.midnight().assume_utc().unix_timestamp();
        let end = self
            .end
            .next_day()
            .map(|next| next.midnight().assume_utc().unix_timestamp() - 1)
            .unwrap_or(i64::MAX);
        (start, end)
    }
}

/// Canonical `YYYY-MM-DD` rendering used for catalog columns and file names.
pub fn format_date(date: Date) -> String {
    format!(
        "{:04}-{:02}-{:02}",
        date.year(),
        u8::from(date.month()),
        date.day()
    )
}

/// Parse a `YYYY-MM-DD` date.
pub fn parse_date(value: &str) -> Option<Date> {
    let mut parts = value.trim().splitn(3, '-');
    let year = parts.next()?.parse::<i32>().ok()?;
    let month = parts.next()?.parse::<u8>().ok()?;
    let day_part = parts.next()?;
    if day_part.len() != 2 {
        return None;
    }
    let day = day_part.parse::<u8>().ok()?;
    let month = Month::try_from(month).ok()?;
    Date::from_calendar_date(year, month, day).ok()
}

/// UTC calendar date of a unix timestamp in seconds.
pub fn date_of_unix(ts: i64) -> Option<Date> {
    OffsetDateTime::from_unix_timestamp(ts)
        .ok()
        .map(OffsetDateTime::date)
}

/// Option right stored with each contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OptionRight {
    Call,
    Put,
}

impl OptionRight {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Call => "CALL",
            Self::Put => "PUT",
        }
    }
}

impl Display for OptionRight {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OptionRight {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_uppercase().as_str() {
            "CALL" | "C" => Ok(Self::Call),
            "PUT" | "P" => Ok(Self::Put),
            other => Err(format!("unknown option right '{other}'")),
        }
    }
}

/// One OHLCV row. `ts` is unix seconds, UTC, minute aligned.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BarRecord {
    pub ts: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: u64,
}

/// One option contract row keyed by `(expiry, strike, right)`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OptionRecord {
    pub expiry: Date,
    pub strike: f64,
    pub right: OptionRight,
    pub bid: f64,
    pub ask: f64,
    pub mid: Option<f64>,
    pub delta: Option<f64>,
    pub gamma: Option<f64>,
    pub theta: Option<f64>,
    pub vega: Option<f64>,
    pub iv: Option<f64>,
}

impl OptionRecord {
    /// Ordering key used for sorting and deduplication.
    pub fn key(&self) -> (Date, u64, OptionRight) {
        (self.expiry, strike_key(self.strike), self.right)
    }
}

/// Total-order key for a positive finite strike.
pub fn strike_key(strike: f64) -> u64 {
    strike.to_bits()
}

/// Reason a row was refused by the storage guard.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RowViolation {
    #[error("field '{field}' must be a positive finite number")]
    NonPositive { field: &'static str },
    #[error("field '{field}' must be a non-negative finite number")]
    Negative { field: &'static str },
    #[error("field '{field}' must be finite")]
    NonFinite { field: &'static str },
    #[error("ohlc ordering violated: low <= min(open, close) <= max(open, close) <= high")]
    OhlcOrdering,
    #[error("timestamp {ts} is not minute aligned")]
    NotMinuteAligned { ts: i64 },
    #[error("bid {bid} is above ask {ask}")]
    BidAboveAsk { bid: f64, ask: f64 },
    #[error("delta {value} outside [-1, 1]")]
    DeltaOutOfRange { value: f64 },
    #[error("rows must be strictly ascending by key without duplicates")]
    NotStrictlyAscending,
    #[error("row date {date} is outside partition range {start}..={end}")]
    OutsidePartition {
        date: String,
        start: String,
        end: String,
    },
}

pub fn check_bar(row: &BarRecord) -> Result<(), RowViolation> {
    positive("open", row.open)?;
    positive("high", row.high)?;
    positive("low", row.low)?;
    positive("close", row.close)?;
    if row.ts % 60 != 0 {
        return Err(RowViolation::NotMinuteAligned { ts: row.ts });
    }
    let body_low = row.open.min(row.close);
    let body_high = row.open.max(row.close);
    if row.low > body_low || body_high > row.high {
        return Err(RowViolation::OhlcOrdering);
    }
    Ok(())
}

pub fn check_option(row: &OptionRecord) -> Result<(), RowViolation> {
    positive("strike", row.strike)?;
    non_negative("bid", row.bid)?;
    non_negative("ask", row.ask)?;
    if row.bid > 0.0 && row.ask > 0.0 && row.bid > row.ask {
        return Err(RowViolation::BidAboveAsk {
            bid: row.bid,
            ask: row.ask,
        });
    }
    if let Some(mid) = row.mid {
        non_negative("mid", mid)?;
    }
    if let Some(delta) = row.delta {
        finite("delta", delta)?;
        if !(-1.0..=1.0).contains(&delta) {
            return Err(RowViolation::DeltaOutOfRange { value: delta });
        }
    }
    if let Some(gamma) = row.gamma {
        non_negative("gamma", gamma)?;
    }
    if let Some(theta) = row.theta {
        finite("theta", theta)?;
    }
    if let Some(vega) = row.vega {
        finite("vega", vega)?;
    }
    if let Some(iv) = row.iv {
        non_negative("iv", iv)?;
    }
    Ok(())
}

fn positive(field: &'static str, value: f64) -> Result<(), RowViolation> {
    if !value.is_finite() || value <= 0.0 {
        return Err(RowViolation::NonPositive { field });
    }
    Ok(())
}

fn non_negative(field: &'static str, value: f64) -> Result<(), RowViolation> {
    if !value.is_finite() || value < 0.0 {
        return Err(RowViolation::Negative { field });
    }
    Ok(())
}

fn finite(field: &'static str, value: f64) -> Result<(), RowViolation> {
    if !value.is_finite() {
        return Err(RowViolation::NonFinite { field });
    }
    Ok(())
}

/// Identity of a partition: `(symbol, dataset, [start, end])`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PartitionKey {
    pub symbol: String,
    pub dataset: Dataset,
    pub range: DateRange,
}

impl PartitionKey {
    pub fn new(symbol: impl Into<String>, dataset: Dataset, range: DateRange) -> Self {
        Self {
            symbol: symbol.into(),
            dataset,
            range,
        }
    }

    pub fn id(&self) -> String {
        format!(
            "{}:{}:{}:{}",
            self.symbol,
            self.dataset,
            format_date(self.range.start),
            format_date(self.range.end)
        )
    }

    /// Path of the partition file relative to the warehouse home.
    pub fn relative_path(&self) -> PathBuf {
        PathBuf::from("partitions")
            .join(&self.symbol)
            .join(self.dataset.as_str())
            .join(format!(
                "{}_{}.duckdb",
                format_date(self.range.start),
                format_date(self.range.end)
            ))
    }
}

/// Catalog entry describing a stored partition.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PartitionInfo {
    pub id: String,
    pub symbol: String,
    pub dataset: Dataset,
    pub range: DateRange,
    pub path: PathBuf,
    pub encrypted: bool,
    pub row_count: u64,
    pub generation: u64,
    pub created_at: String,
    pub updated_at: String,
}

impl PartitionInfo {
    pub fn key(&self) -> PartitionKey {
        PartitionKey::new(self.symbol.clone(), self.dataset, self.range)
    }
}

/// Outcome of a committed import.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ImportReport {
    pub partition_id: String,
    pub rows_written: usize,
    pub row_count: u64,
    pub generation: u64,
}

/// Outcome of an out-of-band integrity check.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IntegrityReport {
    pub partition_id: String,
    pub ok: bool,
    pub row_count: u64,
    pub issues: Vec<String>,
}

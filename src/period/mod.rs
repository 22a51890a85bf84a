//! Period planning: split a `[start, end)` range into bounded query windows.
//!
//! Windows are contiguous and non-overlapping, and the last one is cut
//! short so that it ends exactly at the range end. Each window gets a
//! label derived from its bounds, used as the partition key for the
//! files the collector writes.

use chrono::{DateTime, Datelike, Months, NaiveDate, TimeZone, Timelike, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

const SECS_PER_HOUR: i64 = 3_600;
const SECS_PER_DAY: i64 = 86_400;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PlanError {
    #[error("empty range: start {start} is not before end {end}")]
    EmptyRange { start: i64, end: i64 },
    #[error("window length must be positive")]
    ZeroWindow,
    #[error("timestamp {0} is outside the supported calendar range")]
    OutOfRange(i64),
}

/// A half-open time window `[start, end)` in unix seconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Period {
    pub start: i64,
    pub end: i64,
    pub label: String,
}

impl Period {
    pub fn len_secs(&self) -> i64 {
        self.end - self.start
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{}, {})", self.label, self.start, self.end)
    }
}

/// Nominal window size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(try_from = "String")]
pub enum WindowLength {
    /// Calendar months. The first window runs to the next month boundary.
    #[default]
    Month,
    /// A fixed number of seconds.
    Fixed(i64),
}

impl FromStr for WindowLength {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim().to_ascii_lowercase();
        if s == "month" || s == "monthly" {
            return Ok(Self::Month);
        }
        let invalid = || format!("invalid window {s:?} (use \"month\", \"<n>d\" or \"<n>h\")");
        let unit = s.chars().last().ok_or_else(invalid)?;
        let n: i64 = s[..s.len() - unit.len_utf8()].parse().map_err(|_| invalid())?;
        if n <= 0 {
            return Err(format!("window {s:?} must be positive"));
        }
        let scale = match unit {
            'd' => SECS_PER_DAY,
            'h' => SECS_PER_HOUR,
            _ => return Err(invalid()),
        };
        n.checked_mul(scale).map(Self::Fixed).ok_or_else(invalid)
    }
}

impl TryFrom<String> for WindowLength {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl fmt::Display for WindowLength {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Month => write!(f, "month"),
            Self::Fixed(secs) if secs % SECS_PER_DAY == 0 => write!(f, "{}d", secs / SECS_PER_DAY),
            Self::Fixed(secs) if secs % SECS_PER_HOUR == 0 => {
                write!(f, "{}h", secs / SECS_PER_HOUR)
            }
            Self::Fixed(secs) => write!(f, "{secs}s"),
        }
    }
}

/// Split `[range_start, range_end)` into consecutive windows.
///
/// Pure function of its inputs: planning the same range twice gives the
/// same periods and the same labels.
pub fn plan(range_start: i64, range_end: i64, window: WindowLength) -> Result<Vec<Period>, PlanError> {
    if range_end <= range_start {
        return Err(PlanError::EmptyRange {
            start: range_start,
            end: range_end,
        });
    }
    if let WindowLength::Fixed(secs) = window {
        if secs <= 0 {
            return Err(PlanError::ZeroWindow);
        }
    }

    let mut periods = Vec::new();
    let mut cursor = range_start;
    while cursor < range_end {
        let nominal_end = match window {
            WindowLength::Fixed(secs) => cursor.saturating_add(secs),
            WindowLength::Month => next_month_start(cursor)?,
        };
        let end = nominal_end.min(range_end);
        periods.push(Period {
            start: cursor,
            end,
            label: label_for(cursor, end)?,
        });
        cursor = end;
    }
    Ok(periods)
}

fn to_datetime(ts: i64) -> Result<DateTime<Utc>, PlanError> {
    DateTime::from_timestamp(ts, 0).ok_or(PlanError::OutOfRange(ts))
}

/// First instant of the calendar month after the one containing `ts`.
fn next_month_start(ts: i64) -> Result<i64, PlanError> {
    let dt = to_datetime(ts)?;
    let first = NaiveDate::from_ymd_opt(dt.year(), dt.month(), 1)
        .and_then(|d| d.checked_add_months(Months::new(1)))
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .ok_or(PlanError::OutOfRange(ts))?;
    Ok(Utc.from_utc_datetime(&first).timestamp())
}

fn is_midnight(dt: &DateTime<Utc>) -> bool {
    dt.hour() == 0 && dt.minute() == 0 && dt.second() == 0
}

/// Label a window from its bounds.
///
/// Whole calendar months become `YYYY-MM`, other day-aligned windows
/// `YYYY-MM-DD_YYYY-MM-DD`, anything else a second-resolution pair.
pub fn label_for(start: i64, end: i64) -> Result<String, PlanError> {
    let s = to_datetime(start)?;
    let e = to_datetime(end)?;

    if is_midnight(&s) && s.day() == 1 && next_month_start(start)? == end {
        return Ok(s.format("%Y-%m").to_string());
    }
    if is_midnight(&s) && is_midnight(&e) {
        return Ok(format!("{}_{}", s.format("%Y-%m-%d"), e.format("%Y-%m-%d")));
    }
    Ok(format!(
        "{}_{}",
        s.format("%Y%m%dT%H%M%S"),
        e.format("%Y%m%dT%H%M%S")
    ))
}

/// English month name for a `YYYY-MM` label, if it is one.
pub fn month_name(label: &str) -> Option<String> {
    let date = NaiveDate::parse_from_str(&format!("{label}-01"), "%Y-%m-%d").ok()?;
    Some(date.format("%B").to_string())
}

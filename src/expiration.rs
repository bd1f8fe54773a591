//! Expiration times handed to the cache
//!
//! Relative intervals keep whole months apart from days and sub-day time.
//! They normalize with a fixed approximation: a year of twelve months is
//! 365.25 days and each leftover month is 30 days.

use crate::error::{CacheError, Result};
use chrono::{DateTime, Utc};
use std::str::FromStr;

const SECS_PER_DAY: f64 = 86400.0;
const SECS_PER_YEAR: f64 = 365.25 * SECS_PER_DAY;
const SECS_PER_MONTH: f64 = 30.0 * SECS_PER_DAY;

/// Calendar-aware duration: months, days and microseconds kept apart
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Interval {
    pub months: i32,
    pub days: i32,
    pub micros: i64,
}

impl Interval {
    pub fn seconds(secs: i64) -> Self {
        Self {
            micros: secs.saturating_mul(1_000_000),
            ..Self::default()
        }
    }

    pub fn days(days: i32) -> Self {
        Self {
            days,
            ..Self::default()
        }
    }

    pub fn months(months: i32) -> Self {
        Self {
            months,
            ..Self::default()
        }
    }

    /// Normalized length in seconds, truncated toward zero
    pub fn total_seconds(&self) -> f64 {
        let mut result = self.micros as f64 / 1e6;
        result += f64::from(self.days) * SECS_PER_DAY;
        if self.months != 0 {
            result += SECS_PER_YEAR * f64::from(self.months / 12);
            result += SECS_PER_MONTH * f64::from(self.months % 12);
        }
        result.trunc()
    }
}

/// When a stored item expires
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Expiration {
    #[default]
    Never,
    /// Relative to now
    In(Interval),
    /// Absolute instant
    At(DateTime<Utc>),
}

impl Expiration {
    /// Seconds as the server takes them, 0 meaning never
    pub fn to_seconds(&self) -> Result<u32> {
        let secs = match self {
            Expiration::Never => return Ok(0),
            Expiration::In(interval) => interval.total_seconds(),
            Expiration::At(instant) => instant.timestamp() as f64,
        };
        if secs < 0.0 || secs > f64::from(u32::MAX) {
            return Err(CacheError::Range("timestamp out of range".to_string()));
        }
        Ok(secs as u32)
    }
}

impl From<Interval> for Expiration {
    fn from(interval: Interval) -> Self {
        Expiration::In(interval)
    }
}

impl From<DateTime<Utc>> for Expiration {
    fn from(instant: DateTime<Utc>) -> Self {
        Expiration::At(instant)
    }
}

/// Accepts plain seconds (`3600`), an RFC 3339 instant, or amount and unit
/// pairs such as `1 year 2 months` or `2 hours 30 minutes`.
impl FromStr for Expiration {
    type Err = CacheError;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.is_empty() || s == "0" {
            return Ok(Expiration::Never);
        }
        if let Ok(secs) = s.parse::<i64>() {
            return Ok(Expiration::In(Interval::seconds(secs)));
        }
        if let Ok(instant) = DateTime::parse_from_rfc3339(s) {
            return Ok(Expiration::At(instant.with_timezone(&Utc)));
        }
        parse_units(s).map(Expiration::In)
    }
}

fn parse_units(s: &str) -> Result<Interval> {
    let invalid = || CacheError::Validation(format!("invalid interval: {s}"));
    let mut interval = Interval::default();
    let mut words = s.split_whitespace();

    while let Some(amount) = words.next() {
        let amount: i64 = amount.parse().map_err(|_| invalid())?;
        let unit = words.next().ok_or_else(invalid)?.to_ascii_lowercase();
        let unit = unit.strip_suffix('s').unwrap_or(&unit);
        let small = |n: i64| i32::try_from(n).map_err(|_| invalid());
        match unit {
            "sec" | "second" => interval.micros += amount.saturating_mul(1_000_000),
            "min" | "minute" => interval.micros += amount.saturating_mul(60_000_000),
            "hour" => interval.micros += amount.saturating_mul(3_600_000_000),
            "day" => interval.days += small(amount)?,
            "week" => interval.days += small(amount.saturating_mul(7))?,
            "mon" | "month" => interval.months += small(amount)?,
            "year" => interval.months += small(amount.saturating_mul(12))?,
            _ => return Err(invalid()),
        }
    }

    Ok(interval)
}

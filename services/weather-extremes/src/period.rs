//! Period kinds, boundary detection and the per-period tracker
//!
//! A [`PeriodTracker`] is either empty or accumulating. The first sample seeds
//! high, low and average; later samples in the same period update them
//! incrementally. A sample from a later period closes the current summary
//! (handed back to the caller for archiving) and seeds a fresh one.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Datelike, Duration, FixedOffset, NaiveTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ExtremesError;

/// The time windows extremes are tracked over
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PeriodKind {
    Day,
    Week,
    Month,
    Year,
    AllTime,
}

impl PeriodKind {
    pub const ALL: [PeriodKind; 5] = [
        PeriodKind::Day,
        PeriodKind::Week,
        PeriodKind::Month,
        PeriodKind::Year,
        PeriodKind::AllTime,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PeriodKind::Day => "day",
            PeriodKind::Week => "week",
            PeriodKind::Month => "month",
            PeriodKind::Year => "year",
            PeriodKind::AllTime => "all_time",
        }
    }

    /// Start of the period containing `timestamp`, in the given zone.
    ///
    /// Weeks start on Monday (ISO). `AllTime` has no boundary.
    pub fn period_start(
        &self,
        timestamp: DateTime<Utc>,
        offset: FixedOffset,
    ) -> Option<DateTime<Utc>> {
        let date = timestamp.with_timezone(&offset).date_naive();
        let start = match self {
            PeriodKind::Day => date,
            PeriodKind::Week => {
                date - Duration::days(i64::from(date.weekday().num_days_from_monday()))
            }
            PeriodKind::Month => date.with_day(1)?,
            PeriodKind::Year => date.with_ordinal(1)?,
            PeriodKind::AllTime => return None,
        };
        offset
            .from_local_datetime(&start.and_time(NaiveTime::MIN))
            .single()
            .map(|local| local.with_timezone(&Utc))
    }
}

impl fmt::Display for PeriodKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PeriodKind {
    type Err = ExtremesError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "day" => Ok(PeriodKind::Day),
            "week" => Ok(PeriodKind::Week),
            "month" => Ok(PeriodKind::Month),
            "year" => Ok(PeriodKind::Year),
            "all_time" | "alltime" | "all-time" => Ok(PeriodKind::AllTime),
            other => Err(ExtremesError::InvalidPeriod(format!(
                "'{}' is not one of day, week, month, year, all_time",
                other
            ))),
        }
    }
}

/// A value and the instant it was observed
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ExtremeRecord {
    pub value: f64,
    pub timestamp: DateTime<Utc>,
}

/// Compact summary of one period: extremes, running mean and sample count
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeriodSummary {
    pub period_kind: PeriodKind,
    #[serde(default)]
    pub high: Option<ExtremeRecord>,
    #[serde(default)]
    pub low: Option<ExtremeRecord>,
    #[serde(default)]
    pub average: Option<f64>,
    #[serde(default)]
    pub sample_count: u64,
    #[serde(default)]
    pub period_start: Option<DateTime<Utc>>,
}

impl PeriodSummary {
    pub fn empty(period_kind: PeriodKind) -> Self {
        Self {
            period_kind,
            high: None,
            low: None,
            average: None,
            sample_count: 0,
            period_start: None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.high.is_none() && self.low.is_none() && self.average.is_none()
    }
}

/// One incoming sample as seen by the trackers.
///
/// `value` keeps full precision for averaging; `rounded` is what extremes
/// store and display.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Reading {
    pub value: f64,
    pub rounded: f64,
    pub timestamp: DateTime<Utc>,
}

/// Accumulates one period kind and detects its rollovers
#[derive(Debug, Clone, PartialEq)]
pub struct PeriodTracker {
    summary: PeriodSummary,
}

impl PeriodTracker {
    pub fn new(kind: PeriodKind) -> Self {
        Self {
            summary: PeriodSummary::empty(kind),
        }
    }

    pub fn from_summary(summary: PeriodSummary) -> Self {
        Self { summary }
    }

    pub fn kind(&self) -> PeriodKind {
        self.summary.period_kind
    }

    pub fn summary(&self) -> &PeriodSummary {
        &self.summary
    }

    pub fn is_empty(&self) -> bool {
        self.summary.is_empty()
    }

    /// Fold a reading into the current period.
    ///
    /// Returns the closed summary when the reading belongs to a later period.
    /// Readings from an earlier period are folded into the current one.
    pub fn absorb(&mut self, reading: &Reading, offset: FixedOffset) -> Option<PeriodSummary> {
        let boundary = self.kind().period_start(reading.timestamp, offset);
        let closed = if self.rolls_over(boundary, offset) {
            Some(self.close())
        } else {
            None
        };

        if self.summary.period_start.is_none() {
            self.summary.period_start = Some(boundary.unwrap_or(reading.timestamp));
        }
        self.accumulate(reading);
        closed
    }

    /// Close the current period if `now` has moved past it
    pub fn sweep(&mut self, now: DateTime<Utc>, offset: FixedOffset) -> Option<PeriodSummary> {
        let boundary = self.kind().period_start(now, offset);
        if self.rolls_over(boundary, offset) {
            Some(self.close())
        } else {
            None
        }
    }

    /// Discard the current summary without archiving it
    pub fn reset(&mut self) {
        self.summary = PeriodSummary::empty(self.kind());
    }

    fn rolls_over(&self, incoming: Option<DateTime<Utc>>, offset: FixedOffset) -> bool {
        if self.is_empty() {
            return false;
        }
        let current = self
            .summary
            .period_start
            .and_then(|start| self.kind().period_start(start, offset));
        matches!((current, incoming), (Some(current), Some(incoming)) if incoming > current)
    }

    fn close(&mut self) -> PeriodSummary {
        let kind = self.kind();
        std::mem::replace(&mut self.summary, PeriodSummary::empty(kind))
    }

    fn accumulate(&mut self, reading: &Reading) {
        let record = ExtremeRecord {
            value: reading.rounded,
            timestamp: reading.timestamp,
        };

        if self.summary.high.is_none_or(|high| {
            record.value > high.value
                || (record.value == high.value && record.timestamp < high.timestamp)
        }) {
            self.summary.high = Some(record);
        }
        if self.summary.low.is_none_or(|low| {
            record.value < low.value
                || (record.value == low.value && record.timestamp < low.timestamp)
        }) {
            self.summary.low = Some(record);
        }

        let count = self.summary.sample_count;
        self.summary.average = Some(match self.summary.average {
            Some(avg) if count > 0 => running_mean(avg, count, reading.value),
            _ => reading.value,
        });
        self.summary.sample_count = count + 1;
    }
}

/// Mean of `count` values averaging `avg` plus `value`, without overflowing
/// for values near `f64::MAX`
fn running_mean(avg: f64, count: u64, value: f64) -> f64 {
    let total = (count + 1) as f64;
    let next = avg + (value - avg) / total;
    if next.is_finite() {
        next
    } else {
        avg * (count as f64 / total) + value / total
    }
}

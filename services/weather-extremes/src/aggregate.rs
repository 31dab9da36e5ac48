//! Per-sensor aggregate: rolling window, five period trackers and the archive
//! of closed period summaries

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::SensorConfig;
use crate::error::{ExtremesError, Result};
use crate::period::{PeriodKind, PeriodSummary, PeriodTracker, Reading};
use crate::rolling::{RollingWindow, TimedSample};

pub const DEFAULT_ARCHIVE_RETENTION: usize = 500;

/// Everything tracked for one sensor
#[derive(Debug, Clone, PartialEq)]
pub struct SensorAggregate {
    config: SensorConfig,
    archive_retention: usize,
    rolling: RollingWindow,
    trackers: [PeriodTracker; 5],
    archive: Vec<PeriodSummary>,
}

impl SensorAggregate {
    pub fn new(config: SensorConfig, archive_retention: usize) -> Result<Self> {
        config.validate()?;
        let rolling = RollingWindow::new(config.averaging_window)?;
        Ok(Self {
            config,
            archive_retention: archive_retention.max(1),
            rolling,
            trackers: PeriodKind::ALL.map(PeriodTracker::new),
            archive: Vec::new(),
        })
    }

    /// Assemble an aggregate from already merged or deserialized parts.
    ///
    /// The archive is re-sorted and trimmed to the retention limit.
    pub(crate) fn from_parts(
        config: SensorConfig,
        archive_retention: usize,
        rolling: RollingWindow,
        summaries: [PeriodSummary; 5],
        archive: Vec<PeriodSummary>,
    ) -> Self {
        let mut aggregate = Self {
            config,
            archive_retention: archive_retention.max(1),
            rolling,
            trackers: summaries.map(PeriodTracker::from_summary),
            archive,
        };
        aggregate.archive.sort_by(archive_order);
        aggregate.enforce_retention();
        aggregate
    }

    /// Rebuild an aggregate for `config` from an exported snapshot.
    ///
    /// The snapshot's own id and precision are ignored; the target sensor's
    /// configuration wins.
    pub fn from_snapshot(
        config: SensorConfig,
        archive_retention: usize,
        snapshot: SensorSnapshot,
    ) -> Result<Self> {
        config.validate()?;

        let mut summaries = PeriodKind::ALL.map(PeriodSummary::empty);
        for (kind, summary) in snapshot.periods {
            if summary.period_kind != kind {
                return Err(ExtremesError::Parse(format!(
                    "summary under '{}' is labelled '{}'",
                    kind, summary.period_kind
                )));
            }
            validate_summary(&summary)?;
            summaries[kind as usize] = summary;
        }
        for summary in &snapshot.archive {
            validate_summary(summary)?;
            if summary.period_start.is_none() {
                return Err(ExtremesError::Parse(format!(
                    "archived '{}' summary has no period_start",
                    summary.period_kind
                )));
            }
        }
        if snapshot.rolling.samples.iter().any(|s| !s.value.is_finite()) {
            return Err(ExtremesError::Parse(
                "rolling window contains a non-finite sample".to_string(),
            ));
        }

        let rolling =
            RollingWindow::from_samples(config.averaging_window, snapshot.rolling.samples)?;
        Ok(Self::from_parts(
            config,
            archive_retention,
            rolling,
            summaries,
            snapshot.archive,
        ))
    }

    pub fn sensor_id(&self) -> &str {
        &self.config.entity_id
    }

    pub fn config(&self) -> &SensorConfig {
        &self.config
    }

    pub fn archive_retention(&self) -> usize {
        self.archive_retention
    }

    pub fn rolling(&self) -> &RollingWindow {
        &self.rolling
    }

    pub fn summary(&self, kind: PeriodKind) -> &PeriodSummary {
        self.trackers[kind as usize].summary()
    }

    pub fn summaries(&self) -> impl Iterator<Item = &PeriodSummary> {
        self.trackers.iter().map(PeriodTracker::summary)
    }

    /// Closed summaries, oldest first
    pub fn archive(&self) -> &[PeriodSummary] {
        &self.archive
    }

    /// Feed one reading to the rolling window and every period tracker.
    ///
    /// Extremes keep the value rounded to the configured precision, averages
    /// use the full value.
    pub fn absorb_reading(&mut self, value: f64, timestamp: DateTime<Utc>) -> Result<()> {
        if !value.is_finite() {
            return Err(ExtremesError::InvalidValue(format!(
                "{} reported a non-finite value ({})",
                self.config.entity_id, value
            )));
        }

        let reading = Reading {
            value,
            rounded: round_to(value, self.config.decimal_places),
            timestamp,
        };
        let offset = self.config.offset();

        self.rolling.absorb(value, timestamp);
        let closed: Vec<PeriodSummary> = self
            .trackers
            .iter_mut()
            .filter_map(|tracker| tracker.absorb(&reading, offset))
            .collect();
        for summary in closed {
            tracing::debug!(
                "{}: {} period starting {:?} closed with {} samples",
                self.config.entity_id,
                summary.period_kind,
                summary.period_start,
                summary.sample_count
            );
            self.archive_summary(summary);
        }
        Ok(())
    }

    /// Close every period `now` has moved past. Returns how many were closed.
    pub fn sweep(&mut self, now: DateTime<Utc>) -> usize {
        let offset = self.config.offset();
        self.rolling.evict(now);
        let closed: Vec<PeriodSummary> = self
            .trackers
            .iter_mut()
            .filter_map(|tracker| tracker.sweep(now, offset))
            .collect();
        let count = closed.len();
        for summary in closed {
            self.archive_summary(summary);
        }
        count
    }

    /// Empty one period without archiving its summary
    pub fn reset_period(&mut self, kind: PeriodKind) {
        self.trackers[kind as usize].reset();
    }

    pub fn resize_window(&mut self, window_minutes: u32, now: DateTime<Utc>) -> Result<()> {
        self.rolling.resize(window_minutes, now)?;
        self.config.averaging_window = window_minutes;
        Ok(())
    }

    pub fn current_average(&self, now: DateTime<Utc>) -> Option<f64> {
        self.rolling.current_average(now)
    }

    /// Drop archived summaries whose period started before `cutoff`.
    /// Live summaries are never touched.
    pub fn purge_before(&mut self, cutoff: DateTime<Utc>) -> usize {
        let before = self.archive.len();
        self.archive
            .retain(|summary| summary.period_start.is_none_or(|start| start >= cutoff));
        before - self.archive.len()
    }

    /// Replace the configuration, resizing the rolling window to match
    pub fn reconfigure(&mut self, config: SensorConfig, now: DateTime<Utc>) -> Result<()> {
        config.validate()?;
        self.rolling.resize(config.averaging_window, now)?;
        self.config = config;
        Ok(())
    }

    /// Point-in-time, serializable copy of this aggregate
    pub fn export(&self, now: DateTime<Utc>, period_filter: Option<PeriodKind>) -> SensorSnapshot {
        let wanted = |kind: PeriodKind| period_filter.is_none_or(|filter| filter == kind);
        SensorSnapshot {
            sensor_id: self.config.entity_id.clone(),
            decimal_places: self.config.decimal_places,
            rolling: RollingSnapshot {
                window_minutes: self.rolling.window_minutes(),
                current_average: self.rolling.current_average(now),
                samples: self.rolling.samples().copied().collect(),
            },
            periods: self
                .summaries()
                .filter(|summary| wanted(summary.period_kind))
                .map(|summary| (summary.period_kind, summary.clone()))
                .collect(),
            archive: self
                .archive
                .iter()
                .filter(|summary| wanted(summary.period_kind))
                .cloned()
                .collect(),
        }
    }

    fn archive_summary(&mut self, summary: PeriodSummary) {
        match self
            .archive
            .binary_search_by(|existing| archive_order(existing, &summary))
        {
            Ok(index) => self.archive[index] = summary,
            Err(index) => self.archive.insert(index, summary),
        }
        self.enforce_retention();
    }

    fn enforce_retention(&mut self) {
        if self.archive.len() > self.archive_retention {
            let excess = self.archive.len() - self.archive_retention;
            self.archive.drain(..excess);
        }
    }
}

/// Archive ordering: by period start, then by period kind
pub(crate) fn archive_order(a: &PeriodSummary, b: &PeriodSummary) -> std::cmp::Ordering {
    (a.period_start, a.period_kind).cmp(&(b.period_start, b.period_kind))
}

fn validate_summary(summary: &PeriodSummary) -> Result<()> {
    let values = [
        summary.high.map(|r| r.value),
        summary.low.map(|r| r.value),
        summary.average,
    ];
    if values.iter().flatten().any(|v| !v.is_finite()) {
        return Err(ExtremesError::Parse(format!(
            "'{}' summary contains a non-finite value",
            summary.period_kind
        )));
    }
    if let (Some(high), Some(low)) = (summary.high, summary.low) {
        if high.value < low.value {
            return Err(ExtremesError::Parse(format!(
                "'{}' summary has high {} below low {}",
                summary.period_kind, high.value, low.value
            )));
        }
    }
    Ok(())
}

/// Round to a fixed number of decimal places. Values too large to scale are
/// returned unchanged; they have no fractional part left to round.
pub fn round_to(value: f64, decimal_places: u8) -> f64 {
    let factor = 10f64.powi(i32::from(decimal_places));
    let rounded = (value * factor).round() / factor;
    if rounded.is_finite() {
        rounded
    } else {
        value
    }
}

/// Export shape of one sensor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorSnapshot {
    pub sensor_id: String,
    pub decimal_places: u8,
    pub rolling: RollingSnapshot,
    #[serde(default)]
    pub periods: BTreeMap<PeriodKind, PeriodSummary>,
    #[serde(default)]
    pub archive: Vec<PeriodSummary>,
}

/// Export shape of the rolling window
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RollingSnapshot {
    pub window_minutes: u32,
    #[serde(default)]
    pub current_average: Option<f64>,
    #[serde(default)]
    pub samples: Vec<TimedSample>,
}

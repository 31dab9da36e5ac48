//! Combining an existing aggregate with imported or restored data
//!
//! Each [`MergeStrategy`] maps to a row of a fixed rule table: one function
//! deciding between two summaries of the same period and one deciding the
//! rolling samples. Archives are joined on `(period_start, period_kind)` and
//! collisions go through the same summary rule. Live summaries are only
//! combined when both sides are in the same period; otherwise the older one
//! is archived.
//!
//! `KeepExtreme` recombines averages weighted by sample count. That is exact
//! only when the two data sets cover disjoint samples; overlapping data is
//! double counted. Identical summaries are recognised as the same data and
//! kept once.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, FixedOffset, Utc};
use serde::{Deserialize, Serialize};

use crate::aggregate::SensorAggregate;
use crate::error::ExtremesError;
use crate::period::{ExtremeRecord, PeriodKind, PeriodSummary};
use crate::rolling::{RollingWindow, TimedSample};

/// Conflict policy when merging two data sets for the same sensor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeStrategy {
    KeepExisting,
    Overwrite,
    KeepExtreme,
}

impl MergeStrategy {
    pub const ALL: [MergeStrategy; 3] = [
        MergeStrategy::KeepExisting,
        MergeStrategy::Overwrite,
        MergeStrategy::KeepExtreme,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MergeStrategy::KeepExisting => "keep_existing",
            MergeStrategy::Overwrite => "overwrite",
            MergeStrategy::KeepExtreme => "keep_extreme",
        }
    }

    fn rule(self) -> &'static MergeRule {
        match self {
            MergeStrategy::KeepExisting => &KEEP_EXISTING,
            MergeStrategy::Overwrite => &OVERWRITE,
            MergeStrategy::KeepExtreme => &KEEP_EXTREME,
        }
    }
}

impl fmt::Display for MergeStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MergeStrategy {
    type Err = ExtremesError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        MergeStrategy::ALL
            .into_iter()
            .find(|strategy| strategy.as_str() == s.trim())
            .ok_or_else(|| {
                ExtremesError::InvalidRange(format!(
                    "'{}' is not one of keep_existing, overwrite, keep_extreme",
                    s
                ))
            })
    }
}

struct MergeRule {
    summary: fn(&PeriodSummary, &PeriodSummary) -> PeriodSummary,
    samples: fn(&RollingWindow, &RollingWindow) -> Vec<TimedSample>,
}

const KEEP_EXISTING: MergeRule = MergeRule {
    summary: keep_existing_summary,
    samples: keep_existing_samples,
};

const OVERWRITE: MergeRule = MergeRule {
    summary: overwrite_summary,
    samples: overwrite_samples,
};

const KEEP_EXTREME: MergeRule = MergeRule {
    summary: keep_extreme_summary,
    samples: union_samples,
};

/// Merge `incoming` into `existing`.
///
/// The result keeps the existing sensor's configuration, window length and
/// archive retention.
pub fn merge(
    existing: &SensorAggregate,
    incoming: &SensorAggregate,
    strategy: MergeStrategy,
) -> SensorAggregate {
    let rule = strategy.rule();
    let offset = existing.config().offset();

    // A live summary from an older period than the other side's is closed
    // into its side's archive; the newer one stays live.
    let mut existing_closed = existing.archive().to_vec();
    let mut incoming_closed = incoming.archive().to_vec();
    let summaries = PeriodKind::ALL.map(|kind| {
        let (e, i) = (existing.summary(kind), incoming.summary(kind));
        match (live_period(e, offset), live_period(i, offset)) {
            (Some(start_e), Some(start_i)) if start_e < start_i => {
                existing_closed.push(closed_at(e, start_e));
                i.clone()
            }
            (Some(start_e), Some(start_i)) if start_i < start_e => {
                incoming_closed.push(closed_at(i, start_i));
                e.clone()
            }
            _ => (rule.summary)(e, i),
        }
    });
    let archive = merge_archives(&existing_closed, &incoming_closed, rule.summary);
    let rolling = existing
        .rolling()
        .with_samples((rule.samples)(existing.rolling(), incoming.rolling()));

    SensorAggregate::from_parts(
        existing.config().clone(),
        existing.archive_retention(),
        rolling,
        summaries,
        archive,
    )
}

/// Boundary of the period a non-empty live summary belongs to
fn live_period(summary: &PeriodSummary, offset: FixedOffset) -> Option<DateTime<Utc>> {
    if summary.is_empty() {
        return None;
    }
    summary
        .period_start
        .and_then(|start| summary.period_kind.period_start(start, offset))
}

fn closed_at(summary: &PeriodSummary, start: DateTime<Utc>) -> PeriodSummary {
    PeriodSummary {
        period_start: Some(start),
        ..summary.clone()
    }
}

fn merge_archives(
    existing: &[PeriodSummary],
    incoming: &[PeriodSummary],
    rule: fn(&PeriodSummary, &PeriodSummary) -> PeriodSummary,
) -> Vec<PeriodSummary> {
    let mut merged: BTreeMap<_, PeriodSummary> = existing
        .iter()
        .map(|summary| ((summary.period_start, summary.period_kind), summary.clone()))
        .collect();

    for summary in incoming {
        let key = (summary.period_start, summary.period_kind);
        let winner = match merged.get(&key) {
            Some(current) => rule(current, summary),
            None => summary.clone(),
        };
        merged.insert(key, winner);
    }

    merged.into_values().collect()
}

fn keep_existing_summary(existing: &PeriodSummary, incoming: &PeriodSummary) -> PeriodSummary {
    if existing.is_empty() && !incoming.is_empty() {
        incoming.clone()
    } else {
        existing.clone()
    }
}

fn overwrite_summary(existing: &PeriodSummary, incoming: &PeriodSummary) -> PeriodSummary {
    if incoming.is_empty() {
        existing.clone()
    } else {
        incoming.clone()
    }
}

fn keep_extreme_summary(existing: &PeriodSummary, incoming: &PeriodSummary) -> PeriodSummary {
    if incoming.is_empty() || existing == incoming {
        return existing.clone();
    }
    if existing.is_empty() {
        return incoming.clone();
    }

    let (n_e, n_i) = (existing.sample_count, incoming.sample_count);
    let total = n_e + n_i;
    let average = match (existing.average, incoming.average) {
        (Some(avg_e), Some(avg_i)) if total > 0 => Some(weighted_mean(avg_e, n_e, avg_i, n_i)),
        (avg_e, avg_i) => avg_e.or(avg_i),
    };
    let period_start = match (existing.period_start, incoming.period_start) {
        (Some(e), Some(i)) => Some(e.min(i)),
        (e, i) => e.or(i),
    };

    PeriodSummary {
        period_kind: existing.period_kind,
        high: pick(existing.high, incoming.high, |i, e| i.value > e.value),
        low: pick(existing.low, incoming.low, |i, e| i.value < e.value),
        average,
        sample_count: total,
        period_start,
    }
}

fn weighted_mean(avg_e: f64, n_e: u64, avg_i: f64, n_i: u64) -> f64 {
    let total = (n_e + n_i) as f64;
    let mean = (avg_e * n_e as f64 + avg_i * n_i as f64) / total;
    if mean.is_finite() {
        mean
    } else {
        avg_e * (n_e as f64 / total) + avg_i * (n_i as f64 / total)
    }
}

/// Existing wins unless `better(incoming, existing)` holds
fn pick(
    existing: Option<ExtremeRecord>,
    incoming: Option<ExtremeRecord>,
    better: fn(&ExtremeRecord, &ExtremeRecord) -> bool,
) -> Option<ExtremeRecord> {
    match (existing, incoming) {
        (Some(e), Some(i)) if better(&i, &e) => Some(i),
        (Some(e), _) => Some(e),
        (None, i) => i,
    }
}

fn keep_existing_samples(existing: &RollingWindow, incoming: &RollingWindow) -> Vec<TimedSample> {
    if existing.is_empty() {
        incoming.samples().copied().collect()
    } else {
        existing.samples().copied().collect()
    }
}

fn overwrite_samples(existing: &RollingWindow, incoming: &RollingWindow) -> Vec<TimedSample> {
    if incoming.is_empty() {
        existing.samples().copied().collect()
    } else {
        incoming.samples().copied().collect()
    }
}

fn union_samples(existing: &RollingWindow, incoming: &RollingWindow) -> Vec<TimedSample> {
    let mut samples: Vec<TimedSample> = existing.samples().copied().collect();
    let extra: Vec<TimedSample> = incoming
        .samples()
        .filter(|sample| !samples.contains(sample))
        .copied()
        .collect();
    samples.extend(extra);
    samples
}

//! Read-only entity views of an aggregate, one per published statistic

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::aggregate::{round_to, SensorAggregate};
use crate::period::PeriodKind;

const ENTITY_PREFIX: &str = "sensor.weather_extremes";

/// Periods that get an average entity, besides the rolling "current" one
const AVERAGED_PERIODS: [PeriodKind; 4] = [
    PeriodKind::Day,
    PeriodKind::Week,
    PeriodKind::Month,
    PeriodKind::Year,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Statistic {
    High,
    Low,
    Average,
}

impl Statistic {
    pub fn as_str(&self) -> &'static str {
        match self {
            Statistic::High => "high",
            Statistic::Low => "low",
            Statistic::Average => "average",
        }
    }
}

impl fmt::Display for Statistic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One published value with its attributes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityState {
    pub entity_id: String,
    pub source_entity: String,
    /// `None` until the period has seen a reading
    pub state: Option<f64>,
    pub attributes: EntityAttributes,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityAttributes {
    pub friendly_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit_of_measurement: Option<String>,
    /// Period name, or "current" for the rolling average
    pub period: String,
    pub statistic: Statistic,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_reset: Option<DateTime<Utc>>,
    /// When the extreme was observed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub averaging_window: Option<u32>,
}

/// All entities for one sensor: high and low per period, then the averages
pub fn project(aggregate: &SensorAggregate, now: DateTime<Utc>) -> Vec<EntityState> {
    let config = aggregate.config();
    let places = config.decimal_places;
    let entity = |period: &str, statistic: Statistic, state: Option<f64>| EntityState {
        entity_id: entity_id(&config.name, period, statistic),
        source_entity: config.entity_id.clone(),
        state: state.map(|v| round_to(v, places)),
        attributes: EntityAttributes {
            friendly_name: format!("{} {} {}", config.name, period, statistic),
            unit_of_measurement: config.unit_of_measurement.clone(),
            period: period.to_string(),
            statistic,
            last_reset: None,
            timestamp: None,
            averaging_window: None,
        },
    };

    let mut entities = Vec::with_capacity(PeriodKind::ALL.len() * 2 + AVERAGED_PERIODS.len() + 1);
    for summary in aggregate.summaries() {
        let period = summary.period_kind.as_str();
        for (statistic, record) in [
            (Statistic::High, summary.high),
            (Statistic::Low, summary.low),
        ] {
            let mut state = entity(period, statistic, record.map(|r| r.value));
            state.attributes.last_reset = summary.period_start;
            state.attributes.timestamp = record.map(|r| r.timestamp);
            entities.push(state);
        }
    }

    let mut current = entity("current", Statistic::Average, aggregate.current_average(now));
    current.attributes.averaging_window = Some(aggregate.rolling().window_minutes());
    entities.push(current);

    for kind in AVERAGED_PERIODS {
        let summary = aggregate.summary(kind);
        let mut state = entity(kind.as_str(), Statistic::Average, summary.average);
        state.attributes.last_reset = summary.period_start;
        entities.push(state);
    }

    entities
}

pub fn entity_id(name: &str, period: &str, statistic: Statistic) -> String {
    format!("{}_{}_{}_{}", ENTITY_PREFIX, slug(name), period, statistic)
}

/// Lowercase, with runs of anything but ASCII letters and digits collapsed to `_`
pub fn slug(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    for c in name.chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
        } else if !slug.is_empty() && !slug.ends_with('_') {
            slug.push('_');
        }
    }
    while slug.ends_with('_') {
        slug.pop();
    }
    slug
}

//! BDD step definitions for recording readings and reading back statistics

use cucumber::{given, then, when};
use weather_extremes::{PeriodKind, SensorAggregate, SensorConfig};

use crate::world::{at, ExtremesWorld};

fn current(world: &mut ExtremesWorld) -> SensorAggregate {
    let id = world.current_sensor();
    world
        .registry()
        .snapshot(&id)
        .expect("sensor should be tracked")
}

fn period(name: &str) -> PeriodKind {
    name.parse().expect("unknown period in feature file")
}

#[given(expr = "a sensor {string} named {string}")]
fn sensor_named(world: &mut ExtremesWorld, id: String, name: String) {
    let config = SensorConfig::new(&id, &name).expect("invalid sensor config");
    world.add_sensor(config);
}

#[given(expr = "the clock reads {string}")]
fn clock_reads(world: &mut ExtremesWorld, instant: String) {
    world.clock().set(at(&instant));
}

#[when(expr = "the clock moves to {string}")]
fn clock_moves(world: &mut ExtremesWorld, instant: String) {
    clock_reads(world, instant);
}

#[given(expr = "the sensor reported {float} at {string}")]
fn sensor_reported(world: &mut ExtremesWorld, value: f64, instant: String) {
    let id = world.current_sensor();
    world
        .registry()
        .record_reading(&id, value, at(&instant))
        .expect("reading should be accepted");
}

#[given(expr = "sensor {string} reported {float} at {string}")]
fn other_sensor_reported(world: &mut ExtremesWorld, id: String, value: f64, instant: String) {
    world
        .registry()
        .record_reading(&id, value, at(&instant))
        .expect("reading should be accepted");
}

#[when(expr = "the sensor reports {float} at {string}")]
fn sensor_reports(world: &mut ExtremesWorld, value: f64, instant: String) {
    sensor_reported(world, value, instant);
}

#[when("period boundaries are swept")]
fn sweep(world: &mut ExtremesWorld) {
    let registry = world.registry();
    registry.sweep_boundaries(registry.now());
}

#[then(expr = "the {word} high should be {float} at {string}")]
fn high_should_be(world: &mut ExtremesWorld, name: String, value: f64, instant: String) {
    let aggregate = current(world);
    let high = aggregate.summary(period(&name)).high.expect("no high yet");
    assert_eq!(high.value, value);
    assert_eq!(high.timestamp, at(&instant));
}

#[then(expr = "the {word} low should be {float} at {string}")]
fn low_should_be(world: &mut ExtremesWorld, name: String, value: f64, instant: String) {
    let aggregate = current(world);
    let low = aggregate.summary(period(&name)).low.expect("no low yet");
    assert_eq!(low.value, value);
    assert_eq!(low.timestamp, at(&instant));
}

#[then(expr = "the {word} average should be {float}")]
fn average_should_be(world: &mut ExtremesWorld, name: String, expected: f64) {
    let aggregate = current(world);
    let average = if name == "current" {
        let now = world.registry().now();
        aggregate.current_average(now)
    } else {
        aggregate.summary(period(&name)).average
    };
    let average = average.expect("no average yet");
    assert!(
        (average - expected).abs() < 1e-9,
        "{name} average was {average}, expected {expected}"
    );
}

#[then(expr = "the {word} average should be unknown")]
fn average_should_be_unknown(world: &mut ExtremesWorld, name: String) {
    let aggregate = current(world);
    let average = if name == "current" {
        let now = world.registry().now();
        aggregate.current_average(now)
    } else {
        aggregate.summary(period(&name)).average
    };
    assert_eq!(average, None);
}

#[then(expr = "the {word} period should be empty")]
fn period_should_be_empty(world: &mut ExtremesWorld, name: String) {
    let aggregate = current(world);
    assert!(aggregate.summary(period(&name)).is_empty());
}

#[then(expr = "the {word} period should hold {int} samples")]
fn period_sample_count(world: &mut ExtremesWorld, name: String, expected: u64) {
    let aggregate = current(world);
    assert_eq!(aggregate.summary(period(&name)).sample_count, expected);
}

#[then(expr = "the archive should hold {int} {word} summaries")]
fn archive_count(world: &mut ExtremesWorld, expected: usize, name: String) {
    let kind = period(&name);
    let aggregate = current(world);
    let count = aggregate
        .archive()
        .iter()
        .filter(|s| s.period_kind == kind)
        .count();
    assert_eq!(count, expected);
}

#[then(expr = "the archived {word} starting {string} should have high {float} and low {float}")]
fn archived_summary(world: &mut ExtremesWorld, name: String, start: String, high: f64, low: f64) {
    let kind = period(&name);
    let start = at(&start);
    let aggregate = current(world);
    let summary = aggregate
        .archive()
        .iter()
        .find(|s| s.period_kind == kind && s.period_start == Some(start))
        .expect("no archived summary for that period");
    assert_eq!(summary.high.map(|r| r.value), Some(high));
    assert_eq!(summary.low.map(|r| r.value), Some(low));
}

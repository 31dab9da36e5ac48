//! BDD step definitions for administrative operations and their failures

use cucumber::{then, when};
use weather_extremes::PeriodKind;

use crate::world::{at, ExtremesWorld};

#[when(expr = "I enter the value {string} for {string}")]
fn enter_value(world: &mut ExtremesWorld, raw: String, id: String) {
    let value: f64 = raw.parse().expect("not a number");
    let result = world.registry().update_extremes(&id, value, None);
    world.record(result);
}

#[when(expr = "I reset the {string} period of {string}")]
fn reset_period(world: &mut ExtremesWorld, period: String, id: String) {
    let result = period
        .parse::<PeriodKind>()
        .and_then(|kind| world.registry().reset_period(&id, kind));
    world.record(result);
}

#[when(expr = "I set the averaging window of {string} to {int} minutes")]
fn set_window(world: &mut ExtremesWorld, id: String, minutes: u32) {
    let result = world.registry().update_averaging_window(&id, minutes);
    world.record(result);
}

#[when(expr = "I clear the history of {string}")]
fn clear_one(world: &mut ExtremesWorld, id: String) {
    let result = world.registry().clear_history(Some(&id));
    if let Some(outcomes) = world.record(result) {
        world.outcomes = outcomes;
    }
}

#[when("I clear the history of every sensor")]
fn clear_all(world: &mut ExtremesWorld) {
    let result = world.registry().clear_history(None);
    if let Some(outcomes) = world.record(result) {
        world.outcomes = outcomes;
    }
}

#[when(expr = "I purge archives before {string}")]
fn purge_all(world: &mut ExtremesWorld, before: String) {
    let result = world.registry().purge_old_data(None, at(&before));
    if let Some(outcomes) = world.record(result) {
        world.outcomes = outcomes;
    }
}

#[when(expr = "I purge archives of {string} before {string}")]
fn purge_one(world: &mut ExtremesWorld, id: String, before: String) {
    let result = world.registry().purge_old_data(Some(&id), at(&before));
    if let Some(outcomes) = world.record(result) {
        world.outcomes = outcomes;
    }
}

#[then("the operation should succeed")]
fn should_succeed(world: &mut ExtremesWorld) {
    assert!(
        world.last_error.is_none(),
        "unexpected error: {:?}",
        world.last_error
    );
}

#[then(expr = "the operation should fail with {string}")]
fn should_fail_with(world: &mut ExtremesWorld, kind: String) {
    let error = world.last_error.as_ref().expect("operation succeeded");
    let debug = format!("{:?}", error);
    assert!(
        debug.starts_with(&format!("{}(", kind)),
        "expected {kind}, got {debug}"
    );
}

#[then(expr = "there should be {int} outcomes, all successful")]
fn outcomes_all_successful(world: &mut ExtremesWorld, expected: usize) {
    assert_eq!(world.outcomes.len(), expected);
    assert!(world.outcomes.iter().all(|o| o.success && o.error.is_none()));
}

#[then(expr = "the outcome for {string} should say {string}")]
fn outcome_detail(world: &mut ExtremesWorld, id: String, detail: String) {
    let outcome = world
        .outcomes
        .iter()
        .find(|o| o.sensor_id == id)
        .expect("no outcome for sensor");
    assert_eq!(outcome.detail.as_deref(), Some(detail.as_str()));
}

#[then(expr = "{string} should not be tracked")]
fn not_tracked(world: &mut ExtremesWorld, id: String) {
    assert!(!world.registry().contains(&id));
}

#[then(expr = "the averaging window should be {int} minutes")]
fn window_should_be(world: &mut ExtremesWorld, expected: u32) {
    let id = world.current_sensor();
    let aggregate = world.registry().snapshot(&id).expect("sensor should be tracked");
    assert_eq!(aggregate.rolling().window_minutes(), expected);
}

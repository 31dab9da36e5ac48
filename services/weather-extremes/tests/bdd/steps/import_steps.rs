//! BDD step definitions for export, import, backup and restore

use cucumber::{given, then, when};
use weather_extremes::{ExportFormat, MergeStrategy};

use crate::world::ExtremesWorld;

fn export(world: &mut ExtremesWorld, id: &str, format: &str) {
    let result = format
        .parse::<ExportFormat>()
        .and_then(|format| world.registry().export_data(Some(id), format, None, None));
    world.export_path = world.record(result);
}

fn import(world: &mut ExtremesWorld, file: std::path::PathBuf, id: &str, strategy: &str) {
    let result = strategy
        .parse::<MergeStrategy>()
        .and_then(|strategy| world.registry().import_data(id, &file, strategy));
    world.record(result);
}

#[given("the sensor data is exported")]
fn sensor_exported(world: &mut ExtremesWorld) {
    let id = world.current_sensor();
    export(world, &id, "json");
    assert!(world.export_path.is_some(), "export failed: {:?}", world.last_error);
}

#[given("the sensor history is cleared")]
fn sensor_cleared(world: &mut ExtremesWorld) {
    let id = world.current_sensor();
    world
        .registry()
        .clear_history(Some(&id))
        .expect("clear should succeed");
}

#[when(expr = "I export {string} as {string}")]
fn export_as(world: &mut ExtremesWorld, id: String, format: String) {
    export(world, &id, &format);
}

#[when(expr = "I import the export into {string} with {string}")]
fn import_export(world: &mut ExtremesWorld, id: String, strategy: String) {
    let file = world.export_path.clone().expect("nothing was exported");
    import(world, file, &id, &strategy);
}

#[when(expr = "I import {string} into {string} with {string}")]
fn import_file(world: &mut ExtremesWorld, name: String, id: String, strategy: String) {
    let file = world.data_dir().join(name);
    import(world, file, &id, &strategy);
}

#[given(expr = "a file {string} containing {string}")]
fn file_containing(world: &mut ExtremesWorld, name: String, content: String) {
    let path = world.data_dir().join(name);
    std::fs::write(path, content).expect("failed to write file");
}

#[when("I back up every sensor")]
fn back_up(world: &mut ExtremesWorld) {
    let result = world.registry().backup_data(None, true);
    world.export_path = world.record(result);
}

#[when("I restore the backup over a reset registry")]
fn restore_with_reset(world: &mut ExtremesWorld) {
    let file = world.export_path.clone().expect("nothing was backed up");
    let result = world.registry().restore_data(&file, false, true);
    if let Some(outcomes) = world.record(result) {
        world.outcomes = outcomes;
    }
}

#[then("the export file should exist")]
fn export_exists(world: &mut ExtremesWorld) {
    let path = world.export_path.as_ref().expect("nothing was exported");
    assert!(path.exists(), "{path:?} is missing");
}

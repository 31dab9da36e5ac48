//! BDD test world for the weather extremes service

use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use cucumber::World;
use tempfile::TempDir;
use weather_extremes::clock::ManualClock;
use weather_extremes::{AggregationRegistry, Config, ExtremesError, SensorConfig, SensorOutcome};

#[derive(Debug, Default, World)]
pub struct ExtremesWorld {
    pub temp_dir: Option<TempDir>,
    pub clock: Option<Arc<ManualClock>>,
    pub sensors: Vec<SensorConfig>,
    pub registry: Option<AggregationRegistry>,

    /// Sensor the "the sensor ..." steps talk about
    pub current_sensor: Option<String>,

    pub last_error: Option<ExtremesError>,
    pub outcomes: Vec<SensorOutcome>,
    pub export_path: Option<PathBuf>,
}

impl ExtremesWorld {
    pub fn clock(&mut self) -> Arc<ManualClock> {
        Arc::clone(
            self.clock
                .get_or_insert_with(|| Arc::new(ManualClock::new(at("2024-05-15T18:00:00Z")))),
        )
    }

    pub fn data_dir(&mut self) -> PathBuf {
        self.temp_dir
            .get_or_insert_with(|| TempDir::new().expect("failed to create temp dir"))
            .path()
            .to_path_buf()
    }

    /// The registry, built from the sensors declared so far on first use
    pub fn registry(&mut self) -> &AggregationRegistry {
        if self.registry.is_none() {
            let config = Config {
                sensors: self.sensors.clone(),
                data_dir: self.data_dir(),
                ..Config::default()
            };
            let registry =
                AggregationRegistry::new(&config, self.clock()).expect("failed to build registry");
            self.registry = Some(registry);
        }
        self.registry.as_ref().expect("registry just built")
    }

    pub fn add_sensor(&mut self, config: SensorConfig) {
        self.current_sensor = Some(config.entity_id.clone());
        match &self.registry {
            Some(registry) => registry.register(config).expect("failed to register sensor"),
            None => self.sensors.push(config),
        }
    }

    pub fn current_sensor(&self) -> String {
        self.current_sensor.clone().expect("no sensor declared")
    }

    /// Remember the error of an operation, if any
    pub fn record<T>(&mut self, result: weather_extremes::Result<T>) -> Option<T> {
        match result {
            Ok(value) => {
                self.last_error = None;
                Some(value)
            }
            Err(e) => {
                self.last_error = Some(e);
                None
            }
        }
    }
}

pub fn at(raw: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(raw)
        .expect("invalid timestamp in feature file")
        .with_timezone(&Utc)
}

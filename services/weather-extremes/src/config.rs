//! Configuration types for the weather extremes service

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use chrono::{FixedOffset, Offset, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{ExtremesError, Result};
use crate::rolling::{validate_window, DEFAULT_WINDOW_MINUTES};

pub const MAX_DECIMAL_PLACES: u8 = 3;
pub const MAX_UTC_OFFSET_MINUTES: i32 = 18 * 60;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub sensors: Vec<SensorConfig>,
    #[serde(default)]
    pub persistence: PersistenceConfig,
    /// Default directory for exports and backups
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    /// Maximum number of closed period summaries kept per sensor
    #[serde(default = "default_archive_retention")]
    pub archive_retention: usize,
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_seconds: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            sensors: Vec::new(),
            persistence: PersistenceConfig::default(),
            data_dir: default_data_dir(),
            archive_retention: default_archive_retention(),
            sweep_interval_seconds: default_sweep_interval(),
        }
    }
}

impl Config {
    /// Check every sensor and the global limits
    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for sensor in &self.sensors {
            sensor.validate().map_err(|e| {
                ExtremesError::Config(format!("sensor '{}': {}", sensor.entity_id, e))
            })?;
            if !seen.insert(sensor.entity_id.as_str()) {
                return Err(ExtremesError::Config(format!(
                    "sensor '{}' is configured more than once",
                    sensor.entity_id
                )));
            }
        }
        if self.archive_retention == 0 {
            return Err(ExtremesError::Config(
                "archive_retention must be at least 1".to_string(),
            ));
        }
        if self.sweep_interval_seconds == 0 {
            return Err(ExtremesError::Config(
                "sweep_interval_seconds must be at least 1".to_string(),
            ));
        }
        self.persistence.validate()
    }

    pub fn sensor(&self, entity_id: &str) -> Option<&SensorConfig> {
        self.sensors.iter().find(|s| s.entity_id == entity_id)
    }
}

/// Per-sensor tracking options
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SensorConfig {
    pub entity_id: String,
    pub name: String,
    #[serde(default)]
    pub unit_of_measurement: Option<String>,
    /// Rolling average window in minutes (1 to 60)
    #[serde(default = "default_averaging_window")]
    pub averaging_window: u32,
    /// Display precision (0 to 3)
    #[serde(default = "default_decimal_places")]
    pub decimal_places: u8,
    /// Offset of the sensor's local time zone, used for period boundaries
    #[serde(default)]
    pub utc_offset_minutes: i32,
}

impl SensorConfig {
    pub fn new(entity_id: impl Into<String>, name: impl Into<String>) -> Result<Self> {
        let config = Self {
            entity_id: entity_id.into(),
            name: name.into(),
            unit_of_measurement: None,
            averaging_window: default_averaging_window(),
            decimal_places: default_decimal_places(),
            utc_offset_minutes: 0,
        };
        config.validate()?;
        Ok(config)
    }

    /// Defaults for a sensor that reports before it was configured
    pub fn for_unconfigured(entity_id: &str) -> Self {
        Self {
            entity_id: entity_id.to_string(),
            name: entity_id.to_string(),
            unit_of_measurement: None,
            averaging_window: default_averaging_window(),
            decimal_places: default_decimal_places(),
            utc_offset_minutes: 0,
        }
    }

    pub fn with_unit(mut self, unit: impl Into<String>) -> Self {
        self.unit_of_measurement = Some(unit.into());
        self
    }

    pub fn with_averaging_window(mut self, minutes: u32) -> Result<Self> {
        validate_window(minutes)?;
        self.averaging_window = minutes;
        Ok(self)
    }

    pub fn with_decimal_places(mut self, places: u8) -> Result<Self> {
        validate_decimal_places(places)?;
        self.decimal_places = places;
        Ok(self)
    }

    pub fn with_utc_offset_minutes(mut self, minutes: i32) -> Result<Self> {
        validate_utc_offset(minutes)?;
        self.utc_offset_minutes = minutes;
        Ok(self)
    }

    pub fn validate(&self) -> Result<()> {
        if self.entity_id.trim().is_empty() {
            return Err(ExtremesError::Config("entity_id must not be empty".to_string()));
        }
        validate_window(self.averaging_window)?;
        validate_decimal_places(self.decimal_places)?;
        validate_utc_offset(self.utc_offset_minutes)
    }

    /// Time zone used for day/week/month/year boundaries
    pub fn offset(&self) -> FixedOffset {
        FixedOffset::east_opt(self.utc_offset_minutes.saturating_mul(60))
            .unwrap_or_else(|| Utc.fix())
    }
}

fn validate_decimal_places(places: u8) -> Result<()> {
    if places > MAX_DECIMAL_PLACES {
        return Err(ExtremesError::InvalidRange(format!(
            "decimal_places must be between 0 and {}, got {}",
            MAX_DECIMAL_PLACES, places
        )));
    }
    Ok(())
}

fn validate_utc_offset(minutes: i32) -> Result<()> {
    if minutes.abs() > MAX_UTC_OFFSET_MINUTES {
        return Err(ExtremesError::InvalidRange(format!(
            "utc_offset_minutes must be within +/-{}, got {}",
            MAX_UTC_OFFSET_MINUTES, minutes
        )));
    }
    Ok(())
}

/// Where and how often the registry is persisted
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistenceConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_state_path")]
    pub path: PathBuf,
    #[serde(default = "default_save_interval")]
    pub save_interval_seconds: u64,
    /// Upper bound on a single load or save
    #[serde(default = "default_io_timeout")]
    pub io_timeout_seconds: u64,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            path: default_state_path(),
            save_interval_seconds: default_save_interval(),
            io_timeout_seconds: default_io_timeout(),
        }
    }
}

impl PersistenceConfig {
    fn validate(&self) -> Result<()> {
        if self.save_interval_seconds == 0 || self.io_timeout_seconds == 0 {
            return Err(ExtremesError::Config(
                "persistence intervals must be at least 1 second".to_string(),
            ));
        }
        Ok(())
    }
}

fn default_true() -> bool {
    true
}

fn default_averaging_window() -> u32 {
    DEFAULT_WINDOW_MINUTES
}

fn default_decimal_places() -> u8 {
    1
}

fn default_state_path() -> PathBuf {
    PathBuf::from("weather_extremes_data.json")
}

fn default_data_dir() -> PathBuf {
    PathBuf::from(".")
}

fn default_archive_retention() -> usize {
    500
}

fn default_sweep_interval() -> u64 {
    60
}

fn default_save_interval() -> u64 {
    3600
}

fn default_io_timeout() -> u64 {
    10
}

/// Load and validate configuration from a JSON file
pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        ExtremesError::Config(format!("Failed to read config file {:?}: {}", path, e))
    })?;
    let config: Config = serde_json::from_str(&content)
        .map_err(|e| ExtremesError::Config(format!("Invalid config file {:?}: {}", path, e)))?;
    config.validate()?;
    Ok(config)
}

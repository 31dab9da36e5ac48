//! File formats for export, import, backup and restore

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::aggregate::SensorSnapshot;
use crate::config::SensorConfig;
use crate::error::{ExtremesError, Result};

pub const BACKUP_VERSION: u32 = 1;

/// Output format of `export_data`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExportFormat {
    Json,
    Csv,
}

impl ExportFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            ExportFormat::Json => "json",
            ExportFormat::Csv => "csv",
        }
    }
}

impl fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

impl FromStr for ExportFormat {
    type Err = ExtremesError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "json" => Ok(ExportFormat::Json),
            "csv" => Ok(ExportFormat::Csv),
            other => Err(ExtremesError::InvalidRange(format!(
                "'{}' is not one of json, csv",
                other
            ))),
        }
    }
}

/// Top level of a JSON export
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportDocument {
    pub exported_at: DateTime<Utc>,
    pub sensors: Vec<SensorSnapshot>,
}

/// A full registry backup, also used as the persisted state file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Backup {
    pub version: u32,
    pub created_at: DateTime<Utc>,
    pub sensors: Vec<SensorSnapshot>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<Vec<SensorConfig>>,
}

impl Backup {
    pub fn sensor_config(&self, sensor_id: &str) -> Option<&SensorConfig> {
        self.config
            .as_ref()
            .and_then(|configs| configs.iter().find(|c| c.entity_id == sensor_id))
    }
}

/// One flattened CSV line
#[derive(Debug, Serialize)]
struct CsvRow<'a> {
    sensor_id: &'a str,
    period: &'static str,
    scope: &'static str,
    statistic: &'static str,
    value: f64,
    timestamp: Option<DateTime<Utc>>,
    period_start: Option<DateTime<Utc>>,
}

pub fn render_json(document: &ExportDocument) -> Result<String> {
    Ok(serde_json::to_string_pretty(document)?)
}

/// One row per (sensor, period, scope, statistic); empty statistics are left out
pub fn render_csv(sensors: &[SensorSnapshot]) -> Result<String> {
    let mut writer = csv::Writer::from_writer(Vec::new());

    for sensor in sensors {
        let current = sensor.periods.values().map(|summary| ("current", summary));
        let archived = sensor.archive.iter().map(|summary| ("archived", summary));

        for (scope, summary) in current.chain(archived) {
            let base = |statistic, value, timestamp| CsvRow {
                sensor_id: &sensor.sensor_id,
                period: summary.period_kind.as_str(),
                scope,
                statistic,
                value,
                timestamp,
                period_start: summary.period_start,
            };
            let mut rows = Vec::with_capacity(3);
            if let Some(high) = summary.high {
                rows.push(base("high", high.value, Some(high.timestamp)));
            }
            if let Some(low) = summary.low {
                rows.push(base("low", low.value, Some(low.timestamp)));
            }
            if let Some(average) = summary.average {
                rows.push(base("average", average, None));
            }
            for row in rows {
                writer.serialize(row).map_err(std::io::Error::from)?;
            }
        }
    }

    let bytes = writer
        .into_inner()
        .map_err(|e| std::io::Error::other(e.to_string()))?;
    String::from_utf8(bytes).map_err(|e| ExtremesError::Parse(e.to_string()))
}

/// Read sensor snapshots from an export, a backup, or a bare sensor object
pub fn parse_import(path: &Path, content: &str) -> Result<Vec<SensorSnapshot>> {
    if has_extension(path, "csv") {
        return Err(ExtremesError::Parse(format!(
            "{}: CSV exports cannot be imported, use a JSON export",
            path.display()
        )));
    }

    let value: serde_json::Value = serde_json::from_str(content)?;
    if value.get("sensors").is_some() {
        #[derive(Deserialize)]
        struct Sensors {
            sensors: Vec<SensorSnapshot>,
        }
        let sensors: Sensors = serde_json::from_value(value)?;
        Ok(sensors.sensors)
    } else {
        Ok(vec![serde_json::from_value(value)?])
    }
}

pub fn parse_backup(content: &str) -> Result<Backup> {
    let backup: Backup = serde_json::from_str(content)?;
    if backup.version > BACKUP_VERSION {
        return Err(ExtremesError::Parse(format!(
            "backup version {} is newer than supported version {}",
            backup.version, BACKUP_VERSION
        )));
    }
    Ok(backup)
}

pub fn default_export_path(dir: &Path, now: DateTime<Utc>, format: ExportFormat) -> PathBuf {
    dir.join(format!(
        "weather_extremes_export_{}.{}",
        now.format("%Y%m%dT%H%M%S"),
        format.extension()
    ))
}

pub fn default_backup_path(dir: &Path, now: DateTime<Utc>) -> PathBuf {
    dir.join(format!(
        "weather_extremes_backup_{}.json",
        now.format("%Y%m%dT%H%M%S")
    ))
}

/// Write `content` to `path`, creating parent directories
pub fn write_file(path: &Path, content: &str) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, content)?;
    Ok(())
}

fn has_extension(path: &Path, extension: &str) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case(extension))
}

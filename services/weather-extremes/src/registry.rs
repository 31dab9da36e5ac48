//! The registry: every tracked sensor and the administrative operations on them
//!
//! Each aggregate sits behind its own mutex and the id map behind an
//! `RwLock`, so readings for different sensors never contend. Single-sensor
//! operations either apply completely or leave the aggregate untouched.
//! Operations that accept an optional sensor id run over every sensor when it
//! is omitted and report one [`SensorOutcome`] per sensor.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::aggregate::{SensorAggregate, SensorSnapshot};
use crate::clock::Clock;
use crate::config::{Config, SensorConfig};
use crate::error::{ExtremesError, Result};
use crate::export::{
    default_backup_path, default_export_path, parse_backup, parse_import, render_csv,
    render_json, write_file, Backup, ExportDocument, ExportFormat, BACKUP_VERSION,
};
use crate::merge::{merge, MergeStrategy};
use crate::period::PeriodKind;
use crate::projection::{project, EntityState};

type SharedAggregate = Arc<Mutex<SensorAggregate>>;

/// Result of a bulk operation for one sensor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SensorOutcome {
    pub sensor_id: String,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl SensorOutcome {
    pub fn succeeded(sensor_id: impl Into<String>, detail: Option<String>) -> Self {
        Self {
            sensor_id: sensor_id.into(),
            success: true,
            error: None,
            detail,
        }
    }

    pub fn failed(sensor_id: impl Into<String>, error: &ExtremesError) -> Self {
        Self {
            sensor_id: sensor_id.into(),
            success: false,
            error: Some(error.to_string()),
            detail: None,
        }
    }
}

pub struct AggregationRegistry {
    sensors: RwLock<HashMap<String, SharedAggregate>>,
    /// Sensors named in the configuration; these survive `clear_history`
    configured: RwLock<HashMap<String, SensorConfig>>,
    archive_retention: usize,
    data_dir: PathBuf,
    clock: Arc<dyn Clock>,
}

impl fmt::Debug for AggregationRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AggregationRegistry")
            .field("sensors", &self.sensor_ids())
            .field("archive_retention", &self.archive_retention)
            .field("data_dir", &self.data_dir)
            .finish_non_exhaustive()
    }
}

impl AggregationRegistry {
    /// Build a registry with an empty aggregate for every configured sensor
    pub fn new(config: &Config, clock: Arc<dyn Clock>) -> Result<Self> {
        config.validate()?;

        let mut sensors = HashMap::new();
        let mut configured = HashMap::new();
        for sensor in &config.sensors {
            let aggregate = SensorAggregate::new(sensor.clone(), config.archive_retention)?;
            sensors.insert(sensor.entity_id.clone(), Arc::new(Mutex::new(aggregate)));
            configured.insert(sensor.entity_id.clone(), sensor.clone());
        }
        info!("Registry created with {} configured sensors", sensors.len());

        Ok(Self {
            sensors: RwLock::new(sensors),
            configured: RwLock::new(configured),
            archive_retention: config.archive_retention,
            data_dir: config.data_dir.clone(),
            clock,
        })
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Add a sensor, or apply a new configuration to one already tracked
    pub fn register(&self, config: SensorConfig) -> Result<()> {
        config.validate()?;
        let id = config.entity_id.clone();

        if let Some(existing) = self.lookup(&id) {
            lock(&existing).reconfigure(config.clone(), self.now())?;
            info!("Reconfigured sensor '{}'", id);
        } else {
            self.get_or_insert(&id, config.clone())?;
        }
        self.configured
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, config);
        Ok(())
    }

    /// Tracked sensor ids, sorted
    pub fn sensor_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .sensors
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        ids.sort();
        ids
    }

    pub fn contains(&self, sensor_id: &str) -> bool {
        self.lookup(sensor_id).is_some()
    }

    /// Copy of one aggregate, taken under its lock
    pub fn snapshot(&self, sensor_id: &str) -> Result<SensorAggregate> {
        let aggregate = self.get(sensor_id)?;
        let copy = lock(&aggregate).clone();
        Ok(copy)
    }

    /// Live reading from a sensor. Unknown sensors start being tracked with
    /// default options.
    pub fn record_reading(
        &self,
        sensor_id: &str,
        value: f64,
        timestamp: DateTime<Utc>,
    ) -> Result<()> {
        if !value.is_finite() {
            return Err(ExtremesError::InvalidValue(format!(
                "{} reported a non-finite value ({})",
                sensor_id, value
            )));
        }
        let aggregate = match self.lookup(sensor_id) {
            Some(aggregate) => aggregate,
            None => self.get_or_insert(sensor_id, self.default_config(sensor_id))?,
        };
        lock(&aggregate).absorb_reading(value, timestamp)?;
        debug!("Recorded {} for '{}' at {}", value, sensor_id, timestamp);
        Ok(())
    }

    /// Feed a value as if it were a live reading; `timestamp` defaults to now
    pub fn update_extremes(
        &self,
        sensor_id: &str,
        value: f64,
        timestamp: Option<DateTime<Utc>>,
    ) -> Result<()> {
        let aggregate = self.get(sensor_id)?;
        let timestamp = timestamp.unwrap_or_else(|| self.now());
        lock(&aggregate).absorb_reading(value, timestamp)?;
        info!("Manually recorded {} for '{}' at {}", value, sensor_id, timestamp);
        Ok(())
    }

    pub fn reset_period(&self, sensor_id: &str, period: PeriodKind) -> Result<()> {
        let aggregate = self.get(sensor_id)?;
        lock(&aggregate).reset_period(period);
        info!("Reset {} period for '{}'", period, sensor_id);
        Ok(())
    }

    /// Drop all tracked data. Configured sensors come back empty, sensors that
    /// were only seen through readings are forgotten.
    pub fn clear_history(&self, sensor_id: Option<&str>) -> Result<Vec<SensorOutcome>> {
        let ids = self.select(sensor_id)?;
        let outcomes = ids
            .into_iter()
            .map(|id| match self.clear_one(&id) {
                Ok(()) => {
                    info!("Cleared history for '{}'", id);
                    SensorOutcome::succeeded(id, None)
                }
                Err(e) => {
                    warn!("Failed to clear history for '{}': {}", id, e);
                    SensorOutcome::failed(id, &e)
                }
            })
            .collect();
        Ok(outcomes)
    }

    pub fn update_averaging_window(&self, sensor_id: &str, window_minutes: u32) -> Result<()> {
        let aggregate = self.get(sensor_id)?;
        lock(&aggregate).resize_window(window_minutes, self.now())?;

        if let Some(config) = self
            .configured
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .get_mut(sensor_id)
        {
            config.averaging_window = window_minutes;
        }
        info!(
            "Averaging window for '{}' set to {} minutes",
            sensor_id, window_minutes
        );
        Ok(())
    }

    /// Remove archived summaries of periods that started before `before`
    pub fn purge_old_data(
        &self,
        sensor_id: Option<&str>,
        before: DateTime<Utc>,
    ) -> Result<Vec<SensorOutcome>> {
        self.for_each(sensor_id, |aggregate| {
            let removed = aggregate.purge_before(before);
            if removed > 0 {
                info!(
                    "Purged {} archived summaries from '{}'",
                    removed,
                    aggregate.sensor_id()
                );
            }
            Ok(Some(format!("removed {} archived summaries", removed)))
        })
    }

    /// Close every period that `now` has moved past, across all sensors
    pub fn sweep_boundaries(&self, now: DateTime<Utc>) -> usize {
        let closed: usize = self
            .aggregates()
            .into_iter()
            .map(|(_, aggregate)| lock(&aggregate).sweep(now))
            .sum();
        if closed > 0 {
            debug!("Boundary sweep closed {} periods", closed);
        }
        closed
    }

    /// Write one sensor, or all of them, to a file. Returns the path written.
    pub fn export_data(
        &self,
        sensor_id: Option<&str>,
        format: ExportFormat,
        path: Option<&Path>,
        period: Option<PeriodKind>,
    ) -> Result<PathBuf> {
        let ids = self.select(sensor_id)?;
        let now = self.now();
        let sensors = self.export_snapshots(&ids, now, period);

        let content = match format {
            ExportFormat::Json => render_json(&ExportDocument {
                exported_at: now,
                sensors,
            })?,
            ExportFormat::Csv => render_csv(&sensors)?,
        };
        let path = path
            .map(Path::to_path_buf)
            .unwrap_or_else(|| default_export_path(&self.data_dir, now, format));
        write_file(&path, &content)?;

        info!("Exported {} sensors as {} to {:?}", ids.len(), format, path);
        Ok(path)
    }

    /// Merge exported data from `file_path` into `sensor_id`
    pub fn import_data(
        &self,
        sensor_id: &str,
        file_path: &Path,
        strategy: MergeStrategy,
    ) -> Result<()> {
        let aggregate = self.get(sensor_id)?;
        let content = std::fs::read_to_string(file_path)?;
        let snapshot = select_snapshot(sensor_id, parse_import(file_path, &content)?)?;

        let mut guard = lock(&aggregate);
        let incoming = SensorAggregate::from_snapshot(
            guard.config().clone(),
            guard.archive_retention(),
            snapshot,
        )?;
        let merged = merge(&guard, &incoming, strategy);
        *guard = merged;

        info!(
            "Imported {:?} into '{}' using {}",
            file_path, sensor_id, strategy
        );
        Ok(())
    }

    /// Everything tracked, optionally with each sensor's configuration
    pub fn to_backup(&self, include_config: bool) -> Backup {
        let now = self.now();
        let aggregates: Vec<SensorAggregate> = self
            .aggregates()
            .into_iter()
            .map(|(_, aggregate)| lock(&aggregate).clone())
            .collect();

        Backup {
            version: BACKUP_VERSION,
            created_at: now,
            sensors: aggregates.iter().map(|a| a.export(now, None)).collect(),
            config: include_config
                .then(|| aggregates.iter().map(|a| a.config().clone()).collect()),
        }
    }

    pub fn backup_data(&self, path: Option<&Path>, include_config: bool) -> Result<PathBuf> {
        let backup = self.to_backup(include_config);
        let path = path
            .map(Path::to_path_buf)
            .unwrap_or_else(|| default_backup_path(&self.data_dir, backup.created_at));
        write_file(&path, &serde_json::to_string_pretty(&backup)?)?;

        info!(
            "Backed up {} sensors to {:?}",
            backup.sensors.len(),
            path
        );
        Ok(path)
    }

    pub fn restore_data(
        &self,
        file_path: &Path,
        restore_config: bool,
        reset_existing: bool,
    ) -> Result<Vec<SensorOutcome>> {
        let content = std::fs::read_to_string(file_path)?;
        let backup = parse_backup(&content)?;
        info!("Restoring {} sensors from {:?}", backup.sensors.len(), file_path);
        Ok(self.restore_backup(backup, restore_config, reset_existing))
    }

    /// Load a backup into the registry.
    ///
    /// With `reset_existing` every aggregate is cleared first; otherwise the
    /// backup is merged in with [`MergeStrategy::Overwrite`]. Sensors already
    /// tracked keep their configuration unless `restore_config` is set, except
    /// for the averaging window, which always comes from the backup.
    pub fn restore_backup(
        &self,
        backup: Backup,
        restore_config: bool,
        reset_existing: bool,
    ) -> Vec<SensorOutcome> {
        if reset_existing {
            for id in self.sensor_ids() {
                if let Err(e) = self.clear_one(&id) {
                    warn!("Failed to clear '{}' before restore: {}", id, e);
                }
            }
        }

        let mut outcomes = Vec::new();
        if restore_config {
            for config in backup.config.iter().flatten() {
                if let Err(e) = self.register(config.clone()) {
                    warn!(
                        "Skipping restored configuration for '{}': {}",
                        config.entity_id, e
                    );
                    outcomes.push(SensorOutcome::failed(config.entity_id.clone(), &e));
                }
            }
        }

        for snapshot in backup.sensors.iter().cloned() {
            let id = snapshot.sensor_id.clone();
            match self.restore_sensor(&backup, snapshot) {
                Ok(()) => outcomes.push(SensorOutcome::succeeded(id, None)),
                Err(e) => {
                    warn!("Failed to restore '{}': {}", id, e);
                    outcomes.push(SensorOutcome::failed(id, &e));
                }
            }
        }
        outcomes
    }

    pub fn projections(&self, sensor_id: &str) -> Result<Vec<EntityState>> {
        let now = self.now();
        let aggregate = self.get(sensor_id)?;
        let entities = project(&lock(&aggregate), now);
        Ok(entities)
    }

    pub fn all_projections(&self) -> Vec<EntityState> {
        let now = self.now();
        self.aggregates()
            .into_iter()
            .flat_map(|(_, aggregate)| project(&lock(&aggregate), now))
            .collect()
    }

    /// The saved averaging window wins over the configured one, so a window
    /// changed at runtime survives a restart.
    fn restore_sensor(&self, backup: &Backup, snapshot: SensorSnapshot) -> Result<()> {
        let id = snapshot.sensor_id.clone();
        let mut config = match self.lookup(&id) {
            Some(aggregate) => {
                let config = lock(&aggregate).config().clone();
                config
            }
            None => backup
                .sensor_config(&id)
                .cloned()
                .unwrap_or_else(|| self.default_config(&id)),
        };
        config.averaging_window = snapshot.rolling.window_minutes;
        let incoming =
            SensorAggregate::from_snapshot(config.clone(), self.archive_retention, snapshot)?;

        let aggregate = self.get_or_insert(&id, config.clone())?;
        {
            let mut guard = lock(&aggregate);
            let mut current = guard.clone();
            if current.rolling().window_minutes() != config.averaging_window {
                current.resize_window(config.averaging_window, self.now())?;
            }
            *guard = merge(&current, &incoming, MergeStrategy::Overwrite);
        }

        if let Some(configured) = self
            .configured
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .get_mut(&id)
        {
            configured.averaging_window = config.averaging_window;
        }
        Ok(())
    }

    fn clear_one(&self, sensor_id: &str) -> Result<()> {
        let configured = self
            .configured
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(sensor_id)
            .cloned();

        match configured {
            Some(config) => {
                let fresh = SensorAggregate::new(config, self.archive_retention)?;
                let aggregate = self.get(sensor_id)?;
                *lock(&aggregate) = fresh;
            }
            None => {
                self.sensors
                    .write()
                    .unwrap_or_else(PoisonError::into_inner)
                    .remove(sensor_id)
                    .ok_or_else(|| ExtremesError::UnknownSensor(sensor_id.to_string()))?;
            }
        }
        Ok(())
    }

    /// Run `op` on one sensor (errors propagate) or on every sensor (errors
    /// become failed outcomes)
    fn for_each(
        &self,
        sensor_id: Option<&str>,
        op: impl Fn(&mut SensorAggregate) -> Result<Option<String>>,
    ) -> Result<Vec<SensorOutcome>> {
        if let Some(id) = sensor_id {
            let aggregate = self.get(id)?;
            let detail = op(&mut lock(&aggregate))?;
            return Ok(vec![SensorOutcome::succeeded(id, detail)]);
        }

        let outcomes = self
            .aggregates()
            .into_iter()
            .map(|(id, aggregate)| match op(&mut lock(&aggregate)) {
                Ok(detail) => SensorOutcome::succeeded(id, detail),
                Err(e) => {
                    warn!("Operation failed for '{}': {}", id, e);
                    SensorOutcome::failed(id, &e)
                }
            })
            .collect();
        Ok(outcomes)
    }

    fn export_snapshots(
        &self,
        ids: &[String],
        now: DateTime<Utc>,
        period: Option<PeriodKind>,
    ) -> Vec<SensorSnapshot> {
        ids.iter()
            .filter_map(|id| self.lookup(id))
            .map(|aggregate| lock(&aggregate).export(now, period))
            .collect()
    }

    /// The requested sensor, or every sensor when `sensor_id` is `None`
    fn select(&self, sensor_id: Option<&str>) -> Result<Vec<String>> {
        match sensor_id {
            Some(id) if self.contains(id) => Ok(vec![id.to_string()]),
            Some(id) => Err(ExtremesError::UnknownSensor(id.to_string())),
            None => Ok(self.sensor_ids()),
        }
    }

    /// Every aggregate, sorted by id
    fn aggregates(&self) -> Vec<(String, SharedAggregate)> {
        let mut aggregates: Vec<(String, SharedAggregate)> = self
            .sensors
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(id, aggregate)| (id.clone(), Arc::clone(aggregate)))
            .collect();
        aggregates.sort_by(|a, b| a.0.cmp(&b.0));
        aggregates
    }

    fn lookup(&self, sensor_id: &str) -> Option<SharedAggregate> {
        self.sensors
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(sensor_id)
            .cloned()
    }

    fn get(&self, sensor_id: &str) -> Result<SharedAggregate> {
        self.lookup(sensor_id)
            .ok_or_else(|| ExtremesError::UnknownSensor(sensor_id.to_string()))
    }

    fn get_or_insert(&self, sensor_id: &str, config: SensorConfig) -> Result<SharedAggregate> {
        let mut sensors = self.sensors.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(existing) = sensors.get(sensor_id) {
            return Ok(Arc::clone(existing));
        }

        let aggregate = Arc::new(Mutex::new(SensorAggregate::new(
            config,
            self.archive_retention,
        )?));
        sensors.insert(sensor_id.to_string(), Arc::clone(&aggregate));
        info!("Tracking new sensor '{}'", sensor_id);
        Ok(aggregate)
    }

    fn default_config(&self, sensor_id: &str) -> SensorConfig {
        self.configured
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(sensor_id)
            .cloned()
            .unwrap_or_else(|| SensorConfig::for_unconfigured(sensor_id))
    }
}

fn lock(aggregate: &Mutex<SensorAggregate>) -> MutexGuard<'_, SensorAggregate> {
    aggregate.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A single entry is imported whatever its id; otherwise the ids must match
fn select_snapshot(sensor_id: &str, mut snapshots: Vec<SensorSnapshot>) -> Result<SensorSnapshot> {
    if snapshots.len() == 1 {
        return Ok(snapshots.remove(0));
    }
    snapshots
        .into_iter()
        .find(|s| s.sensor_id == sensor_id)
        .ok_or_else(|| {
            ExtremesError::Parse(format!("import file has no entry for '{}'", sensor_id))
        })
}

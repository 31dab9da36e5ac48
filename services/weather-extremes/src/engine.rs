//! Engine: feeds readings into the registry, sweeps period boundaries and
//! persists state on a schedule

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, Lines};
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::error::{ExtremesError, Result};
use crate::projection::EntityState;
use crate::publisher::StatePublisher;
use crate::registry::AggregationRegistry;
use crate::store::Store;

/// One state report from a source sensor
#[derive(Debug, Clone, PartialEq)]
pub struct SensorReading {
    pub sensor_id: String,
    pub value: f64,
    /// Defaults to the registry clock when absent
    pub timestamp: Option<DateTime<Utc>>,
}

/// Supplies readings to the engine
#[async_trait]
pub trait ReadingSource: Send {
    /// Next reading, or `None` once the source is exhausted
    async fn next_reading(&mut self) -> Result<Option<SensorReading>>;
}

/// Reads `<sensor_id> <value> [<rfc3339 timestamp>]` lines. Blank lines and
/// `#` comments are ignored; malformed lines are logged and skipped.
pub struct LineReadingSource<R> {
    lines: Lines<R>,
    line_number: usize,
}

impl<R: AsyncBufRead + Unpin + Send> LineReadingSource<R> {
    pub fn new(reader: R) -> Self {
        Self {
            lines: reader.lines(),
            line_number: 0,
        }
    }
}

#[async_trait]
impl<R: AsyncBufRead + Unpin + Send> ReadingSource for LineReadingSource<R> {
    async fn next_reading(&mut self) -> Result<Option<SensorReading>> {
        while let Some(line) = self.lines.next_line().await? {
            self.line_number += 1;
            match parse_line(&line) {
                Ok(Some(reading)) => return Ok(Some(reading)),
                Ok(None) => {}
                Err(e) => tracing::warn!("Skipping line {}: {}", self.line_number, e),
            }
        }
        Ok(None)
    }
}

/// Parse one input line. `Ok(None)` for blank lines and comments.
pub fn parse_line(line: &str) -> Result<Option<SensorReading>> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return Ok(None);
    }

    let mut fields = line.split_whitespace();
    let (Some(sensor_id), Some(raw_value)) = (fields.next(), fields.next()) else {
        return Err(ExtremesError::Parse(format!(
            "expected '<sensor_id> <value> [timestamp]', got '{}'",
            line
        )));
    };

    if matches!(raw_value, "unknown" | "unavailable") {
        return Err(ExtremesError::InvalidValue(format!(
            "{} is {}",
            sensor_id, raw_value
        )));
    }
    let value: f64 = raw_value.parse().map_err(|_| {
        ExtremesError::InvalidValue(format!("{}: '{}' is not a number", sensor_id, raw_value))
    })?;
    if !value.is_finite() {
        return Err(ExtremesError::InvalidValue(format!(
            "{}: '{}' is not finite",
            sensor_id, raw_value
        )));
    }

    let timestamp = fields
        .next()
        .map(|raw| {
            DateTime::parse_from_rfc3339(raw)
                .map(|ts| ts.with_timezone(&Utc))
                .map_err(|e| ExtremesError::Parse(format!("timestamp '{}': {}", raw, e)))
        })
        .transpose()?;

    if let Some(extra) = fields.next() {
        return Err(ExtremesError::Parse(format!(
            "unexpected trailing field '{}'",
            extra
        )));
    }

    Ok(Some(SensorReading {
        sensor_id: sensor_id.to_string(),
        value,
        timestamp,
    }))
}

/// The engine owns the service loop around a registry
pub struct Engine {
    registry: Arc<AggregationRegistry>,
    store: Arc<dyn Store>,
    publisher: Arc<dyn StatePublisher>,
    sweep_interval: Duration,
    save_interval: Duration,
    cancel: CancellationToken,
}

impl Engine {
    pub fn new(
        registry: Arc<AggregationRegistry>,
        store: Arc<dyn Store>,
        publisher: Arc<dyn StatePublisher>,
        config: &Config,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            registry,
            store,
            publisher,
            sweep_interval: Duration::from_secs(config.sweep_interval_seconds),
            save_interval: Duration::from_secs(config.persistence.save_interval_seconds),
            cancel,
        }
    }

    pub fn registry(&self) -> &Arc<AggregationRegistry> {
        &self.registry
    }

    /// Load saved state into the registry. Returns the number of sensors
    /// restored.
    pub async fn restore(&self) -> Result<usize> {
        let Some(backup) = self.store.load().await? else {
            tracing::info!("No saved state found, starting empty");
            return Ok(0);
        };
        let outcomes = self.registry.restore_backup(backup, false, false);
        let restored = outcomes.iter().filter(|o| o.success).count();
        tracing::info!("Restored {} of {} sensors", restored, outcomes.len());
        Ok(restored)
    }

    /// Persist the whole registry
    pub async fn save(&self) -> Result<()> {
        let backup = self.registry.to_backup(true);
        self.store.save(&backup).await
    }

    /// Record one reading and publish the sensor's entities. Rejected readings
    /// are logged and dropped.
    pub async fn handle_reading(&self, reading: SensorReading) {
        let timestamp = reading.timestamp.unwrap_or_else(|| self.registry.now());
        if let Err(e) = self
            .registry
            .record_reading(&reading.sensor_id, reading.value, timestamp)
        {
            tracing::warn!("Rejected reading for '{}': {}", reading.sensor_id, e);
            return;
        }

        match self.registry.projections(&reading.sensor_id) {
            Ok(states) => self.publish(&states).await,
            Err(e) => tracing::warn!("No projections for '{}': {}", reading.sensor_id, e),
        }
    }

    /// Close elapsed periods and republish everything if anything closed
    pub async fn sweep(&self) -> usize {
        let closed = self.registry.sweep_boundaries(self.registry.now());
        if closed > 0 {
            tracing::info!("Closed {} elapsed periods", closed);
            self.publish(&self.registry.all_projections()).await;
        }
        closed
    }

    /// Run until cancelled or until the source is exhausted, then save.
    pub async fn run<S>(&self, source: &mut S) -> Result<()>
    where
        S: ReadingSource + ?Sized,
    {
        let mut sweep = tokio::time::interval(self.sweep_interval);
        let mut save = tokio::time::interval(self.save_interval);
        // Both intervals fire immediately; skip that first tick
        sweep.tick().await;
        save.tick().await;

        self.publish(&self.registry.all_projections()).await;
        tracing::info!("Engine started");

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    tracing::debug!("Engine cancelled");
                    break;
                }
                reading = source.next_reading() => match reading {
                    Ok(Some(reading)) => self.handle_reading(reading).await,
                    Ok(None) => {
                        tracing::info!("Reading source closed");
                        break;
                    }
                    Err(e) => {
                        tracing::error!("Reading source failed: {}", e);
                        break;
                    }
                },
                _ = sweep.tick() => {
                    self.sweep().await;
                }
                _ = save.tick() => {
                    if let Err(e) = self.save().await {
                        tracing::warn!("Periodic save failed: {}", e);
                    }
                }
            }
        }

        let result = self.save().await;
        if let Err(e) = &result {
            tracing::warn!("Final save failed: {}", e);
        }
        tracing::info!("Engine stopped");
        result
    }

    async fn publish(&self, states: &[EntityState]) {
        if let Err(e) = self.publisher.publish(states).await {
            tracing::warn!("Failed to publish {} entities: {}", states.len(), e);
        }
    }
}

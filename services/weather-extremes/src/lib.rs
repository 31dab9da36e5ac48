//! Weather Extremes - per-sensor high/low/average tracking
//!
//! Tracks highs, lows and averages over day, week, month, year and all time,
//! plus a short rolling average, for any number of numeric sensors.

pub mod aggregate;
pub mod clock;
pub mod config;
pub mod engine;
pub mod error;
pub mod export;
pub mod merge;
pub mod period;
pub mod projection;
pub mod publisher;
pub mod registry;
pub mod rolling;
pub mod store;

pub use aggregate::{SensorAggregate, SensorSnapshot};
pub use config::{load_config, Config, SensorConfig};
pub use error::{ExtremesError, Result};
pub use export::{Backup, ExportFormat};
pub use merge::MergeStrategy;
pub use period::{ExtremeRecord, PeriodKind, PeriodSummary};
pub use registry::{AggregationRegistry, SensorOutcome};

use std::sync::Arc;

use tokio::io::BufReader;
use tokio_util::sync::CancellationToken;

use crate::clock::SystemClock;
use crate::engine::{Engine, LineReadingSource};
use crate::publisher::LogPublisher;

/// Run the service: restore saved state, then record readings from stdin
/// until it closes or Ctrl-C is pressed
pub async fn run(config: Config) -> Result<()> {
    let registry = Arc::new(AggregationRegistry::new(&config, Arc::new(SystemClock))?);
    let store: Arc<dyn store::Store> = Arc::from(store::store_for(&config.persistence));
    let cancel = CancellationToken::new();

    let engine = Engine::new(
        registry,
        store,
        Arc::new(LogPublisher),
        &config,
        cancel.clone(),
    );

    if let Err(e) = engine.restore().await {
        tracing::warn!("Could not restore saved state, starting empty: {}", e);
    }

    let cancel_for_signal = cancel.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for ctrl-c: {}", e);
            return;
        }
        tracing::info!("Shutdown signal received");
        cancel_for_signal.cancel();
    });

    let mut source = LineReadingSource::new(BufReader::new(tokio::io::stdin()));
    engine.run(&mut source).await
}

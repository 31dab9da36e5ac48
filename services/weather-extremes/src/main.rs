//! Weather Extremes CLI
//!
//! Runs the tracking service, or performs one administrative operation on the
//! saved state and prints the outcome as JSON.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use clap::{Parser, Subcommand};
use serde_json::json;
use tracing::{debug, info, Level};
use weather_extremes::clock::SystemClock;
use weather_extremes::store::store_for;
use weather_extremes::{
    load_config, AggregationRegistry, Config, ExportFormat, ExtremesError, MergeStrategy,
    PeriodKind,
};

#[derive(Parser)]
#[command(name = "weather-extremes")]
#[command(about = "Track highs, lows and averages of numeric sensors over time")]
#[command(version)]
struct Args {
    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log level
    #[arg(short, long, default_value = "info")]
    log_level: Level,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Read "<sensor_id> <value> [timestamp]" lines from stdin until it closes
    Run,

    /// Print the projected entities of one sensor, or of all sensors
    Show {
        sensor_id: Option<String>,
    },

    /// Record a value as if it came from the sensor
    Ingest {
        sensor_id: String,

        #[arg(allow_hyphen_values = true)]
        value: f64,

        /// RFC 3339 timestamp (default: now)
        #[arg(long)]
        timestamp: Option<DateTime<Utc>>,
    },

    /// Empty one period (day, week, month, year, all_time)
    ResetPeriod { sensor_id: String, period: String },

    /// Delete tracked data of one sensor, or of all sensors
    Clear { sensor_id: Option<String> },

    /// Write tracked data to a file
    Export {
        #[arg(long)]
        sensor_id: Option<String>,

        /// json or csv
        #[arg(long, default_value = "json")]
        format: String,

        /// Output file (default: timestamped file in data_dir)
        #[arg(long)]
        path: Option<PathBuf>,

        /// Only export this period
        #[arg(long)]
        period: Option<String>,
    },

    /// Merge a JSON export into a sensor
    Import {
        sensor_id: String,

        file: PathBuf,

        /// keep_existing, overwrite or keep_extreme
        #[arg(long)]
        strategy: String,
    },

    /// Change the rolling average window (1 to 60 minutes)
    Window { sensor_id: String, minutes: u32 },

    /// Remove archived summaries of periods starting before a date
    Purge {
        /// RFC 3339 timestamp or YYYY-MM-DD (midnight UTC)
        before: String,

        #[arg(long)]
        sensor_id: Option<String>,
    },

    /// Write a backup of everything tracked
    Backup {
        /// Output file (default: timestamped file in data_dir)
        path: Option<PathBuf>,

        /// Include each sensor's configuration
        #[arg(long)]
        include_config: bool,
    },

    /// Load a backup
    Restore {
        file: PathBuf,

        /// Also apply the configuration stored in the backup
        #[arg(long)]
        restore_config: bool,

        /// Clear all tracked data before loading
        #[arg(long)]
        reset_existing: bool,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // stdout carries command output
    tracing_subscriber::fmt()
        .with_max_level(args.log_level)
        .with_writer(std::io::stderr)
        .init();

    debug!(
        "Parsed command line arguments: config={:?}, log_level={:?}",
        args.config, args.log_level
    );

    let config = if let Some(config_path) = &args.config {
        debug!("Loading configuration from {:?}", config_path);
        load_config(config_path)?
    } else {
        debug!("Using default configuration");
        Config::default()
    };

    if let Commands::Run = args.command {
        info!(
            "Starting weather extremes service with {} configured sensors",
            config.sensors.len()
        );
        weather_extremes::run(config).await?;
        return Ok(());
    }

    let registry = AggregationRegistry::new(&config, Arc::new(SystemClock))?;
    let store = store_for(&config.persistence);
    if let Some(backup) = store.load().await? {
        registry.restore_backup(backup, false, false);
    }

    let (output, changed) = execute(&registry, args.command)?;
    if changed {
        store.save(&registry.to_backup(true)).await?;
    }
    println!("{}", serde_json::to_string_pretty(&output)?);

    Ok(())
}

/// Perform one administrative command. Returns the JSON outcome and whether
/// tracked state changed.
fn execute(
    registry: &AggregationRegistry,
    command: Commands,
) -> weather_extremes::Result<(serde_json::Value, bool)> {
    let result = match command {
        Commands::Run => {
            return Err(ExtremesError::Config(
                "'run' is not a one-shot command".to_string(),
            ))
        }
        Commands::Show { sensor_id } => {
            let entities = match sensor_id {
                Some(id) => registry.projections(&id)?,
                None => registry.all_projections(),
            };
            (serde_json::to_value(entities)?, false)
        }
        Commands::Ingest {
            sensor_id,
            value,
            timestamp,
        } => {
            registry.update_extremes(&sensor_id, value, timestamp)?;
            (json!({ "sensor_id": sensor_id, "success": true }), true)
        }
        Commands::ResetPeriod { sensor_id, period } => {
            let period: PeriodKind = period.parse()?;
            registry.reset_period(&sensor_id, period)?;
            (
                json!({ "sensor_id": sensor_id, "period": period, "success": true }),
                true,
            )
        }
        Commands::Clear { sensor_id } => {
            let outcomes = registry.clear_history(sensor_id.as_deref())?;
            (serde_json::to_value(outcomes)?, true)
        }
        Commands::Export {
            sensor_id,
            format,
            path,
            period,
        } => {
            let format: ExportFormat = format.parse()?;
            let period = period.map(|p| p.parse::<PeriodKind>()).transpose()?;
            let written =
                registry.export_data(sensor_id.as_deref(), format, path.as_deref(), period)?;
            (json!({ "path": written, "success": true }), false)
        }
        Commands::Import {
            sensor_id,
            file,
            strategy,
        } => {
            let strategy: MergeStrategy = strategy.parse()?;
            registry.import_data(&sensor_id, &file, strategy)?;
            (
                json!({ "sensor_id": sensor_id, "strategy": strategy, "success": true }),
                true,
            )
        }
        Commands::Window { sensor_id, minutes } => {
            registry.update_averaging_window(&sensor_id, minutes)?;
            (
                json!({ "sensor_id": sensor_id, "averaging_window": minutes, "success": true }),
                true,
            )
        }
        Commands::Purge { before, sensor_id } => {
            let before = parse_before(&before)?;
            let outcomes = registry.purge_old_data(sensor_id.as_deref(), before)?;
            (serde_json::to_value(outcomes)?, true)
        }
        Commands::Backup {
            path,
            include_config,
        } => {
            let written = registry.backup_data(path.as_deref(), include_config)?;
            (json!({ "path": written, "success": true }), false)
        }
        Commands::Restore {
            file,
            restore_config,
            reset_existing,
        } => {
            let outcomes = registry.restore_data(&file, restore_config, reset_existing)?;
            (serde_json::to_value(outcomes)?, true)
        }
    };
    Ok(result)
}

/// RFC 3339 timestamp, or a bare date meaning midnight UTC
fn parse_before(raw: &str) -> weather_extremes::Result<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Ok(ts.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .map(|date| date.and_time(chrono::NaiveTime::MIN).and_utc())
        .map_err(|e| ExtremesError::Parse(format!("'{}' is not a date: {}", raw, e)))
}

//! Persistence of the registry between runs

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;

use crate::config::PersistenceConfig;
use crate::error::{ExtremesError, Result};
use crate::export::{parse_backup, Backup};

/// Where registry state is loaded from and saved to
#[async_trait]
#[cfg_attr(test, mockall::automock)]
pub trait Store: Send + Sync {
    /// Load the last saved state, `None` if nothing was saved yet
    async fn load(&self) -> Result<Option<Backup>>;

    async fn save(&self, backup: &Backup) -> Result<()>;
}

/// JSON file store. Saves write a temporary file next to the target and
/// rename it into place.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
    timeout: Duration,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            path: path.into(),
            timeout,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }

    async fn bounded<T>(
        &self,
        operation: &str,
        future: impl std::future::Future<Output = Result<T>>,
    ) -> Result<T> {
        tokio::time::timeout(self.timeout, future)
            .await
            .map_err(|_| {
                ExtremesError::Io(std::io::Error::new(
                    ErrorKind::TimedOut,
                    format!(
                        "{} of {:?} did not finish within {:?}",
                        operation, self.path, self.timeout
                    ),
                ))
            })?
    }

    async fn read_state(&self) -> Result<Option<Backup>> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                tracing::debug!("No saved state at {:?}", self.path);
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };
        let backup = parse_backup(&content)?;
        tracing::debug!(
            "Loaded {} sensors from {:?}",
            backup.sensors.len(),
            self.path
        );
        Ok(Some(backup))
    }

    async fn write_state(&self, content: String) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let temp = self.temp_path();
        tokio::fs::write(&temp, content.as_bytes()).await?;
        tokio::fs::rename(&temp, &self.path).await?;
        Ok(())
    }
}

#[async_trait]
impl Store for JsonFileStore {
    async fn load(&self) -> Result<Option<Backup>> {
        self.bounded("load", self.read_state()).await
    }

    async fn save(&self, backup: &Backup) -> Result<()> {
        let content = serde_json::to_string(backup)?;
        self.bounded("save", self.write_state(content)).await?;
        tracing::debug!(
            "Saved {} sensors to {:?}",
            backup.sensors.len(),
            self.path
        );
        Ok(())
    }
}

/// Store used when persistence is disabled
#[derive(Debug, Default, Clone, Copy)]
pub struct NullStore;

#[async_trait]
impl Store for NullStore {
    async fn load(&self) -> Result<Option<Backup>> {
        Ok(None)
    }

    async fn save(&self, _backup: &Backup) -> Result<()> {
        Ok(())
    }
}

/// Pick the store for a persistence configuration
pub fn store_for(config: &PersistenceConfig) -> Box<dyn Store> {
    if config.enabled {
        Box::new(JsonFileStore::new(
            config.path.clone(),
            Duration::from_secs(config.io_timeout_seconds),
        ))
    } else {
        Box::new(NullStore)
    }
}

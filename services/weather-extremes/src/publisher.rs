//! Where projected entity states are sent

use async_trait::async_trait;

use crate::projection::EntityState;

/// Receives the projected entities of a sensor after it changes
#[async_trait]
#[cfg_attr(test, mockall::automock)]
pub trait StatePublisher: Send + Sync {
    async fn publish(&self, states: &[EntityState]) -> crate::Result<()>;
}

/// Publisher that writes each entity to the log
#[derive(Debug, Default, Clone, Copy)]
pub struct LogPublisher;

#[async_trait]
impl StatePublisher for LogPublisher {
    async fn publish(&self, states: &[EntityState]) -> crate::Result<()> {
        for state in states {
            match state.state {
                Some(value) => tracing::info!(
                    "{} = {}{}",
                    state.entity_id,
                    value,
                    state
                        .attributes
                        .unit_of_measurement
                        .as_deref()
                        .map(|unit| format!(" {}", unit))
                        .unwrap_or_default()
                ),
                None => tracing::debug!("{} has no value yet", state.entity_id),
            }
        }
        Ok(())
    }
}

//! External player state: the trait the polling loop talks to, plus the
//! Home Assistant adapter.

pub mod homeassistant;
pub mod snapshot;

pub use homeassistant::HomeAssistant;

use crate::state::PlayerSnapshot;
use async_trait::async_trait;
use thiserror::Error;

/// Errors that can occur while asking the source for player state.
#[derive(Error, Debug)]
pub enum SourceError {
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("Unexpected HTTP status {0}")]
    Status(reqwest::StatusCode),
    #[error("Malformed state payload: {0}")]
    Malformed(String),
    #[error("No API token configured")]
    MissingToken,
}

impl SourceError {
    /// Missing credentials back off to a longer interval instead of retrying every tick.
    pub fn needs_backoff(&self) -> bool {
        matches!(self, SourceError::MissingToken)
    }
}

#[async_trait]
pub trait StateSource: Send + Sync {
    async fn fetch(&self, entity_id: &str) -> Result<PlayerSnapshot, SourceError>;
}

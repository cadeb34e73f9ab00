//! Engine configuration.
//!
//! Every field has a default, so an empty JSON object is a valid config:
//!
//! ```
//! use linksync_core::SyncConfig;
//!
//! let config: SyncConfig = serde_json::from_str("{}").unwrap();
//! assert_eq!(config.drain_interval_secs, 30);
//!
//! let config: SyncConfig =
//!     serde_json::from_str(r#"{"display_name": "laptop", "backoff_factor": 1.5}"#).unwrap();
//! assert_eq!(config.display_name, "laptop");
//! ```

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::error::{SyncError, SyncResult};

#[derive(Debug, Clone, Deserialize)]
pub struct SyncConfig {
    /// Human-readable client name carried in the correlation token
    #[serde(default = "default_display_name")]
    pub display_name: String,

    /// Seconds between periodic drain passes while online
    #[serde(default = "default_drain_interval_secs")]
    pub drain_interval_secs: u64,

    /// Reconnect backoff
    #[serde(default = "default_backoff_initial_ms")]
    pub backoff_initial_ms: u64,
    #[serde(default = "default_backoff_max_secs")]
    pub backoff_max_secs: u64,
    #[serde(default = "default_backoff_factor")]
    pub backoff_factor: f64,

    /// Capacity of the [`SyncEvent`](crate::SyncEvent) broadcast channel
    #[serde(default = "default_event_channel_capacity")]
    pub event_channel_capacity: usize,
}

fn default_display_name() -> String {
    "linksync".to_string()
}
fn default_drain_interval_secs() -> u64 {
    30
}
fn default_backoff_initial_ms() -> u64 {
    500
}
fn default_backoff_max_secs() -> u64 {
    60
}
fn default_backoff_factor() -> f64 {
    2.0
}
fn default_event_channel_capacity() -> usize {
    256
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            display_name: default_display_name(),
            drain_interval_secs: default_drain_interval_secs(),
            backoff_initial_ms: default_backoff_initial_ms(),
            backoff_max_secs: default_backoff_max_secs(),
            backoff_factor: default_backoff_factor(),
            event_channel_capacity: default_event_channel_capacity(),
        }
    }
}

impl SyncConfig {
    /// Read a JSON config file.
    pub fn load(path: impl AsRef<Path>) -> SyncResult<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)?;
        serde_json::from_str(&raw)
            .map_err(|e| SyncError::Config(format!("{}: {}", path.display(), e)))
    }

    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = name.into();
        self
    }

    pub fn drain_interval(&self) -> Duration {
        Duration::from_secs(self.drain_interval_secs.max(1))
    }

    pub fn backoff_initial(&self) -> Duration {
        Duration::from_millis(self.backoff_initial_ms)
    }

    pub fn backoff_max(&self) -> Duration {
        Duration::from_secs(self.backoff_max_secs)
    }
}

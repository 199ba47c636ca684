use crate::events::EventKind;
use crate::{Error, Result};
use moonlink_rpc::{Endpoint, SessionConfig};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Main configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[serde(default)]
    pub moonraker: MoonrakerConfig,

    #[serde(default)]
    pub notifications: NotificationsConfig,
}

impl Config {
    /// Load config from file.
    ///
    /// A missing file yields the defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or contains invalid JSON.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)?;
        super::validation::warn_unknown_fields(&content, "config.json");
        let config = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// Save config to file.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails or the file cannot be written.
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

/// Controller connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MoonrakerConfig {
    /// `host` or `host:port`
    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    #[serde(default = "default_reconnect_interval")]
    pub reconnect_interval_secs: u64,

    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval_secs: u64,
}

fn default_endpoint() -> String {
    "localhost:7125".to_string()
}
fn default_reconnect_interval() -> u64 {
    10
}
fn default_heartbeat_interval() -> u64 {
    5
}

impl Default for MoonrakerConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            reconnect_interval_secs: default_reconnect_interval(),
            heartbeat_interval_secs: default_heartbeat_interval(),
        }
    }
}

impl MoonrakerConfig {
    /// Parse the configured endpoint.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` if the endpoint is not `host` or `host:port`.
    pub fn endpoint(&self) -> Result<Endpoint> {
        self.endpoint
            .parse()
            .map_err(|e: moonlink_rpc::Error| Error::Config(e.to_string()))
    }

    #[must_use]
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            reconnect_interval: Duration::from_secs(self.reconnect_interval_secs.max(1)),
            heartbeat_interval: Duration::from_secs(self.heartbeat_interval_secs.max(1)),
        }
    }
}

/// Which derived events the watcher reports
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationsConfig {
    #[serde(default = "default_events")]
    pub events: Vec<EventKind>,
}

fn default_events() -> Vec<EventKind> {
    EventKind::ALL.to_vec()
}

impl Default for NotificationsConfig {
    fn default() -> Self {
        Self {
            events: default_events(),
        }
    }
}

impl NotificationsConfig {
    #[must_use]
    pub fn is_enabled(&self, kind: EventKind) -> bool {
        self.events.contains(&kind)
    }
}

//! Settings type definitions.
//!
//! All types use `#[serde(rename_all = "camelCase")]` for the JSON file
//! format and `#[serde(default)]` so partial files are accepted.

mod hub;
mod logging;
mod server;

pub use hub::*;
pub use logging::*;
pub use server::*;

use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Root settings type.
///
/// ```json
/// {
///   "server": { "port": 9000 },
///   "hub": { "sendQueueCapacity": 64, "overflowPolicy": "disconnect" },
///   "logging": { "level": "debug" }
/// }
/// ```
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ChatHubSettings {
    /// HTTP/WebSocket listener settings.
    pub server: ServerSettings,
    /// Hub fan-out and per-client queue settings.
    pub hub: HubSettings,
    /// Logging configuration.
    pub logging: LoggingSettings,
}

impl ChatHubSettings {
    /// Reject values the hub cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.server.max_connections == 0 {
            return Err(SettingsError::InvalidValue(
                "server.maxConnections must be greater than 0".into(),
            ));
        }
        if self.hub.send_queue_capacity == 0 {
            return Err(SettingsError::InvalidValue(
                "hub.sendQueueCapacity must be greater than 0".into(),
            ));
        }
        if self.hub.max_message_size == 0 {
            return Err(SettingsError::InvalidValue(
                "hub.maxMessageSize must be greater than 0".into(),
            ));
        }
        if self.hub.read_idle_timeout_secs == Some(0) {
            return Err(SettingsError::InvalidValue(
                "hub.readIdleTimeoutSecs must be greater than 0 when set".into(),
            ));
        }
        Ok(())
    }
}

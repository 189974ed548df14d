//! Runtime configuration for the hub and the listener.

use std::time::Duration;

use chathub_settings::{HubSettings, ServerSettings};

pub use chathub_settings::OverflowPolicy;

/// Hub fan-out and client lifecycle configuration.
#[derive(Clone, Debug)]
pub struct HubConfig {
    /// Capacity of each client's outbound queue.
    pub send_queue_capacity: usize,
    /// Action taken when a recipient's queue is full.
    pub overflow_policy: OverflowPolicy,
    /// Skip the sender when fanning out its own message.
    pub exclude_sender: bool,
    /// Largest inbound frame accepted, in bytes.
    pub max_message_size: usize,
    /// Close a client that sends nothing for this long.
    pub read_idle_timeout: Option<Duration>,
    /// Upper bound on draining a closing client's queue.
    pub flush_timeout: Duration,
    /// Upper bound on waiting for client tasks during hub shutdown.
    pub shutdown_timeout: Duration,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self::from(&HubSettings::default())
    }
}

impl From<&HubSettings> for HubConfig {
    fn from(s: &HubSettings) -> Self {
        Self {
            send_queue_capacity: s.send_queue_capacity.max(1),
            overflow_policy: s.overflow_policy,
            exclude_sender: s.exclude_sender,
            max_message_size: s.max_message_size,
            read_idle_timeout: s.read_idle_timeout(),
            flush_timeout: s.flush_timeout(),
            shutdown_timeout: s.shutdown_timeout(),
        }
    }
}

/// Listener configuration.
#[derive(Clone, Debug)]
pub struct ServerConfig {
    /// Interface to bind.
    pub host: String,
    /// Port to bind (`0` to auto-assign).
    pub port: u16,
    /// Maximum concurrent WebSocket clients.
    pub max_connections: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::from(&ServerSettings::default())
    }
}

impl From<&ServerSettings> for ServerConfig {
    fn from(s: &ServerSettings) -> Self {
        Self {
            host: s.host.clone(),
            port: s.port,
            max_connections: s.max_connections,
        }
    }
}

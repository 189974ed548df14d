//! Hub settings.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// What broadcast does when a recipient's outbound queue is full.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OverflowPolicy {
    /// Drop the message for that recipient only and record the drop.
    #[default]
    Drop,
    /// Unregister the slow recipient and close its connection.
    Disconnect,
}

impl OverflowPolicy {
    /// Lowercase name as used in settings and logs.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Drop => "drop",
            Self::Disconnect => "disconnect",
        }
    }
}

/// Fan-out and per-client queue settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HubSettings {
    /// Capacity of each client's outbound queue.
    pub send_queue_capacity: usize,
    /// Action taken when a recipient's queue is full.
    pub overflow_policy: OverflowPolicy,
    /// Skip the sender when fanning out its own message.
    pub exclude_sender: bool,
    /// Largest inbound frame accepted, in bytes.
    pub max_message_size: usize,
    /// Close a client that sends nothing for this long. Unset disables it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub read_idle_timeout_secs: Option<u64>,
    /// How long a closing client may spend flushing its queue.
    pub flush_timeout_ms: u64,
    /// How long hub shutdown waits for client tasks to exit.
    pub shutdown_timeout_secs: u64,
}

impl Default for HubSettings {
    fn default() -> Self {
        Self {
            send_queue_capacity: 256,
            overflow_policy: OverflowPolicy::Drop,
            exclude_sender: true,
            max_message_size: 64 * 1024,
            read_idle_timeout_secs: None,
            flush_timeout_ms: 2_000,
            shutdown_timeout_secs: 10,
        }
    }
}

impl HubSettings {
    /// Read idle timeout as a `Duration`.
    pub fn read_idle_timeout(&self) -> Option<Duration> {
        self.read_idle_timeout_secs.map(Duration::from_secs)
    }

    /// Flush timeout as a `Duration`.
    pub fn flush_timeout(&self) -> Duration {
        Duration::from_millis(self.flush_timeout_ms)
    }

    /// Shutdown timeout as a `Duration`.
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_values() {
        let s = HubSettings::default();
        assert_eq!(s.send_queue_capacity, 256);
        assert_eq!(s.overflow_policy, OverflowPolicy::Drop);
        assert!(s.exclude_sender);
        assert_eq!(s.max_message_size, 65_536);
        assert!(s.read_idle_timeout().is_none());
        assert_eq!(s.flush_timeout(), Duration::from_secs(2));
        assert_eq!(s.shutdown_timeout(), Duration::from_secs(10));
    }

    #[test]
    fn policy_serde_lowercase() {
        assert_eq!(
            serde_json::to_string(&OverflowPolicy::Disconnect).unwrap(),
            "\"disconnect\""
        );
        let p: OverflowPolicy = serde_json::from_str("\"drop\"").unwrap();
        assert_eq!(p, OverflowPolicy::Drop);
        assert!(serde_json::from_str::<OverflowPolicy>("\"block\"").is_err());
    }

    #[test]
    fn policy_as_str() {
        assert_eq!(OverflowPolicy::Drop.as_str(), "drop");
        assert_eq!(OverflowPolicy::Disconnect.as_str(), "disconnect");
    }

    #[test]
    fn idle_timeout_omitted_when_unset() {
        let json = serde_json::to_value(HubSettings::default()).unwrap();
        assert!(json.get("readIdleTimeoutSecs").is_none());
    }
}

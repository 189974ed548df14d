//! Listener settings.

use serde::{Deserialize, Serialize};

/// HTTP/WebSocket listener settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    /// Interface to bind.
    pub host: String,
    /// Port to bind (`0` to auto-assign).
    pub port: u16,
    /// Maximum concurrent WebSocket clients.
    pub max_connections: usize,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 8080,
            max_connections: 1000,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_values() {
        let s = ServerSettings::default();
        assert_eq!(s.host, "0.0.0.0");
        assert_eq!(s.port, 8080);
        assert_eq!(s.max_connections, 1000);
    }

    #[test]
    fn deserialize_camel_case() {
        let s: ServerSettings =
            serde_json::from_str(r#"{"host":"127.0.0.1","maxConnections":5}"#).unwrap();
        assert_eq!(s.host, "127.0.0.1");
        assert_eq!(s.max_connections, 5);
        assert_eq!(s.port, 8080);
    }
}

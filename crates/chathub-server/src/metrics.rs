//! Prometheus recorder and metric names.

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tracing::info;

use crate::errors::ServerError;

/// Install the global Prometheus recorder.
///
/// Returns the handle used to render `/metrics`. Call once at startup.
pub fn install_recorder() -> Result<PrometheusHandle, ServerError> {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| ServerError::Metrics(e.to_string()))?;
    info!("prometheus metrics recorder installed");
    Ok(handle)
}

/// Registered clients (gauge).
pub const HUB_CLIENTS_ACTIVE: &str = "hub_clients_active";
/// Successful registrations (counter).
pub const HUB_REGISTRATIONS_TOTAL: &str = "hub_registrations_total";
/// Removals from the registry (counter, labels: reason).
pub const HUB_UNREGISTRATIONS_TOTAL: &str = "hub_unregistrations_total";
/// Messages fanned out (counter).
pub const HUB_MESSAGES_BROADCAST_TOTAL: &str = "hub_messages_broadcast_total";
/// Messages enqueued to a recipient (counter).
pub const HUB_DELIVERIES_TOTAL: &str = "hub_deliveries_total";
/// Messages dropped because a recipient queue was full (counter).
pub const HUB_BROADCAST_DROPS_TOTAL: &str = "hub_broadcast_drops_total";
/// Recipients disconnected for falling behind (counter).
pub const HUB_SLOW_CLIENT_DISCONNECTS_TOTAL: &str = "hub_slow_client_disconnects_total";
/// Duplicate registrations and unknown unregistrations (counter).
pub const HUB_REGISTRY_INCONSISTENCIES_TOTAL: &str = "hub_registry_inconsistencies_total";
/// Time a client spent connected (histogram).
pub const CLIENT_SESSION_DURATION_SECONDS: &str = "client_session_duration_seconds";
/// WebSocket upgrades refused (counter, labels: reason).
pub const WS_CONNECTIONS_REJECTED_TOTAL: &str = "ws_connections_rejected_total";

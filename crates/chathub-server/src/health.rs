//! `/health` endpoint body.

use std::time::Instant;

use serde::Serialize;

use crate::hub::HubStats;

/// Health check response body.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// `"ok"` while serving, `"shutting_down"` once the hub is closing.
    pub status: String,
    /// Seconds since the server started.
    pub uptime_secs: u64,
    /// Registered clients.
    pub connections: usize,
    /// Whether the hub refuses new clients.
    pub shutting_down: bool,
    /// Lifetime hub counters.
    pub stats: HubStats,
}

/// Build a health response from the hub's live counters.
pub fn health_check(start_time: Instant, stats: HubStats, shutting_down: bool) -> HealthResponse {
    HealthResponse {
        status: if shutting_down { "shutting_down" } else { "ok" }.into(),
        uptime_secs: start_time.elapsed().as_secs(),
        connections: stats.active_clients,
        shutting_down,
        stats,
    }
}

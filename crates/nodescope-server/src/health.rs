//! `/health` endpoint.

use serde::Serialize;
use std::time::Instant;

/// Health check response body.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Always `"ok"` when the server is running.
    pub status: String,
    /// Seconds since the server started.
    pub uptime_secs: u64,
    /// Live operator sessions.
    pub sessions: usize,
    /// Nodes with a live companion connection.
    pub connected_nodes: usize,
}

/// Build a health response from live counters.
pub fn health_check(start_time: Instant, sessions: usize, connected_nodes: usize) -> HealthResponse {
    HealthResponse {
        status: "ok".into(),
        uptime_secs: start_time.elapsed().as_secs(),
        sessions,
        connected_nodes,
    }
}

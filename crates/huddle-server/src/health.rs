//! `/health` endpoint.

use std::time::Instant;

use huddle_hub::Hub;
use serde::Serialize;

/// Coarse liveness verdict.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Accepting work.
    Ok,
    /// The inbound queue is full and new envelopes are being refused.
    Degraded,
    /// Shutdown has started.
    Draining,
}

/// Health check response body.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Overall verdict.
    pub status: HealthStatus,
    /// Seconds since the server started.
    pub uptime_secs: u64,
    /// Registered WebSocket connections.
    pub connections: usize,
    /// Rooms with at least one joined connection.
    pub active_rooms: usize,
    /// Free slots in the inbound queue.
    pub inbound_headroom: usize,
    /// Membership answers held by the cache, expired or not.
    pub cached_memberships: usize,
}

/// Snapshot the hub for `/health`.
pub fn health_check(start_time: Instant, hub: &Hub, shutting_down: bool) -> HealthResponse {
    let inbound_headroom = hub.inbound_headroom();
    let status = if shutting_down {
        HealthStatus::Draining
    } else if inbound_headroom == 0 {
        HealthStatus::Degraded
    } else {
        HealthStatus::Ok
    };
    HealthResponse {
        status,
        uptime_secs: start_time.elapsed().as_secs(),
        connections: hub.connection_count(),
        active_rooms: hub.room_count(),
        inbound_headroom,
        cached_memberships: hub.cache().len(),
    }
}

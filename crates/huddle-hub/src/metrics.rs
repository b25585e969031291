//! Metric names recorded by the hub.
//!
//! The hub only records through the `metrics` facade; installing an
//! exporter is the server's job.

/// Connections accepted by [`crate::Hub::connect`] (counter).
pub const CONNECTIONS_OPENED_TOTAL: &str = "hub_connections_opened_total";
/// Connections removed from the registry (counter).
pub const CONNECTIONS_CLOSED_TOTAL: &str = "hub_connections_closed_total";
/// Registered connections (gauge).
pub const CONNECTIONS_ACTIVE: &str = "hub_connections_active";
/// Connections evicted because their outbound buffer was full (counter).
pub const SLOW_CONSUMER_EVICTIONS_TOTAL: &str = "hub_slow_consumer_evictions_total";
/// Connections evicted by a newer connection of the same user (counter).
pub const DUPLICATE_EVICTIONS_TOTAL: &str = "hub_duplicate_evictions_total";
/// Envelopes dropped because the inbound queue was full (counter).
pub const INBOUND_DROPS_TOTAL: &str = "hub_inbound_drops_total";
/// Broadcasts delivered in the caller's task because the room queue was full (counter).
pub const ROOM_INLINE_DELIVERIES_TOTAL: &str = "hub_room_inline_deliveries_total";
/// Room pipelines started (counter).
pub const ROOM_PIPELINES_STARTED_TOTAL: &str = "hub_room_pipelines_started_total";
/// Worker tasks that panicked (counter).
pub const WORKER_PANICS_TOTAL: &str = "hub_worker_panics_total";
/// Chat messages persisted and broadcast (counter).
pub const MESSAGES_SENT_TOTAL: &str = "hub_messages_sent_total";
/// Inbound envelope handling time (histogram, labels: kind).
pub const ENVELOPE_DURATION_SECONDS: &str = "hub_envelope_duration_seconds";

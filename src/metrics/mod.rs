//! Prometheus metrics for the realtime gateway.
//!
//! Covers connection lifecycle, message traffic, group broadcasts, the
//! heartbeat sweep and admission control.

mod helpers;

pub use helpers::{
    encode_metrics, AdmissionMetrics, BroadcastMetrics, ConnectionMetrics, HeartbeatMetrics,
    WsMessageMetrics,
};

use lazy_static::lazy_static;
use prometheus::{
    register_histogram, register_int_counter, register_int_counter_vec, register_int_gauge,
    Histogram, IntCounter, IntCounterVec, IntGauge,
};

/// Prefix for all metrics
const METRIC_PREFIX: &str = "realtime";

lazy_static! {
    // ============================================================================
    // Connection Metrics
    // ============================================================================

    /// Connections currently served by a stream handler
    pub static ref CONNECTIONS_ACTIVE: IntGauge = register_int_gauge!(
        format!("{}_connections_active", METRIC_PREFIX),
        "Number of WebSocket connections currently served by a handler"
    ).unwrap();

    /// WebSocket connections opened
    pub static ref WS_CONNECTIONS_OPENED: IntCounter = register_int_counter!(
        format!("{}_ws_connections_opened_total", METRIC_PREFIX),
        "Total WebSocket connections opened"
    ).unwrap();

    /// WebSocket connections closed
    pub static ref WS_CONNECTIONS_CLOSED: IntCounter = register_int_counter!(
        format!("{}_ws_connections_closed_total", METRIC_PREFIX),
        "Total WebSocket connections closed"
    ).unwrap();

    /// WebSocket connection duration
    pub static ref WS_CONNECTION_DURATION: Histogram = register_histogram!(
        format!("{}_ws_connection_duration_seconds", METRIC_PREFIX),
        "WebSocket connection duration in seconds",
        vec![1.0, 10.0, 60.0, 300.0, 900.0, 3600.0, 14400.0]
    ).unwrap();

    /// Stream handlers that ended with an error or a panic
    pub static ref HANDLER_FAILURES_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_handler_failures_total", METRIC_PREFIX),
        "Total stream handler failures",
        &["kind"]
    ).unwrap();

    // ============================================================================
    // Message Metrics
    // ============================================================================

    /// Messages received from clients
    pub static ref WS_MESSAGES_RECEIVED: IntCounterVec = register_int_counter_vec!(
        format!("{}_ws_messages_received_total", METRIC_PREFIX),
        "Total WebSocket messages received from clients",
        &["type"]
    ).unwrap();

    /// Messages sent to clients
    pub static ref WS_MESSAGES_SENT: IntCounterVec = register_int_counter_vec!(
        format!("{}_ws_messages_sent_total", METRIC_PREFIX),
        "Total WebSocket messages sent to clients",
        &["type"]
    ).unwrap();

    // ============================================================================
    // Group Metrics
    // ============================================================================

    /// Groups with at least one member
    pub static ref GROUPS_ACTIVE: IntGauge = register_int_gauge!(
        format!("{}_groups_active", METRIC_PREFIX),
        "Number of groups with at least one member"
    ).unwrap();

    /// Group memberships across all groups
    pub static ref GROUP_MEMBERSHIPS: IntGauge = register_int_gauge!(
        format!("{}_group_memberships", METRIC_PREFIX),
        "Number of group memberships across all groups"
    ).unwrap();

    /// Broadcast deliveries by outcome
    pub static ref BROADCAST_DELIVERIES_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_broadcast_deliveries_total", METRIC_PREFIX),
        "Total broadcast deliveries by outcome",
        &["outcome"]
    ).unwrap();

    // ============================================================================
    // Heartbeat Metrics
    // ============================================================================

    /// Heartbeat sweep duration
    pub static ref HEARTBEAT_DURATION_MS: Histogram = register_histogram!(
        format!("{}_heartbeat_duration_ms", METRIC_PREFIX),
        "Duration of a heartbeat sweep in milliseconds",
        vec![0.1, 0.5, 1.0, 5.0, 10.0, 50.0, 100.0]
    ).unwrap();

    /// Members removed by the heartbeat sweep
    pub static ref HEARTBEAT_SWEPT_TOTAL: IntCounter = register_int_counter!(
        format!("{}_heartbeat_swept_total", METRIC_PREFIX),
        "Total dead group members removed by the heartbeat sweep"
    ).unwrap();

    // ============================================================================
    // Rate Limiting Metrics
    // ============================================================================

    /// Requests admitted by a route policy
    pub static ref RATELIMIT_ALLOWED_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_ratelimit_allowed_total", METRIC_PREFIX),
        "Total requests admitted by rate limiting",
        &["policy"]
    ).unwrap();

    /// Requests rejected by a route policy
    pub static ref RATELIMIT_DENIED_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_ratelimit_denied_total", METRIC_PREFIX),
        "Total requests rejected by rate limiting",
        &["policy"]
    ).unwrap();

    /// Per-caller policy state evicted as idle
    pub static ref RATELIMIT_EVICTED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_ratelimit_evicted_total", METRIC_PREFIX),
        "Total idle per-caller rate limit entries evicted"
    ).unwrap();
}

//! Metrics helper structs for convenient metric recording

use std::time::Duration;

use prometheus::{Encoder, TextEncoder};

use super::{
    BROADCAST_DELIVERIES_TOTAL, CONNECTIONS_ACTIVE, GROUPS_ACTIVE, GROUP_MEMBERSHIPS,
    HANDLER_FAILURES_TOTAL, HEARTBEAT_DURATION_MS, HEARTBEAT_SWEPT_TOTAL,
    RATELIMIT_ALLOWED_TOTAL, RATELIMIT_DENIED_TOTAL, RATELIMIT_EVICTED_TOTAL,
    WS_CONNECTIONS_CLOSED, WS_CONNECTIONS_OPENED, WS_CONNECTION_DURATION, WS_MESSAGES_RECEIVED,
    WS_MESSAGES_SENT,
};

/// Encode all metrics to Prometheus text format
pub fn encode_metrics() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(String::from_utf8(buffer).unwrap_or_default())
}

/// Connection lifecycle metrics
pub struct ConnectionMetrics;

impl ConnectionMetrics {
    pub fn record_opened() {
        WS_CONNECTIONS_OPENED.inc();
        CONNECTIONS_ACTIVE.inc();
    }

    pub fn record_closed(duration: Duration) {
        WS_CONNECTIONS_CLOSED.inc();
        CONNECTIONS_ACTIVE.dec();
        WS_CONNECTION_DURATION.observe(duration.as_secs_f64());
    }

    pub fn record_handler_error() {
        HANDLER_FAILURES_TOTAL.with_label_values(&["error"]).inc();
    }

    pub fn record_handler_panic() {
        HANDLER_FAILURES_TOTAL.with_label_values(&["panic"]).inc();
    }
}

/// Helper struct for recording WebSocket message metrics
pub struct WsMessageMetrics;

impl WsMessageMetrics {
    pub fn record_text_received() {
        WS_MESSAGES_RECEIVED.with_label_values(&["text"]).inc();
    }

    pub fn record_binary_received() {
        WS_MESSAGES_RECEIVED.with_label_values(&["binary"]).inc();
    }

    pub fn record_text_sent() {
        WS_MESSAGES_SENT.with_label_values(&["text"]).inc();
    }

    pub fn record_binary_sent() {
        WS_MESSAGES_SENT.with_label_values(&["binary"]).inc();
    }
}

/// Group broadcast metrics
pub struct BroadcastMetrics;

impl BroadcastMetrics {
    pub fn record_report(delivered: usize, skipped: usize, failed: usize) {
        BROADCAST_DELIVERIES_TOTAL
            .with_label_values(&["delivered"])
            .inc_by(delivered as u64);
        BROADCAST_DELIVERIES_TOTAL
            .with_label_values(&["skipped"])
            .inc_by(skipped as u64);
        BROADCAST_DELIVERIES_TOTAL
            .with_label_values(&["failed"])
            .inc_by(failed as u64);
    }

    pub fn set_group_sizes(groups: usize, memberships: usize) {
        GROUPS_ACTIVE.set(groups as i64);
        GROUP_MEMBERSHIPS.set(memberships as i64);
    }
}

/// Helper struct for heartbeat metrics
pub struct HeartbeatMetrics;

impl HeartbeatMetrics {
    /// Record heartbeat round duration
    pub fn record_duration_ms(duration_ms: f64) {
        HEARTBEAT_DURATION_MS.observe(duration_ms);
    }

    /// Record members dropped by a sweep
    pub fn record_swept(count: usize) {
        HEARTBEAT_SWEPT_TOTAL.inc_by(count as u64);
    }
}

/// Helper struct for recording admission metrics
pub struct AdmissionMetrics;

impl AdmissionMetrics {
    pub fn record_allowed(policy: &str) {
        RATELIMIT_ALLOWED_TOTAL.with_label_values(&[policy]).inc();
    }

    pub fn record_denied(policy: &str) {
        RATELIMIT_DENIED_TOTAL.with_label_values(&[policy]).inc();
    }

    pub fn record_evicted(count: usize) {
        RATELIMIT_EVICTED_TOTAL.inc_by(count as u64);
    }
}

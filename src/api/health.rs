//! Health check and statistics endpoints.

use axum::{extract::State, Json};
use serde::Serialize;

use crate::groups::GroupStats;
use crate::server::AppState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_seconds: u64,
    pub stream_routes: usize,
}

#[derive(Debug, Serialize)]
pub struct StatsResponse {
    pub groups: GroupStats,
    pub live_connections: usize,
    pub ratelimit: RateLimitStats,
}

#[derive(Debug, Serialize)]
pub struct RateLimitStats {
    pub enabled: bool,
    pub cached_routes: usize,
    pub tracked_callers: usize,
}

pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: state.start_time.elapsed().as_secs(),
        stream_routes: state.dispatcher.route_count(),
    })
}

pub async fn stats(State(state): State<AppState>) -> Json<StatsResponse> {
    Json(StatsResponse {
        groups: state.groups.stats(),
        live_connections: state.groups.connections().len(),
        ratelimit: RateLimitStats {
            enabled: state.settings.ratelimit.enabled,
            cached_routes: state.policies.cached_routes(),
            tracked_callers: state.policies.tracked_callers(),
        },
    })
}

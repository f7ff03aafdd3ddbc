use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};

use axum::{
    extract::{ConnectInfo, MatchedPath, Query, Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

use super::AppState;
use crate::metrics::AdmissionMetrics;
use crate::routing::RouteKey;

/// Admission control for every inbound request.
///
/// The route identity is the matched HTTP route (path pattern and method)
/// when there is one, otherwise the stream route whose template matches the
/// request, otherwise the shared unmatched key. The caller is identified by
/// its IP address.
pub async fn admission_middleware(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Response {
    // Skip if rate limiting is disabled
    if !state.settings.ratelimit.enabled {
        return next.run(req).await;
    }

    let Some(caller) = caller_ip(&req) else {
        tracing::debug!(path = %req.uri().path(), "No client address, skipping admission check");
        return next.run(req).await;
    };

    let route = route_key(&state, &req);
    let policy = state.policies.resolve(&route);

    if policy.is_allowed(caller) {
        AdmissionMetrics::record_allowed(policy.name());
        return next.run(req).await;
    }

    AdmissionMetrics::record_denied(policy.name());
    tracing::warn!(
        ip = %caller,
        route = %route,
        policy = policy.name(),
        "Rate limit exceeded"
    );

    rate_limit_response(policy.status_code(), policy.blocked_reason())
}

fn caller_ip(req: &Request) -> Option<IpAddr> {
    req.extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip())
}

fn route_key(state: &AppState, req: &Request) -> RouteKey {
    if let Some(matched) = req.extensions().get::<MatchedPath>() {
        return RouteKey::new(matched.as_str(), req.method().as_str());
    }

    let query = Query::<HashMap<String, String>>::try_from_uri(req.uri())
        .map(|Query(q)| q)
        .unwrap_or_default();

    state
        .dispatcher
        .route_key_for(req.uri().path(), &query)
        .unwrap_or_else(RouteKey::unmatched)
}

/// Build a rate limit error response
fn rate_limit_response(status: StatusCode, reason: String) -> Response {
    let body = json!({
        "error": {
            "code": "RATE_LIMITED",
            "message": reason
        }
    });

    (status, Json(body)).into_response()
}

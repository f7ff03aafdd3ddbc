use std::collections::HashMap;
use std::net::SocketAddr;

use axum::{
    extract::{ConnectInfo, FromRequestParts, Query, Request, State, WebSocketUpgrade},
    response::{IntoResponse, Response},
};

use crate::error::AppError;
use crate::server::AppState;

/// Fallback handler: upgrade requests whose path matches a stream route,
/// 404 for everything else.
#[tracing::instrument(
    name = "ws.upgrade",
    skip(state, request),
    fields(path = %request.uri().path())
)]
pub async fn stream_upgrade_handler(State(state): State<AppState>, request: Request) -> Response {
    let remote_addr = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);

    let (mut parts, _body) = request.into_parts();
    let path = parts.uri.path().to_string();
    let query = Query::<HashMap<String, String>>::try_from_uri(&parts.uri)
        .map(|Query(q)| q)
        .unwrap_or_default();

    let upgrade = match WebSocketUpgrade::from_request_parts(&mut parts, &state).await {
        Ok(upgrade) => upgrade,
        Err(_) => return not_found(&path),
    };

    state
        .dispatcher
        .try_dispatch(upgrade, &path, &query, remote_addr)
        .unwrap_or_else(|| not_found(&path))
}

fn not_found(path: &str) -> Response {
    AppError::NotFound(format!("No route for {}", path)).into_response()
}

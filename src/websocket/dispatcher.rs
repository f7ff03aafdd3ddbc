//! Matches upgrade requests against registered stream routes and runs the
//! matching handler for the life of the connection.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use axum::extract::WebSocketUpgrade;
use axum::response::Response;
use futures::FutureExt;

use crate::metrics::ConnectionMetrics;
use crate::ratelimit::PolicyConfig;
use crate::routing::{PathTemplate, RouteKey, RouteParameters, TemplateCache, TemplateError};

use super::connection::{Connection, ConnectionOptions, DEFAULT_MAX_MESSAGE_SIZE};
use super::error::close_code;
use super::registry::{HandlerRegistry, StreamRoute};
use super::transport::{Transport, WsTransport};

/// Smallest inbound cap handed to the WebSocket codec (64 MiB).
const CODEC_MESSAGE_CAP: usize = 64 << 20;

/// Cap for the codec's own message and frame limits. It stays above the
/// connection limit so oversized messages reach the connection, which
/// closes with 1009 instead of the codec dropping the socket.
fn codec_cap(limit: usize) -> usize {
    limit.saturating_mul(2).max(CODEC_MESSAGE_CAP)
}

struct CompiledRoute {
    route: StreamRoute,
    template: Arc<PathTemplate>,
}

pub struct StreamDispatcher {
    routes: Vec<CompiledRoute>,
    max_message_size: usize,
}

impl StreamDispatcher {
    /// Compile every registered template. A template that fails to compile
    /// is a startup error.
    pub fn new(registry: HandlerRegistry, cache: &TemplateCache) -> Result<Self, TemplateError> {
        let routes = registry
            .into_routes()
            .into_iter()
            .map(|route| {
                let template = cache.compile(route.template(), route.required_query())?;
                Ok(CompiledRoute { route, template })
            })
            .collect::<Result<Vec<_>, TemplateError>>()?;

        tracing::info!(routes = routes.len(), "Stream dispatcher ready");

        Ok(Self {
            routes,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
        })
    }

    pub fn with_max_message_size(mut self, max_message_size: usize) -> Self {
        self.max_message_size = max_message_size;
        self
    }

    pub fn route_count(&self) -> usize {
        self.routes.len()
    }

    /// Explicit policies attached to stream routes.
    pub fn route_policies(&self) -> Vec<(RouteKey, PolicyConfig)> {
        self.routes
            .iter()
            .filter_map(|r| {
                r.route
                    .route_policy()
                    .map(|policy| (r.route.key().clone(), policy.clone()))
            })
            .collect()
    }

    /// Key of the first route matching the request, if any.
    pub fn route_key_for(&self, path: &str, query: &HashMap<String, String>) -> Option<RouteKey> {
        self.find(path, query)
            .map(|(index, _)| self.routes[index].route.key().clone())
    }

    fn find(&self, path: &str, query: &HashMap<String, String>) -> Option<(usize, RouteParameters)> {
        self.routes
            .iter()
            .enumerate()
            .find_map(|(index, r)| r.template.matches(path, query).map(|params| (index, params)))
    }

    /// Accept `upgrade` if a route matches. `None` lets the request fall
    /// through to ordinary handling.
    pub fn try_dispatch(
        self: &Arc<Self>,
        upgrade: WebSocketUpgrade,
        path: &str,
        query: &HashMap<String, String>,
        remote_addr: Option<SocketAddr>,
    ) -> Option<Response> {
        let (index, params) = self.find(path, query)?;
        let dispatcher = Arc::clone(self);
        let route = self.routes[index].route.key().clone();

        tracing::info!(route = %route, path = %path, "WebSocket upgrade requested");

        let response = upgrade
            .max_message_size(codec_cap(self.max_message_size))
            .max_frame_size(codec_cap(self.max_message_size))
            .on_failed_upgrade(move |e| {
                tracing::warn!(route = %route, error = %e, "WebSocket upgrade failed");
            })
            .on_upgrade(move |socket| async move {
                dispatcher
                    .serve(index, params, remote_addr, WsTransport::new(socket))
                    .await;
            });

        Some(response)
    }

    /// Run the matching handler over an already accepted transport.
    /// Returns false when no route matches; the transport is dropped.
    pub async fn dispatch<T: Transport>(
        &self,
        path: &str,
        query: &HashMap<String, String>,
        remote_addr: Option<SocketAddr>,
        transport: T,
    ) -> bool {
        match self.find(path, query) {
            Some((index, params)) => {
                self.serve(index, params, remote_addr, transport).await;
                true
            }
            None => {
                tracing::debug!(path = %path, "No stream route matched");
                false
            }
        }
    }

    async fn serve<T: Transport>(
        &self,
        index: usize,
        params: RouteParameters,
        remote_addr: Option<SocketAddr>,
        transport: T,
    ) {
        let route = &self.routes[index].route;
        let options = ConnectionOptions {
            remote_addr,
            max_message_size: self.max_message_size,
        };
        let connection = Connection::accept(transport, params, options);
        let started = Instant::now();

        ConnectionMetrics::record_opened();
        tracing::info!(
            connection_id = %connection.id(),
            route = %route.key(),
            remote_addr = ?remote_addr,
            "WebSocket connection established"
        );

        let outcome = AssertUnwindSafe((route.handler())(connection.clone()))
            .catch_unwind()
            .await;

        match outcome {
            Ok(Ok(())) => {
                if !connection.state().is_terminal() {
                    // Already closing elsewhere if this fails
                    let _ = connection.close(close_code::NORMAL, "").await;
                }
            }
            Ok(Err(e)) => {
                ConnectionMetrics::record_handler_error();
                tracing::error!(
                    connection_id = %connection.id(),
                    route = %route.key(),
                    error = %e,
                    "Stream handler failed"
                );
                close_after_failure(&connection).await;
            }
            Err(_) => {
                ConnectionMetrics::record_handler_panic();
                tracing::error!(
                    connection_id = %connection.id(),
                    route = %route.key(),
                    "Stream handler panicked"
                );
                close_after_failure(&connection).await;
            }
        }

        ConnectionMetrics::record_closed(started.elapsed());
        tracing::info!(
            connection_id = %connection.id(),
            route = %route.key(),
            state = %connection.state(),
            duration_secs = started.elapsed().as_secs(),
            "WebSocket connection finished"
        );
    }
}

async fn close_after_failure(connection: &Connection) {
    if !connection.state().is_terminal() {
        let _ = connection
            .close(close_code::INTERNAL_ERROR, "handler error")
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::websocket::memory;
    use crate::websocket::transport::{CloseFrame, OutboundFrame};

    async fn echo_once(conn: Arc<Connection>) -> anyhow::Result<()> {
        let text = conn.receive_text().await?;
        conn.send_text(text).await?;
        Ok(())
    }

    async fn failing(_conn: Arc<Connection>) -> anyhow::Result<()> {
        anyhow::bail!("boom")
    }

    async fn panicking(_conn: Arc<Connection>) -> anyhow::Result<()> {
        panic!("handler panic")
    }

    fn dispatcher(routes: Vec<StreamRoute>) -> StreamDispatcher {
        let registry = routes.into_iter().fold(HandlerRegistry::new(), HandlerRegistry::with);
        StreamDispatcher::new(registry, &TemplateCache::new()).unwrap()
    }

    fn no_query() -> HashMap<String, String> {
        HashMap::new()
    }

    #[tokio::test]
    async fn test_dispatch_runs_matching_handler_then_closes_normally() {
        let dispatcher = dispatcher(vec![StreamRoute::new("echo", "echo", "/ws/echo", echo_once)]);
        let (transport, mut peer) = memory::pair();

        peer.send_text("hi");
        assert!(dispatcher.dispatch("/ws/echo", &no_query(), None, transport).await);

        assert_eq!(peer.recv_text().await.as_deref(), Some("hi"));
        assert_eq!(
            peer.recv().await,
            Some(OutboundFrame::Close(CloseFrame::new(1000, "")))
        );
    }

    #[tokio::test]
    async fn test_handler_error_closes_with_1011() {
        let dispatcher = dispatcher(vec![StreamRoute::new("x", "fail", "/fail", failing)]);
        let (transport, mut peer) = memory::pair();

        assert!(dispatcher.dispatch("/fail", &no_query(), None, transport).await);
        assert_eq!(
            peer.recv().await,
            Some(OutboundFrame::Close(CloseFrame::new(1011, "handler error")))
        );
    }

    #[tokio::test]
    async fn test_handler_panic_closes_with_1011() {
        let dispatcher = dispatcher(vec![StreamRoute::new("x", "panic", "/panic", panicking)]);
        let (transport, mut peer) = memory::pair();

        assert!(dispatcher.dispatch("/panic", &no_query(), None, transport).await);
        assert_eq!(
            peer.recv().await,
            Some(OutboundFrame::Close(CloseFrame::new(1011, "handler error")))
        );
    }

    #[tokio::test]
    async fn test_no_match_returns_false() {
        let dispatcher = dispatcher(vec![StreamRoute::new("echo", "echo", "/ws/echo", echo_once)]);
        let (transport, mut peer) = memory::pair();

        assert!(!dispatcher.dispatch("/ws/other", &no_query(), None, transport).await);
        // Transport dropped without any frame
        assert_eq!(peer.recv().await, None);
    }

    #[tokio::test]
    async fn test_first_registered_route_wins() {
        async fn first(conn: Arc<Connection>) -> anyhow::Result<()> {
            conn.send_text("first").await?;
            Ok(())
        }
        async fn second(conn: Arc<Connection>) -> anyhow::Result<()> {
            conn.send_text("second").await?;
            Ok(())
        }

        let dispatcher = dispatcher(vec![
            StreamRoute::new("a", "param", "/items/{id}", first),
            StreamRoute::new("a", "literal", "/items/special", second),
        ]);
        let (transport, mut peer) = memory::pair();

        dispatcher.dispatch("/items/special", &no_query(), None, transport).await;
        assert_eq!(peer.recv_text().await.as_deref(), Some("first"));
    }

    #[tokio::test]
    async fn test_required_query_gates_match() {
        let dispatcher = dispatcher(vec![StreamRoute::new(
            "chat",
            "group_chat",
            "/group/chat/{groupId}",
            echo_once,
        )
        .require_query("userId")]);

        assert_eq!(dispatcher.route_key_for("/group/chat/1", &no_query()), None);

        let query: HashMap<_, _> = [("userId".to_string(), "u1".to_string())].into();
        assert_eq!(
            dispatcher.route_key_for("/group/chat/1", &query),
            Some(RouteKey::new("chat", "group_chat"))
        );
    }

    #[test]
    fn test_codec_cap_exceeds_connection_limit() {
        assert!(codec_cap(1024) > 1024);
        assert!(codec_cap(DEFAULT_MAX_MESSAGE_SIZE) > DEFAULT_MAX_MESSAGE_SIZE);
        assert!(codec_cap(100 << 20) > 100 << 20);
        assert_eq!(codec_cap(usize::MAX), usize::MAX);
    }

    #[test]
    fn test_invalid_template_is_fatal() {
        let registry =
            HandlerRegistry::new().with(StreamRoute::new("bad", "bad", "/a/{}", echo_once));

        assert!(matches!(
            StreamDispatcher::new(registry, &TemplateCache::new()),
            Err(TemplateError::EmptyParameter { .. })
        ));
    }

    #[test]
    fn test_route_policies_lists_attached_policies() {
        let dispatcher = dispatcher(vec![
            StreamRoute::new("a", "plain", "/a", echo_once),
            StreamRoute::new("b", "limited", "/b", echo_once).policy(PolicyConfig::SlidingWindow {
                max_requests: 3,
                window_ms: 1000,
            }),
        ]);

        let policies = dispatcher.route_policies();
        assert_eq!(policies.len(), 1);
        assert_eq!(policies[0].0, RouteKey::new("b", "limited"));
    }
}

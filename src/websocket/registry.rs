//! Stream route registration.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;

use crate::ratelimit::PolicyConfig;
use crate::routing::RouteKey;

use super::connection::Connection;

pub type HandlerFuture = BoxFuture<'static, anyhow::Result<()>>;

/// Handler invoked once per accepted connection.
pub type StreamHandler = Arc<dyn Fn(Arc<Connection>) -> HandlerFuture + Send + Sync>;

/// One stream endpoint: its identity, path template and handler.
#[derive(Clone)]
pub struct StreamRoute {
    key: RouteKey,
    template: String,
    required_query: Vec<String>,
    policy: Option<PolicyConfig>,
    handler: StreamHandler,
}

impl StreamRoute {
    pub fn new<F, Fut>(
        controller: impl Into<String>,
        action: impl Into<String>,
        template: impl Into<String>,
        handler: F,
    ) -> Self
    where
        F: Fn(Arc<Connection>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        Self {
            key: RouteKey::new(controller, action),
            template: template.into(),
            required_query: Vec::new(),
            policy: None,
            handler: Arc::new(move |conn| handler(conn).boxed()),
        }
    }

    /// Only match requests carrying query parameter `name`.
    pub fn require_query(mut self, name: impl Into<String>) -> Self {
        self.required_query.push(name.into());
        self
    }

    /// Attach an admission policy to this route.
    pub fn policy(mut self, policy: PolicyConfig) -> Self {
        self.policy = Some(policy);
        self
    }

    pub fn key(&self) -> &RouteKey {
        &self.key
    }

    pub fn template(&self) -> &str {
        &self.template
    }

    pub fn required_query(&self) -> &[String] {
        &self.required_query
    }

    pub fn route_policy(&self) -> Option<&PolicyConfig> {
        self.policy.as_ref()
    }

    pub(crate) fn handler(&self) -> &StreamHandler {
        &self.handler
    }
}

impl fmt::Debug for StreamRoute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamRoute")
            .field("key", &self.key)
            .field("template", &self.template)
            .field("required_query", &self.required_query)
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

/// Ordered set of stream routes. Registration order is match order.
#[derive(Debug, Clone, Default)]
pub struct HandlerRegistry {
    routes: Vec<StreamRoute>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, route: StreamRoute) -> &mut Self {
        tracing::debug!(route = %route.key, template = %route.template, "Registered stream route");
        self.routes.push(route);
        self
    }

    pub fn with(mut self, route: StreamRoute) -> Self {
        self.register(route);
        self
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &StreamRoute> {
        self.routes.iter()
    }

    pub(crate) fn into_routes(self) -> Vec<StreamRoute> {
        self.routes
    }
}

use std::sync::Arc;
use std::time::Instant;

use crate::config::Settings;
use crate::error::AppError;
use crate::groups::GroupRegistry;
use crate::ratelimit::PolicyResolver;
use crate::routing::TemplateCache;
use crate::websocket::{HandlerRegistry, StreamDispatcher};

#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    pub dispatcher: Arc<StreamDispatcher>,
    pub groups: Arc<GroupRegistry>,
    pub policies: Arc<PolicyResolver>,
    pub start_time: Instant,
}

impl AppState {
    /// Compile the stream routes and build the policy resolver.
    ///
    /// Fails if any registered template does not compile.
    pub fn new(
        settings: Settings,
        handlers: HandlerRegistry,
        groups: Arc<GroupRegistry>,
    ) -> Result<Self, AppError> {
        let templates = TemplateCache::new();
        let dispatcher = StreamDispatcher::new(handlers, &templates)?
            .with_max_message_size(settings.websocket.max_message_size);

        // Settings entries take precedence over policies attached in code
        let policies = PolicyResolver::from_config(&settings.ratelimit)
            .with_route_policies(dispatcher.route_policies());

        Ok(Self {
            settings: Arc::new(settings),
            dispatcher: Arc::new(dispatcher),
            groups,
            policies: Arc::new(policies),
            start_time: Instant::now(),
        })
    }
}

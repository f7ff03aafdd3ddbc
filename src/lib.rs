// Core building blocks
pub mod config;
pub mod error;
pub mod metrics;
pub mod routing;

// Connection layer
pub mod groups;
pub mod ratelimit;
pub mod websocket;

// Application layer
pub mod api;
pub mod handlers;
pub mod server;

// Supporting modules
pub mod shutdown;
pub mod tasks;

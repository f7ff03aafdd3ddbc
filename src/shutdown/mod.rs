//! Graceful shutdown handling for the realtime gateway.
//!
//! Shutdown runs in three phases:
//! 1. Close every grouped connection with 1001 (going away)
//! 2. Signal background tasks to stop
//! 3. Dispose whatever is left in the group registry

use std::sync::Arc;
use std::time::Duration;

use futures::stream::{FuturesUnordered, StreamExt};
use tokio::sync::broadcast;
use tokio::time::timeout;

use crate::groups::GroupRegistry;
use crate::websocket::close_code;

/// Configuration for graceful shutdown behavior
#[derive(Debug, Clone)]
pub struct ShutdownConfig {
    /// Time allowed for close handshakes to complete (default: 5 seconds)
    pub close_timeout: Duration,
    /// Reason sent in the close frame
    pub close_reason: String,
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            close_timeout: Duration::from_secs(5),
            close_reason: "server shutting down".to_string(),
        }
    }
}

/// Handles graceful shutdown of the gateway
pub struct GracefulShutdown {
    groups: Arc<GroupRegistry>,
    shutdown_tx: broadcast::Sender<()>,
    config: ShutdownConfig,
}

impl GracefulShutdown {
    pub fn new(groups: Arc<GroupRegistry>, shutdown_tx: broadcast::Sender<()>) -> Self {
        Self::with_config(groups, shutdown_tx, ShutdownConfig::default())
    }

    pub fn with_config(
        groups: Arc<GroupRegistry>,
        shutdown_tx: broadcast::Sender<()>,
        config: ShutdownConfig,
    ) -> Self {
        Self {
            groups,
            shutdown_tx,
            config,
        }
    }

    /// Execute graceful shutdown sequence
    #[tracing::instrument(name = "graceful_shutdown", skip(self))]
    pub async fn execute(&self) -> ShutdownResult {
        let start = std::time::Instant::now();
        let mut result = ShutdownResult::default();

        tracing::info!("Starting graceful shutdown - Phase 1: Closing connections");
        result.connections_closed = self.close_connections().await;

        tracing::info!("Phase 2: Signaling background tasks to stop");
        let _ = self.shutdown_tx.send(());

        tracing::info!("Phase 3: Releasing remaining connections");
        result.connections_disposed = self.groups.cleanup().await;

        result.duration = start.elapsed();
        result.success = true;

        tracing::info!(
            connections_closed = result.connections_closed,
            connections_disposed = result.connections_disposed,
            duration_ms = result.duration.as_millis(),
            "Graceful shutdown completed"
        );

        result
    }

    async fn close_connections(&self) -> usize {
        let connections = self.groups.connections();
        let total = connections.len();

        if total == 0 {
            return 0;
        }

        tracing::info!(total_connections = total, "Closing connections");

        let reason = self.config.close_reason.as_str();
        let mut futures: FuturesUnordered<_> = connections
            .iter()
            .map(|conn| async move {
                match conn.close(close_code::GOING_AWAY, reason).await {
                    Ok(()) => true,
                    Err(e) => {
                        tracing::debug!(
                            connection_id = %conn.id(),
                            error = %e,
                            "Connection was already closing"
                        );
                        false
                    }
                }
            })
            .collect();

        let mut closed = 0;
        let close_all = async {
            while let Some(success) = futures.next().await {
                if success {
                    closed += 1;
                }
            }
        };

        if timeout(self.config.close_timeout, close_all).await.is_err() {
            tracing::warn!(
                closed = closed,
                total = total,
                "Close timeout elapsed, remaining connections will be disposed"
            );
        }

        closed
    }
}

/// Result of a graceful shutdown operation
#[derive(Debug, Default)]
pub struct ShutdownResult {
    /// Whether shutdown completed successfully
    pub success: bool,
    /// Connections closed with a handshake
    pub connections_closed: usize,
    /// Connections released by the final cleanup
    pub connections_disposed: usize,
    /// Total time taken for shutdown
    pub duration: Duration,
}

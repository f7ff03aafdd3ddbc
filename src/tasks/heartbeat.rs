use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::broadcast;

use crate::config::WebSocketConfig;
use crate::groups::GroupRegistry;
use crate::metrics::HeartbeatMetrics;

/// Background task that sweeps dead members out of every group
pub struct HeartbeatTask {
    interval: Duration,
    groups: Arc<GroupRegistry>,
    shutdown: broadcast::Receiver<()>,
}

impl HeartbeatTask {
    pub fn new(
        config: &WebSocketConfig,
        groups: Arc<GroupRegistry>,
        shutdown: broadcast::Receiver<()>,
    ) -> Self {
        Self {
            interval: Duration::from_secs(config.heartbeat_interval.max(1)),
            groups,
            shutdown,
        }
    }

    /// Run the sweep until shutdown is signalled
    pub async fn run(mut self) {
        let mut heartbeat_timer = tokio::time::interval(self.interval);

        // Skip immediate first tick
        heartbeat_timer.tick().await;

        tracing::info!(
            heartbeat_interval_secs = self.interval.as_secs(),
            "Heartbeat task started"
        );

        loop {
            tokio::select! {
                _ = self.shutdown.recv() => {
                    tracing::info!("Heartbeat task received shutdown signal");
                    break;
                }
                _ = heartbeat_timer.tick() => {
                    self.sweep();
                }
            }
        }

        tracing::info!("Heartbeat task stopped");
    }

    fn sweep(&self) {
        let start = Instant::now();
        let removed = self.groups.sweep();
        let elapsed_ms = start.elapsed().as_secs_f64() * 1000.0;

        HeartbeatMetrics::record_duration_ms(elapsed_ms);
        HeartbeatMetrics::record_swept(removed);

        if removed > 0 {
            tracing::info!(
                removed = removed,
                groups = self.groups.group_count(),
                "Removed dead group members"
            );
        } else {
            tracing::debug!(groups = self.groups.group_count(), "Heartbeat round completed");
        }
    }
}

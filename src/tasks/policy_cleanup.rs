use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;

use crate::metrics::AdmissionMetrics;
use crate::ratelimit::{PolicyResolver, RateLimitConfig};

/// Background task that evicts idle per-caller rate limit state
pub struct PolicyCleanupTask {
    interval: Duration,
    idle_ttl: Duration,
    policies: Arc<PolicyResolver>,
    shutdown: broadcast::Receiver<()>,
}

impl PolicyCleanupTask {
    pub fn new(
        config: &RateLimitConfig,
        policies: Arc<PolicyResolver>,
        shutdown: broadcast::Receiver<()>,
    ) -> Self {
        Self {
            interval: Duration::from_secs(config.cleanup_interval_seconds.max(1)),
            idle_ttl: Duration::from_secs(config.idle_ttl_seconds),
            policies,
            shutdown,
        }
    }

    pub async fn run(mut self) {
        let mut cleanup_timer = tokio::time::interval(self.interval);

        // Skip immediate first tick
        cleanup_timer.tick().await;

        tracing::info!(
            cleanup_interval_secs = self.interval.as_secs(),
            idle_ttl_secs = self.idle_ttl.as_secs(),
            "Policy cleanup task started"
        );

        loop {
            tokio::select! {
                _ = self.shutdown.recv() => {
                    tracing::info!("Policy cleanup task received shutdown signal");
                    break;
                }
                _ = cleanup_timer.tick() => {
                    let evicted = self.policies.cleanup_idle(self.idle_ttl);
                    AdmissionMetrics::record_evicted(evicted);
                    if evicted > 0 {
                        tracing::debug!(
                            evicted = evicted,
                            tracked = self.policies.tracked_callers(),
                            "Evicted idle rate limit state"
                        );
                    }
                }
            }
        }

        tracing::info!("Policy cleanup task stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ratelimit::PolicyConfig;
    use crate::routing::RouteKey;
    use std::net::{IpAddr, Ipv4Addr};

    #[tokio::test(start_paused = true)]
    async fn test_evicts_idle_callers() {
        let config = RateLimitConfig {
            default_policy: PolicyConfig::TokenBucket {
                rate: 10,
                capacity: 10,
            },
            cleanup_interval_seconds: 60,
            idle_ttl_seconds: 30,
            ..Default::default()
        };
        let policies = Arc::new(PolicyResolver::from_config(&config));
        let policy = policies.resolve(&RouteKey::new("echo", "echo"));
        assert!(policy.is_allowed(IpAddr::V4(Ipv4Addr::LOCALHOST)));
        assert_eq!(policies.tracked_callers(), 1);

        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let handle = tokio::spawn(PolicyCleanupTask::new(&config, policies.clone(), shutdown_rx).run());

        tokio::time::sleep(Duration::from_secs(61)).await;
        assert_eq!(policies.tracked_callers(), 0);

        shutdown_tx.send(()).unwrap();
        handle.await.unwrap();
    }
}

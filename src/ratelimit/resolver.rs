//! Per-route policy resolution and caching.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;

use crate::routing::RouteKey;

use super::config::{PolicyConfig, RateLimitConfig};
use super::policy::{AdmissionPolicy, AllowAllPolicy};

/// Maps routes to shared policy instances.
///
/// Each route gets exactly one instance, created on first resolution and
/// kept for the life of the resolver. The instance is shared by every caller
/// of that route; per-caller state lives inside the policy. The first writer
/// for a key wins and entries are never invalidated.
///
/// Resolution never fails. A route whose configured policy cannot be built
/// falls back to the default policy, and if that cannot be built either the
/// route admits everything.
pub struct PolicyResolver {
    default_policy: PolicyConfig,
    routes: HashMap<RouteKey, PolicyConfig>,
    cache: DashMap<RouteKey, Arc<dyn AdmissionPolicy>>,
}

impl PolicyResolver {
    pub fn new(default_policy: PolicyConfig) -> Self {
        Self {
            default_policy,
            routes: HashMap::new(),
            cache: DashMap::new(),
        }
    }

    pub fn from_config(config: &RateLimitConfig) -> Self {
        let mut resolver = Self::new(config.default_policy.clone());
        for route in &config.routes {
            resolver.routes.insert(
                RouteKey::new(route.controller.clone(), route.action.clone()),
                route.policy.clone(),
            );
        }
        resolver
    }

    /// Attach an explicit policy to a route unless one is already configured.
    /// Only meaningful before the first `resolve` for that route.
    pub fn with_route_policy(mut self, key: RouteKey, policy: PolicyConfig) -> Self {
        self.routes.entry(key).or_insert(policy);
        self
    }

    pub fn with_route_policies<I>(self, policies: I) -> Self
    where
        I: IntoIterator<Item = (RouteKey, PolicyConfig)>,
    {
        policies
            .into_iter()
            .fold(self, |resolver, (key, policy)| resolver.with_route_policy(key, policy))
    }

    /// Return the policy instance for `key`, creating it on first use.
    pub fn resolve(&self, key: &RouteKey) -> Arc<dyn AdmissionPolicy> {
        if let Some(policy) = self.cache.get(key) {
            return policy.clone();
        }

        self.cache
            .entry(key.clone())
            .or_insert_with(|| self.build_for(key))
            .clone()
    }

    fn build_for(&self, key: &RouteKey) -> Arc<dyn AdmissionPolicy> {
        if let Some(config) = self.routes.get(key) {
            match config.build() {
                Ok(policy) => {
                    tracing::debug!(route = %key, policy = policy.name(), "Created route policy");
                    return policy;
                }
                Err(e) => {
                    tracing::warn!(
                        route = %key,
                        error = %e,
                        "Failed to build route policy, falling back to default"
                    );
                }
            }
        }

        match self.default_policy.build() {
            Ok(policy) => {
                tracing::debug!(route = %key, policy = policy.name(), "Created default policy");
                policy
            }
            Err(e) => {
                tracing::warn!(
                    route = %key,
                    error = %e,
                    "Failed to build default policy, admitting all requests"
                );
                Arc::new(AllowAllPolicy)
            }
        }
    }

    /// Evict idle per-caller state from every cached policy.
    pub fn cleanup_idle(&self, ttl: Duration) -> usize {
        // Collect first so no shard guard is held while policies run
        let policies: Vec<_> = self.cache.iter().map(|e| e.value().clone()).collect();
        policies.iter().map(|policy| policy.evict_idle(ttl)).sum()
    }

    pub fn cached_routes(&self) -> usize {
        self.cache.len()
    }

    pub fn tracked_callers(&self) -> usize {
        self.cache.iter().map(|e| e.value().tracked_callers()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ratelimit::config::RoutePolicyConfig;

    fn resolver() -> PolicyResolver {
        PolicyResolver::new(PolicyConfig::TokenBucket {
            rate: 10,
            capacity: 10,
        })
    }

    #[test]
    fn test_same_route_resolves_same_instance() {
        let resolver = resolver();
        let key = RouteKey::new("chat", "group_chat");

        let first = resolver.resolve(&key);
        let second = resolver.resolve(&key);

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(resolver.cached_routes(), 1);
    }

    #[test]
    fn test_different_routes_get_distinct_instances() {
        let resolver = resolver();
        let a = resolver.resolve(&RouteKey::new("chat", "group_chat"));
        let b = resolver.resolve(&RouteKey::new("echo", "echo"));

        assert!(!Arc::ptr_eq(&a, &b));
        assert_eq!(resolver.cached_routes(), 2);
    }

    #[test]
    fn test_explicit_route_policy_is_used() {
        let config = RateLimitConfig {
            routes: vec![RoutePolicyConfig {
                controller: "chat".to_string(),
                action: "group_chat".to_string(),
                policy: PolicyConfig::SlidingWindow {
                    max_requests: 1,
                    window_ms: 1000,
                },
            }],
            ..Default::default()
        };
        let resolver = PolicyResolver::from_config(&config);

        let policy = resolver.resolve(&RouteKey::new("chat", "group_chat"));
        assert_eq!(policy.name(), "sliding_window");

        let other = resolver.resolve(&RouteKey::new("health", "check"));
        assert_eq!(other.name(), "token_bucket");
    }

    #[test]
    fn test_configured_route_policy_wins_over_registered() {
        let resolver = PolicyResolver::new(PolicyConfig::AllowAll)
            .with_route_policy(RouteKey::new("a", "b"), PolicyConfig::AllowAll)
            .with_route_policy(
                RouteKey::new("a", "b"),
                PolicyConfig::TokenBucket {
                    rate: 1,
                    capacity: 1,
                },
            );

        assert_eq!(resolver.resolve(&RouteKey::new("a", "b")).name(), "allow_all");
    }

    #[test]
    fn test_broken_route_policy_falls_back_to_default() {
        let resolver = resolver().with_route_policy(
            RouteKey::new("chat", "group_chat"),
            PolicyConfig::TokenBucket {
                rate: 0,
                capacity: 0,
            },
        );

        let policy = resolver.resolve(&RouteKey::new("chat", "group_chat"));
        assert_eq!(policy.name(), "token_bucket");
    }

    #[test]
    fn test_broken_default_fails_open() {
        let resolver = PolicyResolver::new(PolicyConfig::SlidingWindow {
            max_requests: 0,
            window_ms: 0,
        });

        let policy = resolver.resolve(&RouteKey::unmatched());
        assert_eq!(policy.name(), "allow_all");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_resolution_yields_one_instance() {
        let resolver = Arc::new(resolver());
        let key = RouteKey::new("chat", "group_chat");

        let handles: Vec<_> = (0..32)
            .map(|_| {
                let resolver = resolver.clone();
                let key = key.clone();
                tokio::spawn(async move { resolver.resolve(&key) })
            })
            .collect();

        let mut resolved = Vec::new();
        for handle in handles {
            resolved.push(handle.await.unwrap());
        }

        let first = &resolved[0];
        assert!(resolved.iter().all(|p| Arc::ptr_eq(p, first)));
        assert_eq!(resolver.cached_routes(), 1);
    }
}

//! Rate limiting configuration

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::policy::{AdmissionPolicy, AllowAllPolicy, PolicyError};
use super::sliding_window::SlidingWindowPolicy;
use super::token_bucket::TokenBucketPolicy;

/// Which admission algorithm a route uses, and its parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PolicyConfig {
    /// Admit everything
    AllowAll,
    /// Per-caller token bucket
    TokenBucket {
        /// Tokens added per second
        #[serde(default = "default_token_rate")]
        rate: u32,
        /// Burst capacity
        #[serde(default = "default_token_capacity")]
        capacity: u32,
    },
    /// Per-caller sliding window log
    SlidingWindow {
        #[serde(default = "default_window_max_requests")]
        max_requests: u32,
        #[serde(default = "default_window_ms")]
        window_ms: u64,
    },
}

impl PolicyConfig {
    /// Construct a fresh policy instance.
    pub fn build(&self) -> Result<Arc<dyn AdmissionPolicy>, PolicyError> {
        Ok(match self {
            PolicyConfig::AllowAll => Arc::new(AllowAllPolicy),
            PolicyConfig::TokenBucket { rate, capacity } => {
                Arc::new(TokenBucketPolicy::new(*rate, *capacity)?)
            }
            PolicyConfig::SlidingWindow {
                max_requests,
                window_ms,
            } => Arc::new(SlidingWindowPolicy::new(
                *max_requests,
                Duration::from_millis(*window_ms),
            )?),
        })
    }
}

fn default_token_rate() -> u32 {
    100 // 100 requests per second per caller
}

fn default_token_capacity() -> u32 {
    200 // Allow burst of 200 requests
}

fn default_window_max_requests() -> u32 {
    100
}

fn default_window_ms() -> u64 {
    1000
}

/// Explicit policy for one route, keyed by controller and action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutePolicyConfig {
    pub controller: String,
    pub action: String,
    pub policy: PolicyConfig,
}

/// Configuration for rate limiting
#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitConfig {
    /// Whether admission control runs at all
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Policy used by routes without an explicit entry
    #[serde(default = "default_policy")]
    pub default_policy: PolicyConfig,
    /// Per-route policies
    #[serde(default)]
    pub routes: Vec<RoutePolicyConfig>,
    /// Cleanup interval for idle per-caller state in seconds
    #[serde(default = "default_cleanup_interval")]
    pub cleanup_interval_seconds: u64,
    /// Time after which unused per-caller state is removed (seconds)
    #[serde(default = "default_idle_ttl")]
    pub idle_ttl_seconds: u64,
}

fn default_enabled() -> bool {
    true
}

pub fn default_policy() -> PolicyConfig {
    PolicyConfig::TokenBucket {
        rate: default_token_rate(),
        capacity: default_token_capacity(),
    }
}

fn default_cleanup_interval() -> u64 {
    60 // Clean up every minute
}

fn default_idle_ttl() -> u64 {
    300 // Remove state unused for 5 minutes
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            default_policy: default_policy(),
            routes: Vec::new(),
            cleanup_interval_seconds: default_cleanup_interval(),
            idle_ttl_seconds: default_idle_ttl(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_each_policy() {
        assert_eq!(PolicyConfig::AllowAll.build().unwrap().name(), "allow_all");
        assert_eq!(default_policy().build().unwrap().name(), "token_bucket");
        let window = PolicyConfig::SlidingWindow {
            max_requests: 5,
            window_ms: 1000,
        };
        assert_eq!(window.build().unwrap().name(), "sliding_window");
    }

    #[test]
    fn test_build_rejects_invalid_parameters() {
        let config = PolicyConfig::TokenBucket {
            rate: 0,
            capacity: 10,
        };
        assert!(config.build().is_err());
    }

    #[test]
    fn test_policy_config_deserializes_tagged() {
        let config: PolicyConfig =
            serde_json::from_str(r#"{"type":"sliding_window","max_requests":5}"#).unwrap();
        assert_eq!(
            config,
            PolicyConfig::SlidingWindow {
                max_requests: 5,
                window_ms: 1000
            }
        );

        let config: PolicyConfig = serde_json::from_str(r#"{"type":"allow_all"}"#).unwrap();
        assert_eq!(config, PolicyConfig::AllowAll);
    }

    #[test]
    fn test_route_policy_deserializes() {
        let json = r#"{
            "controller": "chat",
            "action": "group_chat",
            "policy": {"type": "token_bucket", "rate": 5, "capacity": 5}
        }"#;
        let route: RoutePolicyConfig = serde_json::from_str(json).unwrap();
        assert_eq!(route.controller, "chat");
        assert_eq!(
            route.policy,
            PolicyConfig::TokenBucket {
                rate: 5,
                capacity: 5
            }
        );
    }

    #[test]
    fn test_defaults() {
        let config = RateLimitConfig::default();
        assert!(config.enabled);
        assert!(config.routes.is_empty());
        assert_eq!(config.cleanup_interval_seconds, 60);
        assert_eq!(config.idle_ttl_seconds, 300);
    }
}

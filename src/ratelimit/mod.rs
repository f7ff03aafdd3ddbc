//! Admission control policies.
//!
//! Every inbound request is checked against the policy attached to its
//! route. Two algorithms are provided, a lazily refilled token bucket and a
//! sliding window log, both keyed by caller IP. The [`PolicyResolver`] keeps
//! exactly one policy instance per route.

mod config;
mod policy;
mod resolver;
mod sliding_window;
mod token_bucket;

pub use config::{default_policy, PolicyConfig, RateLimitConfig, RoutePolicyConfig};
pub use policy::{AdmissionPolicy, AllowAllPolicy, PolicyError};
pub use resolver::PolicyResolver;
pub use sliding_window::SlidingWindowPolicy;
pub use token_bucket::{TokenBucket, TokenBucketPolicy};

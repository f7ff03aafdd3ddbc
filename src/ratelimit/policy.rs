//! The admission policy contract.

use std::net::IpAddr;
use std::time::Duration;

use axum::http::StatusCode;
use thiserror::Error;

/// Errors raised while constructing a policy from configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PolicyError {
    #[error("{policy}: `{field}` must be greater than zero")]
    ZeroParameter {
        policy: &'static str,
        field: &'static str,
    },
}

/// Decides whether a caller may proceed.
///
/// One instance is shared by every caller of a route, so implementations
/// keep their per-caller state internally and must be safe to call from many
/// tasks at once. Evaluation is infallible: a policy either admits or denies.
pub trait AdmissionPolicy: Send + Sync {
    /// Short policy name used in logs and metrics labels.
    fn name(&self) -> &'static str;

    /// Record one request from `caller` and decide whether it is admitted.
    fn is_allowed(&self, caller: IpAddr) -> bool;

    /// Status written back when a request is denied.
    fn status_code(&self) -> StatusCode {
        StatusCode::TOO_MANY_REQUESTS
    }

    /// Human readable reason written back when a request is denied.
    fn blocked_reason(&self) -> String;

    /// Drop per-caller state that has been idle for at least `ttl`.
    /// Returns the number of callers evicted.
    fn evict_idle(&self, _ttl: Duration) -> usize {
        0
    }

    /// Number of callers currently tracked.
    fn tracked_callers(&self) -> usize {
        0
    }
}

/// Admits every request. Used as the last-resort fallback.
#[derive(Debug, Default, Clone, Copy)]
pub struct AllowAllPolicy;

impl AdmissionPolicy for AllowAllPolicy {
    fn name(&self) -> &'static str {
        "allow_all"
    }

    fn is_allowed(&self, _caller: IpAddr) -> bool {
        true
    }

    fn status_code(&self) -> StatusCode {
        StatusCode::OK
    }

    fn blocked_reason(&self) -> String {
        String::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    #[test]
    fn test_allow_all_admits_everything() {
        let policy = AllowAllPolicy;
        let ip = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1));

        for _ in 0..1000 {
            assert!(policy.is_allowed(ip));
        }
        assert_eq!(policy.evict_idle(Duration::ZERO), 0);
    }
}

//! Sliding window log limiter.
//!
//! Each caller keeps the instants of its admitted requests. On every check
//! the instants that fell out of the trailing window are dropped first, so the
//! stored log only ever covers `(now - window, now]`.

use std::collections::VecDeque;
use std::net::IpAddr;
use std::time::Duration;

use dashmap::DashMap;
use tokio::time::Instant;

use super::policy::{AdmissionPolicy, PolicyError};

#[derive(Debug)]
pub struct SlidingWindowPolicy {
    windows: DashMap<IpAddr, VecDeque<Instant>>,
    max_requests: u32,
    window: Duration,
}

impl SlidingWindowPolicy {
    pub fn new(max_requests: u32, window: Duration) -> Result<Self, PolicyError> {
        if max_requests == 0 {
            return Err(PolicyError::ZeroParameter {
                policy: "sliding_window",
                field: "max_requests",
            });
        }
        if window.is_zero() {
            return Err(PolicyError::ZeroParameter {
                policy: "sliding_window",
                field: "window_ms",
            });
        }

        Ok(Self {
            windows: DashMap::new(),
            max_requests,
            window,
        })
    }

    pub fn check_at(&self, caller: IpAddr, now: Instant) -> bool {
        let mut log = self.windows.entry(caller).or_default();
        prune(&mut log, now, self.window);

        if log.len() < self.max_requests as usize {
            log.push_back(now);
            true
        } else {
            false
        }
    }

    pub fn max_requests(&self) -> u32 {
        self.max_requests
    }

    pub fn window(&self) -> Duration {
        self.window
    }
}

fn prune(log: &mut VecDeque<Instant>, now: Instant, window: Duration) {
    while let Some(oldest) = log.front() {
        if now.saturating_duration_since(*oldest) >= window {
            log.pop_front();
        } else {
            break;
        }
    }
}

impl AdmissionPolicy for SlidingWindowPolicy {
    fn name(&self) -> &'static str {
        "sliding_window"
    }

    fn is_allowed(&self, caller: IpAddr) -> bool {
        self.check_at(caller, Instant::now())
    }

    fn blocked_reason(&self) -> String {
        format!(
            "Rate limit exceeded: at most {} requests per {} seconds.",
            self.max_requests,
            self.window.as_secs_f64()
        )
    }

    /// Callers whose log is empty after pruning are dropped; `ttl` is
    /// ignored because the window already bounds how long an entry matters.
    fn evict_idle(&self, _ttl: Duration) -> usize {
        let now = Instant::now();
        let before = self.windows.len();
        self.windows.retain(|_, log| {
            prune(log, now, self.window);
            !log.is_empty()
        });
        let removed = before.saturating_sub(self.windows.len());

        if removed > 0 {
            tracing::debug!(
                removed = removed,
                callers = self.windows.len(),
                "Cleaned up idle sliding windows"
            );
        }

        removed
    }

    fn tracked_callers(&self) -> usize {
        self.windows.len()
    }
}

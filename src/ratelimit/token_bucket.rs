//! Token Bucket algorithm implementation

use std::net::IpAddr;
use std::time::Duration;

use dashmap::DashMap;
use tokio::time::Instant;

use super::policy::{AdmissionPolicy, PolicyError};

/// Token Bucket for rate limiting.
///
/// Refill is lazy: tokens are topped up from the elapsed time on every
/// consume attempt, never by a background timer.
#[derive(Debug, Clone)]
pub struct TokenBucket {
    /// Current number of tokens, `0 <= tokens <= capacity`
    tokens: f64,
    /// Last refill instant
    last_refill: Instant,
    /// Maximum bucket capacity
    capacity: u32,
    /// Tokens added per second
    refill_rate: u32,
}

impl TokenBucket {
    /// Create a full token bucket
    pub fn new(capacity: u32, refill_rate: u32) -> Self {
        Self::new_at(capacity, refill_rate, Instant::now())
    }

    pub fn new_at(capacity: u32, refill_rate: u32, now: Instant) -> Self {
        Self {
            tokens: capacity as f64,
            last_refill: now,
            capacity,
            refill_rate,
        }
    }

    /// Try to consume one token from the bucket.
    /// Returns true if a token was available, false otherwise.
    pub fn try_consume(&mut self) -> bool {
        self.try_consume_at(Instant::now())
    }

    pub fn try_consume_at(&mut self, now: Instant) -> bool {
        self.refill(now);

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    fn refill(&mut self, now: Instant) {
        // Callers may race on `now`; an older instant adds nothing
        let elapsed = now.saturating_duration_since(self.last_refill);
        let refilled = self.tokens + elapsed.as_secs_f64() * self.refill_rate as f64;
        self.tokens = refilled.min(self.capacity as f64);
        self.last_refill = self.last_refill.max(now);
    }

    /// Whole tokens currently available (without refilling)
    pub fn available(&self) -> u32 {
        self.tokens.floor() as u32
    }

    /// Get the last activity time
    pub fn last_activity(&self) -> Instant {
        self.last_refill
    }
}

/// Per-caller token buckets sharing one capacity and refill rate.
#[derive(Debug)]
pub struct TokenBucketPolicy {
    buckets: DashMap<IpAddr, TokenBucket>,
    capacity: u32,
    refill_rate: u32,
}

impl TokenBucketPolicy {
    pub fn new(refill_rate: u32, capacity: u32) -> Result<Self, PolicyError> {
        if refill_rate == 0 {
            return Err(PolicyError::ZeroParameter {
                policy: "token_bucket",
                field: "rate",
            });
        }
        if capacity == 0 {
            return Err(PolicyError::ZeroParameter {
                policy: "token_bucket",
                field: "capacity",
            });
        }

        Ok(Self {
            buckets: DashMap::new(),
            capacity,
            refill_rate,
        })
    }

    pub fn check_at(&self, caller: IpAddr, now: Instant) -> bool {
        // The entry guard serializes refill + consume for this caller
        let mut bucket = self
            .buckets
            .entry(caller)
            .or_insert_with(|| TokenBucket::new_at(self.capacity, self.refill_rate, now));
        bucket.try_consume_at(now)
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    pub fn refill_rate(&self) -> u32 {
        self.refill_rate
    }
}

impl AdmissionPolicy for TokenBucketPolicy {
    fn name(&self) -> &'static str {
        "token_bucket"
    }

    fn is_allowed(&self, caller: IpAddr) -> bool {
        self.check_at(caller, Instant::now())
    }

    fn blocked_reason(&self) -> String {
        "Sorry, but you have exceeded the maximum number of requests per second.".to_string()
    }

    fn evict_idle(&self, ttl: Duration) -> usize {
        let now = Instant::now();
        let before = self.buckets.len();
        self.buckets
            .retain(|_, bucket| now.saturating_duration_since(bucket.last_activity()) < ttl);
        let removed = before.saturating_sub(self.buckets.len());

        if removed > 0 {
            tracing::debug!(
                removed = removed,
                buckets = self.buckets.len(),
                "Cleaned up idle token buckets"
            );
        }

        removed
    }

    fn tracked_callers(&self) -> usize {
        self.buckets.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn ip(last: u8) -> IpAddr {
        IpAddr::V4(Ipv4Addr::new(192, 168, 1, last))
    }

    #[test]
    fn test_token_bucket_basic() {
        let now = Instant::now();
        let mut bucket = TokenBucket::new_at(10, 10, now); // 10 capacity, 10/sec refill

        // Should be able to consume up to capacity
        for _ in 0..10 {
            assert!(bucket.try_consume_at(now));
        }

        // Should be empty now
        assert!(!bucket.try_consume_at(now));
    }

    #[test]
    fn test_token_bucket_never_exceeds_capacity() {
        let now = Instant::now();
        let mut bucket = TokenBucket::new_at(3, 100, now);

        assert!(bucket.try_consume_at(now + Duration::from_secs(60)));
        assert_eq!(bucket.available(), 2);
    }

    #[test]
    fn test_token_bucket_partial_refill() {
        let now = Instant::now();
        let mut bucket = TokenBucket::new_at(10, 10, now);
        for _ in 0..10 {
            assert!(bucket.try_consume_at(now));
        }

        // 10/sec -> one token every 100ms
        let later = now + Duration::from_millis(250);
        assert!(bucket.try_consume_at(later));
        assert!(bucket.try_consume_at(later));
        assert!(!bucket.try_consume_at(later));
    }

    #[test]
    fn test_token_bucket_ignores_stale_instant() {
        let now = Instant::now();
        let mut bucket = TokenBucket::new_at(1, 1, now + Duration::from_secs(5));

        assert!(bucket.try_consume_at(now));
        assert!(!bucket.try_consume_at(now));
        assert_eq!(bucket.last_activity(), now + Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn test_policy_refills_after_simulated_second() {
        let policy = TokenBucketPolicy::new(10, 10).unwrap();
        let caller = ip(1);

        for _ in 0..10 {
            assert!(policy.is_allowed(caller));
        }
        assert!(!policy.is_allowed(caller));

        tokio::time::advance(Duration::from_secs(1)).await;

        let admitted = (0..20).filter(|_| policy.is_allowed(caller)).count();
        assert_eq!(admitted, 10);
    }

    #[test]
    fn test_policy_tracks_callers_separately() {
        let policy = TokenBucketPolicy::new(1, 2).unwrap();
        let now = Instant::now();

        assert!(policy.check_at(ip(1), now));
        assert!(policy.check_at(ip(1), now));
        assert!(!policy.check_at(ip(1), now));

        assert!(policy.check_at(ip(2), now));
        assert_eq!(policy.tracked_callers(), 2);
    }

    #[test]
    fn test_policy_rejects_zero_parameters() {
        assert!(matches!(
            TokenBucketPolicy::new(0, 10),
            Err(PolicyError::ZeroParameter { field: "rate", .. })
        ));
        assert!(matches!(
            TokenBucketPolicy::new(10, 0),
            Err(PolicyError::ZeroParameter { field: "capacity", .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_evict_idle_buckets() {
        let policy = TokenBucketPolicy::new(10, 10).unwrap();
        policy.is_allowed(ip(1));

        tokio::time::advance(Duration::from_secs(30)).await;
        policy.is_allowed(ip(2));

        let removed = policy.evict_idle(Duration::from_secs(10));
        assert_eq!(removed, 1);
        assert_eq!(policy.tracked_callers(), 1);
    }
}

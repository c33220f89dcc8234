//! Per-caller admission control
//!
//! A token-bucket rate limiter keyed by caller identifier. Buckets are
//! created lazily on first sight of an identifier and swept once idle longer
//! than the configured staleness. `check` is synchronous and never performs
//! I/O, so it is safe to consult at the top of every turn.
//!
//! Instances are constructed explicitly and injected where needed; there is
//! no process-global limiter.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::config::RateLimitConfig;

/// Outcome of an admission check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateDecision {
    /// Whether the request may proceed
    pub allowed: bool,
    /// Tokens left in the current window after this check
    pub remaining: usize,
    /// When the current window resets
    pub reset_at: DateTime<Utc>,
    /// How long to wait before retrying, present only on refusal
    pub retry_after: Option<Duration>,
}

struct Bucket {
    window_start: Instant,
    used: usize,
    last_seen: Instant,
}

/// Token-bucket rate limiter, one bucket per identifier.
pub struct RateLimiter {
    config: RateLimitConfig,
    buckets: Mutex<HashMap<String, Bucket>>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            buckets: Mutex::new(HashMap::new()),
        }
    }

    /// Window capacity including any burst allowance.
    fn capacity(&self) -> usize {
        self.config.max_requests + self.config.burst_size.unwrap_or(0)
    }

    /// Atomically consume a token for `id` if one is available.
    ///
    /// Exactly `capacity()` consecutive checks succeed within one window; the
    /// next is refused with a positive `retry_after`.
    pub fn check(&self, id: &str) -> RateDecision {
        let now = Instant::now();
        let mut buckets = self.buckets.lock().unwrap();
        let bucket = buckets.entry(id.to_string()).or_insert_with(|| Bucket {
            window_start: now,
            used: 0,
            last_seen: now,
        });
        bucket.last_seen = now;

        let elapsed = now.duration_since(bucket.window_start);
        if elapsed >= self.config.window {
            bucket.window_start = now;
            bucket.used = 0;
        }

        let window_remaining = self
            .config
            .window
            .saturating_sub(now.duration_since(bucket.window_start));
        let reset_at = Utc::now()
            + chrono::Duration::from_std(window_remaining).unwrap_or(chrono::Duration::zero());

        let capacity = self.capacity();
        if bucket.used < capacity {
            bucket.used += 1;
            RateDecision {
                allowed: true,
                remaining: capacity - bucket.used,
                reset_at,
                retry_after: None,
            }
        } else {
            debug!(id = %id, "rate limit refused request");
            RateDecision {
                allowed: false,
                remaining: 0,
                reset_at,
                retry_after: Some(window_remaining.max(Duration::from_millis(1))),
            }
        }
    }

    /// Drop buckets idle longer than the configured staleness. Returns how
    /// many were removed.
    pub fn sweep(&self) -> usize {
        let now = Instant::now();
        let stale_after = self.config.stale_after;
        let mut buckets = self.buckets.lock().unwrap();
        let before = buckets.len();
        buckets.retain(|_, b| now.duration_since(b.last_seen) < stale_after);
        before - buckets.len()
    }

    /// Number of live buckets, for health checks.
    pub fn bucket_count(&self) -> usize {
        self.buckets.lock().unwrap().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(max_requests: usize, window: Duration) -> RateLimitConfig {
        RateLimitConfig {
            max_requests,
            window,
            burst_size: None,
            stale_after: Duration::from_secs(600),
        }
    }

    #[test]
    fn exactly_n_requests_pass_per_window() {
        let limiter = RateLimiter::new(config(3, Duration::from_secs(60)));
        for i in 0..3 {
            let decision = limiter.check("caller-1");
            assert!(decision.allowed, "request {i} should pass");
            assert_eq!(decision.remaining, 2 - i);
        }
        let refused = limiter.check("caller-1");
        assert!(!refused.allowed);
        assert!(refused.retry_after.unwrap() > Duration::ZERO);
    }

    #[test]
    fn identifiers_have_independent_buckets() {
        let limiter = RateLimiter::new(config(1, Duration::from_secs(60)));
        assert!(limiter.check("a").allowed);
        assert!(!limiter.check("a").allowed);
        assert!(limiter.check("b").allowed);
    }

    #[test]
    fn window_expiry_refills() {
        let limiter = RateLimiter::new(config(1, Duration::from_millis(20)));
        assert!(limiter.check("caller").allowed);
        assert!(!limiter.check("caller").allowed);
        std::thread::sleep(Duration::from_millis(25));
        assert!(limiter.check("caller").allowed);
    }

    #[test]
    fn burst_extends_capacity() {
        let limiter = RateLimiter::new(RateLimitConfig {
            max_requests: 2,
            window: Duration::from_secs(60),
            burst_size: Some(1),
            stale_after: Duration::from_secs(600),
        });
        assert!(limiter.check("c").allowed);
        assert!(limiter.check("c").allowed);
        assert!(limiter.check("c").allowed);
        assert!(!limiter.check("c").allowed);
    }

    #[test]
    fn sweep_drops_stale_buckets() {
        let limiter = RateLimiter::new(RateLimitConfig {
            max_requests: 1,
            window: Duration::from_millis(5),
            burst_size: None,
            stale_after: Duration::from_millis(10),
        });
        limiter.check("old");
        assert_eq!(limiter.bucket_count(), 1);
        std::thread::sleep(Duration::from_millis(15));
        limiter.check("fresh");
        assert_eq!(limiter.sweep(), 1);
        assert_eq!(limiter.bucket_count(), 1);
    }

    #[test]
    fn concurrent_checks_conserve_tokens() {
        use std::sync::Arc;
        let limiter = Arc::new(RateLimiter::new(config(50, Duration::from_secs(60))));
        let mut handles = Vec::new();
        for _ in 0..8 {
            let limiter = Arc::clone(&limiter);
            handles.push(std::thread::spawn(move || {
                (0..25)
                    .filter(|_| limiter.check("shared").allowed)
                    .count()
            }));
        }
        let allowed: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(allowed, 50);
    }
}

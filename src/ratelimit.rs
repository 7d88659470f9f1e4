//! Fixed-window rate limiter.
//!
//! Time is divided into equal windows of `window_secs`; each (key, window)
//! pair gets an independent counter that expires at the window boundary.
//! Boundary bursting (up to 2×max across two adjacent windows) is accepted
//! by design; the store primitive is a TTL counter, not a time-ordered log.

use std::sync::Arc;

use chrono::Utc;

use crate::errors::AppError;
use crate::store::keyvalue::CounterStore;

pub struct RateLimiter {
    counters: Arc<dyn CounterStore>,
}

impl RateLimiter {
    pub fn new(counters: Arc<dyn CounterStore>) -> Self {
        Self { counters }
    }

    /// Admit or reject one action under `action_key`. At most `max` actions
    /// are admitted per window; the check-then-increment is atomic per key.
    pub async fn allow(
        &self,
        action_key: &str,
        max: u64,
        window_secs: u64,
    ) -> Result<bool, AppError> {
        let now = Utc::now().timestamp();
        let key = bucket_key(action_key, now, window_secs);
        let ttl = ttl_to_window_end(now, window_secs);
        let admitted = self.counters.try_increment(&key, max, ttl).await?;
        if !admitted {
            tracing::warn!(key = action_key, max, window_secs, "rate limit exceeded");
        }
        Ok(admitted)
    }
}

/// `action_key + ":" + floor(now / window_secs)`.
pub fn bucket_key(action_key: &str, now: i64, window_secs: u64) -> String {
    format!("{}:{}", action_key, window_index(now, window_secs))
}

pub fn window_index(now: i64, window_secs: u64) -> i64 {
    now.div_euclid(window_secs as i64)
}

/// Seconds until the current window rolls over; the counter key dies then.
fn ttl_to_window_end(now: i64, window_secs: u64) -> u64 {
    let w = window_secs as i64;
    let end = (window_index(now, window_secs) + 1) * w;
    (end - now).max(1) as u64
}

/// How long a rejected caller should wait: the remainder of the current
/// window. Feeds the Retry-After header on 429 responses.
pub fn retry_after_secs(window_secs: u64) -> u64 {
    ttl_to_window_end(Utc::now().timestamp(), window_secs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::keyvalue::MemoryKv;

    #[test]
    fn window_math() {
        assert_eq!(window_index(0, 60), 0);
        assert_eq!(window_index(59, 60), 0);
        assert_eq!(window_index(60, 60), 1);
        assert_eq!(window_index(1_700_000_123, 60), 28_333_335);
        assert_eq!(bucket_key("vote:uid:7:q:5", 120, 60), "vote:uid:7:q:5:2");
    }

    #[test]
    fn ttl_reaches_window_end() {
        assert_eq!(ttl_to_window_end(0, 60), 60);
        assert_eq!(ttl_to_window_end(59, 60), 1);
        assert_eq!(ttl_to_window_end(61, 60), 59);
    }

    #[test]
    fn retry_after_stays_within_the_window() {
        for window in [1u64, 60, 90, 3600] {
            let secs = retry_after_secs(window);
            assert!(secs >= 1 && secs <= window, "window {}: got {}", window, secs);
        }
    }

    #[tokio::test]
    async fn burst_admits_exactly_max() {
        let limiter = RateLimiter::new(Arc::new(MemoryKv::new()));
        let mut admitted = 0;
        // hour-long window so the burst cannot straddle a boundary mid-test
        for _ in 0..15 {
            if limiter.allow("burst", 10, 3600).await.unwrap() {
                admitted += 1;
            }
        }
        assert_eq!(admitted, 10);
    }

    #[tokio::test]
    async fn keys_are_independent() {
        let limiter = RateLimiter::new(Arc::new(MemoryKv::new()));
        assert!(!limiter.allow("a", 0, 60).await.unwrap());
        assert!(limiter.allow("b", 1, 60).await.unwrap());
    }

    #[tokio::test]
    async fn concurrent_burst_admits_exactly_max() {
        let limiter = Arc::new(RateLimiter::new(Arc::new(MemoryKv::new())));
        let mut handles = Vec::new();
        for _ in 0..25 {
            let limiter = limiter.clone();
            handles.push(tokio::spawn(
                async move { limiter.allow("c", 10, 3600).await.unwrap() },
            ));
        }
        let mut admitted = 0;
        for h in handles {
            if h.await.unwrap() {
                admitted += 1;
            }
        }
        assert_eq!(admitted, 10);
    }
}

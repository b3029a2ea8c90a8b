//! Sliding-window admission control for the login endpoint.
//!
//! In-process and best-effort: a single process owns all login traffic, so no
//! external coordination is needed. One mutex serializes every window; login
//! volume is low enough that finer locking would buy nothing, and unrelated
//! request handling never touches it.

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum RateLimitDecision {
    Allowed,
    Limited { retry_after: u64 },
}

pub(crate) struct SlidingWindowRateLimiter {
    limit: usize,
    window: Duration,
    events: Mutex<HashMap<String, VecDeque<Instant>>>,
}

impl SlidingWindowRateLimiter {
    pub(crate) fn new(limit: usize, window: Duration) -> Self {
        Self {
            limit: limit.max(1),
            window: window.max(Duration::from_secs(1)),
            events: Mutex::new(HashMap::new()),
        }
    }

    /// Admit or deny one attempt for `key`, recording it when admitted.
    pub(crate) async fn allow(&self, key: &str) -> RateLimitDecision {
        self.allow_at(key, Instant::now()).await
    }

    async fn allow_at(&self, key: &str, now: Instant) -> RateLimitDecision {
        let mut events = self.events.lock().await;
        let queue = events.entry(key.to_string()).or_default();

        // Entries are appended in non-decreasing order, so expired ones can
        // only be at the front.
        while let Some(oldest) = queue.front() {
            if now.duration_since(*oldest) > self.window {
                queue.pop_front();
            } else {
                break;
            }
        }

        if queue.len() >= self.limit {
            if let Some(oldest) = queue.front().copied() {
                let elapsed = now.duration_since(oldest);
                let retry_after = self.window.saturating_sub(elapsed).as_secs().max(1);
                return RateLimitDecision::Limited { retry_after };
            }
        }

        queue.push_back(now);
        RateLimitDecision::Allowed
    }

    /// Clear a key's window outright. Called after a successful login so the
    /// next legitimate attempt from the same client is not penalized. A no-op
    /// for unknown keys.
    pub(crate) async fn reset(&self, key: &str) {
        let mut events = self.events.lock().await;
        events.remove(key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn sixth_attempt_within_window_is_denied() {
        let limiter = SlidingWindowRateLimiter::new(5, Duration::from_secs(900));
        for _ in 0..5 {
            assert_eq!(limiter.allow("1.2.3.4").await, RateLimitDecision::Allowed);
        }
        match limiter.allow("1.2.3.4").await {
            RateLimitDecision::Limited { retry_after } => {
                assert!(retry_after >= 1);
                assert!(retry_after <= 900);
            }
            RateLimitDecision::Allowed => panic!("sixth attempt must be denied"),
        }
    }

    #[tokio::test]
    async fn keys_are_independent() {
        let limiter = SlidingWindowRateLimiter::new(1, Duration::from_secs(900));
        assert_eq!(limiter.allow("1.2.3.4").await, RateLimitDecision::Allowed);
        assert_eq!(limiter.allow("5.6.7.8").await, RateLimitDecision::Allowed);
        assert!(matches!(
            limiter.allow("1.2.3.4").await,
            RateLimitDecision::Limited { .. }
        ));
    }

    #[tokio::test]
    async fn reset_readmits_immediately() {
        let limiter = SlidingWindowRateLimiter::new(2, Duration::from_secs(900));
        limiter.allow("key").await;
        limiter.allow("key").await;
        assert!(matches!(
            limiter.allow("key").await,
            RateLimitDecision::Limited { .. }
        ));

        limiter.reset("key").await;
        assert_eq!(limiter.allow("key").await, RateLimitDecision::Allowed);
    }

    #[tokio::test]
    async fn reset_of_unknown_key_is_a_noop() {
        let limiter = SlidingWindowRateLimiter::new(2, Duration::from_secs(900));
        limiter.reset("never-seen").await;
        assert_eq!(
            limiter.allow("never-seen").await,
            RateLimitDecision::Allowed
        );
    }

    #[tokio::test]
    async fn expired_entries_are_pruned() {
        let limiter = SlidingWindowRateLimiter::new(2, Duration::from_secs(10));
        let start = Instant::now();
        assert_eq!(
            limiter.allow_at("key", start).await,
            RateLimitDecision::Allowed
        );
        assert_eq!(
            limiter.allow_at("key", start).await,
            RateLimitDecision::Allowed
        );
        assert!(matches!(
            limiter.allow_at("key", start).await,
            RateLimitDecision::Limited { .. }
        ));

        // Both entries age out of the window.
        let later = start + Duration::from_secs(11);
        assert_eq!(
            limiter.allow_at("key", later).await,
            RateLimitDecision::Allowed
        );
    }

    #[tokio::test]
    async fn retry_after_shrinks_as_the_window_slides() {
        let limiter = SlidingWindowRateLimiter::new(1, Duration::from_secs(100));
        let start = Instant::now();
        limiter.allow_at("key", start).await;

        let decision = limiter.allow_at("key", start + Duration::from_secs(40)).await;
        match decision {
            RateLimitDecision::Limited { retry_after } => assert_eq!(retry_after, 60),
            RateLimitDecision::Allowed => panic!("attempt inside the window must be denied"),
        }
    }

    #[tokio::test]
    async fn zero_limit_is_clamped_to_one() {
        let limiter = SlidingWindowRateLimiter::new(0, Duration::from_secs(10));
        assert_eq!(limiter.allow("key").await, RateLimitDecision::Allowed);
        assert!(matches!(
            limiter.allow("key").await,
            RateLimitDecision::Limited { .. }
        ));
    }
}

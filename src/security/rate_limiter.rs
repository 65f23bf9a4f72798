//! Sliding-window abuse rate limiting.
//!
//! A thin façade over [`RateLimitStore`]: the store owns the
//! count-and-record atomicity, this type owns key construction and
//! policy application. Stateless between calls.

use chrono::Duration;
use std::sync::Arc;

use crate::clock::Clock;
use crate::store::{RateLimitDecision, RateLimitStore, StoreResult};

/// Sliding-window rate limiter.
#[derive(Clone)]
pub struct RateLimiter {
    store: Arc<dyn RateLimitStore>,
    clock: Arc<dyn Clock>,
}

impl RateLimiter {
    pub fn new(store: Arc<dyn RateLimitStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Key for login attempts from one source address.
    pub fn login_key(ip: &str) -> String {
        format!("login:{ip}")
    }

    /// Key for password-reset requests for one email.
    pub fn reset_key(email: &str) -> String {
        format!("reset:{}", email.to_lowercase())
    }

    /// Key for verification-mail resends for one email.
    pub fn verify_email_key(email: &str) -> String {
        format!("verify_email:{}", email.to_lowercase())
    }

    /// Check-and-record: allows and records the attempt, or denies and
    /// records nothing. An attempt older than `window` never counts.
    pub async fn allow(
        &self,
        key: &str,
        limit: u32,
        window: Duration,
    ) -> StoreResult<RateLimitDecision> {
        let decision = self
            .store
            .try_acquire(key, limit, window, self.clock.now())
            .await?;
        if let RateLimitDecision::Exhausted { retry_after } = decision {
            log::warn!(
                "rate limit exhausted for {key} (limit {limit}), retry in {}s",
                retry_after.num_seconds()
            );
        }
        Ok(decision)
    }

    /// Whether another attempt would currently be allowed, without
    /// recording anything.
    pub async fn would_allow(&self, key: &str, limit: u32, window: Duration) -> StoreResult<bool> {
        let used = self
            .store
            .count_in_window(key, window, self.clock.now())
            .await?;
        Ok(used < u64::from(limit))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::store::MemoryStore;
    use chrono::Utc;

    fn limiter() -> (RateLimiter, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let limiter = RateLimiter::new(Arc::new(MemoryStore::new()), clock.clone());
        (limiter, clock)
    }

    #[tokio::test]
    async fn test_six_calls_at_limit_five() {
        let (limiter, _clock) = limiter();
        let window = Duration::seconds(60);

        let mut outcomes = vec![];
        for _ in 0..6 {
            let decision = limiter.allow("login:1.2.3.4", 5, window).await.unwrap();
            outcomes.push(decision.is_allowed());
        }
        assert_eq!(outcomes, vec![true, true, true, true, true, false]);
    }

    #[tokio::test]
    async fn test_window_elapse_frees_budget() {
        let (limiter, clock) = limiter();
        let window = Duration::seconds(60);

        for _ in 0..5 {
            assert!(limiter
                .allow("login:1.2.3.4", 5, window)
                .await
                .unwrap()
                .is_allowed());
        }
        assert!(!limiter
            .allow("login:1.2.3.4", 5, window)
            .await
            .unwrap()
            .is_allowed());

        clock.advance(Duration::seconds(61));
        assert!(limiter
            .allow("login:1.2.3.4", 5, window)
            .await
            .unwrap()
            .is_allowed());
    }

    #[tokio::test]
    async fn test_keys_are_independent() {
        let (limiter, _clock) = limiter();
        let window = Duration::seconds(60);

        for _ in 0..3 {
            limiter.allow("login:1.1.1.1", 3, window).await.unwrap();
        }
        assert!(!limiter
            .allow("login:1.1.1.1", 3, window)
            .await
            .unwrap()
            .is_allowed());
        assert!(limiter
            .allow("login:2.2.2.2", 3, window)
            .await
            .unwrap()
            .is_allowed());
    }

    #[tokio::test]
    async fn test_would_allow_does_not_record() {
        let (limiter, _clock) = limiter();
        let window = Duration::seconds(60);

        for _ in 0..10 {
            assert!(limiter.would_allow("reset:a@b.c", 1, window).await.unwrap());
        }
        assert!(limiter
            .allow("reset:a@b.c", 1, window)
            .await
            .unwrap()
            .is_allowed());
        assert!(!limiter.would_allow("reset:a@b.c", 1, window).await.unwrap());
    }

    #[test]
    fn test_key_builders_lowercase_email() {
        assert_eq!(RateLimiter::reset_key("User@Example.COM"), "reset:user@example.com");
        assert_eq!(RateLimiter::login_key("10.0.0.1"), "login:10.0.0.1");
    }
}

//! In-memory sliding-window rate limiter.

#![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap for simplicity

use appointments_core::{BookingError, RateDecision, RateLimiter};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;

/// In-memory [`RateLimiter`].
///
/// Keeps the instant of every counted request per key and drops the ones that
/// have left the window on each check.
#[derive(Clone, Debug, Default)]
pub struct InMemoryRateLimiter {
    attempts: Arc<Mutex<HashMap<String, Vec<Instant>>>>,
    unavailable: Arc<AtomicBool>,
}

impl InMemoryRateLimiter {
    /// Create an empty limiter.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent call fail with `ServiceUnavailable` (or succeed again).
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Requests currently counted for `key`.
    #[must_use]
    pub fn count(&self, key: &str) -> usize {
        self.attempts.lock().unwrap().get(key).map_or(0, Vec::len)
    }

    fn check(&self, key: &str, max_requests: u32, window: Duration) -> Result<RateDecision, BookingError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(BookingError::ServiceUnavailable("rate limiter unreachable".to_string()));
        }

        let now = Instant::now();
        let mut attempts = self.attempts.lock().unwrap();
        let entries = attempts.entry(key.to_string()).or_default();
        entries.retain(|t| now.duration_since(*t) < window);

        let count = u32::try_from(entries.len()).unwrap_or(u32::MAX);
        if count >= max_requests {
            let oldest = entries.first().copied().unwrap_or(now);
            let remaining = window.saturating_sub(now.duration_since(oldest));
            return Err(BookingError::TooManyRequests {
                retry_after: (remaining.as_secs() + u64::from(remaining.subsec_nanos() > 0)).max(1),
            });
        }

        entries.push(now);
        Ok(RateDecision {
            count: count + 1,
            remaining: max_requests - count - 1,
        })
    }
}

impl RateLimiter for InMemoryRateLimiter {
    fn check_and_record<'a>(
        &'a self,
        key: &'a str,
        max_requests: u32,
        window: Duration,
    ) -> Pin<Box<dyn Future<Output = Result<RateDecision, BookingError>> + Send + 'a>> {
        let result = self.check(key, max_requests, window);
        Box::pin(async move { result })
    }

    fn reset<'a>(&'a self, key: &'a str) -> Pin<Box<dyn Future<Output = Result<(), BookingError>> + Send + 'a>> {
        self.attempts.lock().unwrap().remove(key);
        Box::pin(async { Ok(()) })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_limit_then_window_slides() {
        let limiter = InMemoryRateLimiter::new();
        let window = Duration::from_secs(60);

        for n in 1..=3 {
            let decision = limiter.check_and_record("k", 3, window).await.unwrap();
            assert_eq!(decision.count, n);
        }

        let err = limiter.check_and_record("k", 3, window).await.unwrap_err();
        assert_eq!(err, BookingError::TooManyRequests { retry_after: 60 });

        tokio::time::advance(Duration::from_secs(61)).await;
        assert!(limiter.check_and_record("k", 3, window).await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_after_rounds_up() {
        let limiter = InMemoryRateLimiter::new();
        let window = Duration::from_secs(60);
        limiter.check_and_record("k", 1, window).await.unwrap();

        tokio::time::advance(Duration::from_millis(500)).await;
        let err = limiter.check_and_record("k", 1, window).await.unwrap_err();
        assert_eq!(err, BookingError::TooManyRequests { retry_after: 60 });

        tokio::time::advance(Duration::from_millis(59_000)).await;
        let err = limiter.check_and_record("k", 1, window).await.unwrap_err();
        assert_eq!(err, BookingError::TooManyRequests { retry_after: 1 });
    }

    #[tokio::test]
    async fn test_keys_are_independent() {
        let limiter = InMemoryRateLimiter::new();
        let window = Duration::from_secs(60);
        limiter.check_and_record("a", 1, window).await.unwrap();
        assert!(limiter.check_and_record("a", 1, window).await.is_err());
        assert!(limiter.check_and_record("b", 1, window).await.is_ok());

        limiter.reset("a").await.unwrap();
        assert!(limiter.check_and_record("a", 1, window).await.is_ok());
    }
}

//! Redis-based rate limiter implementation.
//!
//! Sliding window with sorted sets:
//! 1. Remove entries outside the window (ZREMRANGEBYSCORE)
//! 2. Count remaining entries (ZCARD)
//! 3. Record this request (ZADD)
//! 4. Refresh the key's TTL (EXPIRE)
//!
//! All four run in one atomic pipeline, so concurrent requests cannot both
//! slip under the limit.

use appointments_core::{BookingError, RateDecision, RateLimiter};
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// `Redis`-based rate limiter using sliding window algorithm.
///
/// # Example
///
/// ```no_run
/// use appointments_core::RateLimiter;
/// use appointments_redis::{RedisRateLimiter, connect};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let limiter = RedisRateLimiter::new(connect("redis://127.0.0.1:6379").await?);
///
/// // 20 requests per minute
/// limiter.check_and_record("create_appointment:203.0.113.7", 20, std::time::Duration::from_secs(60)).await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct RedisRateLimiter {
    /// Connection manager for connection pooling.
    conn_manager: ConnectionManager,
    /// Disambiguates requests recorded in the same millisecond.
    sequence: Arc<AtomicU64>,
}

impl RedisRateLimiter {
    /// Create a rate limiter on an existing connection.
    #[must_use]
    pub fn new(conn_manager: ConnectionManager) -> Self {
        Self {
            conn_manager,
            sequence: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Get the `Redis` key for rate limiting.
    fn rate_limit_key(key: &str) -> String {
        format!("rate_limit:{key}")
    }

    /// Get current timestamp in milliseconds.
    #[allow(clippy::cast_possible_truncation)] // Safe: timestamps fit in u64 until year 2554
    fn current_timestamp_ms() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or(Duration::ZERO)
            .as_millis() as u64
    }

    fn unavailable(err: &redis::RedisError) -> BookingError {
        BookingError::ServiceUnavailable(format!("Rate limiter unavailable: {err}"))
    }
}

impl RateLimiter for RedisRateLimiter {
    fn check_and_record<'a>(
        &'a self,
        key: &'a str,
        max_requests: u32,
        window: Duration,
    ) -> Pin<Box<dyn Future<Output = Result<RateDecision, BookingError>> + Send + 'a>> {
        Box::pin(async move {
            let mut conn = self.conn_manager.clone();
            let rate_key = Self::rate_limit_key(key);
            let now_ms = Self::current_timestamp_ms();
            #[allow(clippy::cast_possible_truncation)] // Safe: rate limit windows are small durations
            let window_ms = window.as_millis() as u64;
            let window_start = now_ms.saturating_sub(window_ms);
            let member = format!("{now_ms}-{}", self.sequence.fetch_add(1, Ordering::Relaxed));
            let ttl_seconds = i64::try_from(window.as_secs().saturating_add(1)).unwrap_or(i64::MAX);

            // Count is taken before this request is added.
            let (count,): (u64,) = redis::pipe()
                .atomic()
                .zrembyscore(&rate_key, 0, window_start)
                .ignore()
                .zcard(&rate_key)
                .zadd(&rate_key, &member, now_ms)
                .ignore()
                .expire(&rate_key, ttl_seconds)
                .ignore()
                .query_async(&mut conn)
                .await
                .map_err(|e| {
                    tracing::warn!(error = %e, key = %key, "Rate limiter pipeline failed");
                    Self::unavailable(&e)
                })?;

            if count >= u64::from(max_requests) {
                tracing::warn!(
                    rate_limit_exceeded = true,
                    key = %key,
                    requests = count + 1,
                    max_requests,
                    window_ms,
                    "Rate limit exceeded"
                );
                return Err(BookingError::TooManyRequests {
                    retry_after: window.as_secs().max(1),
                });
            }

            let used = u32::try_from(count + 1).unwrap_or(u32::MAX);
            tracing::debug!(key = %key, requests = used, max_requests, "Rate limit check passed");
            Ok(RateDecision {
                count: used,
                remaining: max_requests.saturating_sub(used),
            })
        })
    }

    fn reset<'a>(&'a self, key: &'a str) -> Pin<Box<dyn Future<Output = Result<(), BookingError>> + Send + 'a>> {
        Box::pin(async move {
            let mut conn = self.conn_manager.clone();
            let _: () = conn
                .del(Self::rate_limit_key(key))
                .await
                .map_err(|e| Self::unavailable(&e))?;

            tracing::info!(key = %key, "Reset rate limit");
            Ok(())
        })
    }
}

impl std::fmt::Debug for RedisRateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisRateLimiter").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connect;

    // Note: These tests require a running Redis instance
    // Run with: docker run -d -p 6379:6379 redis:7-alpine

    fn unique(name: &str) -> String {
        format!("test:{name}:{}", chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default())
    }

    #[tokio::test]
    #[ignore] // Requires Redis running
    #[allow(clippy::unwrap_used)]
    async fn test_rate_limit_blocks_over_limit() {
        let limiter = RedisRateLimiter::new(connect("redis://127.0.0.1:6379").await.unwrap());
        let key = unique("block");

        for i in 1..=5 {
            let decision = limiter
                .check_and_record(&key, 5, Duration::from_secs(60))
                .await
                .unwrap();
            assert_eq!(decision.count, i);
        }

        let result = limiter.check_and_record(&key, 5, Duration::from_secs(60)).await;
        assert_eq!(result, Err(BookingError::TooManyRequests { retry_after: 60 }));

        limiter.reset(&key).await.unwrap();
    }

    #[tokio::test]
    #[ignore] // Requires Redis running
    #[allow(clippy::unwrap_used)]
    async fn test_rate_limit_sliding_window() {
        let limiter = RedisRateLimiter::new(connect("redis://127.0.0.1:6379").await.unwrap());
        let key = unique("sliding");

        for _ in 0..3 {
            limiter.check_and_record(&key, 3, Duration::from_secs(2)).await.unwrap();
        }
        assert!(limiter.check_and_record(&key, 3, Duration::from_secs(2)).await.is_err());

        tokio::time::sleep(Duration::from_secs(3)).await;

        let result = limiter.check_and_record(&key, 3, Duration::from_secs(2)).await;
        assert!(result.is_ok(), "Should be allowed after window expires");

        limiter.reset(&key).await.unwrap();
    }

    #[tokio::test]
    #[ignore] // Requires Redis running
    #[allow(clippy::unwrap_used)]
    async fn test_rate_limit_reset() {
        let limiter = RedisRateLimiter::new(connect("redis://127.0.0.1:6379").await.unwrap());
        let key = unique("reset");

        limiter.check_and_record(&key, 1, Duration::from_secs(60)).await.unwrap();
        assert!(limiter.check_and_record(&key, 1, Duration::from_secs(60)).await.is_err());

        limiter.reset(&key).await.unwrap();
        assert!(limiter.check_and_record(&key, 1, Duration::from_secs(60)).await.is_ok());

        limiter.reset(&key).await.unwrap();
    }
}

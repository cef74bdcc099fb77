//! Rate limiter collaborator.
//!
//! Requests are counted per key (endpoint identity plus client) in a sliding
//! window. A request over the limit gets a distinct
//! [`BookingError::TooManyRequests`] signal, never a generic failure.

use crate::error::BookingError;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

/// Result of an allowed request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateDecision {
    /// Requests counted in the window, this one included.
    pub count: u32,
    /// Requests still allowed in the window.
    pub remaining: u32,
}

/// Sliding-window rate limiter.
///
/// # Example
///
/// ```no_run
/// use appointments_core::RateLimiter;
/// use std::time::Duration;
///
/// # async fn example(limiter: &dyn RateLimiter) -> Result<(), appointments_core::BookingError> {
/// // 20 requests per minute per client
/// limiter
///     .check_and_record("create_appointment:203.0.113.7", 20, Duration::from_secs(60))
///     .await?;
/// # Ok(())
/// # }
/// ```
pub trait RateLimiter: Send + Sync {
    /// Check the limit for `key` and count this request if allowed.
    ///
    /// # Errors
    ///
    /// - `TooManyRequests` if `max_requests` were already counted in `window`
    /// - `ServiceUnavailable` if the backend cannot be reached
    fn check_and_record<'a>(
        &'a self,
        key: &'a str,
        max_requests: u32,
        window: Duration,
    ) -> Pin<Box<dyn Future<Output = Result<RateDecision, BookingError>> + Send + 'a>>;

    /// Forget every request counted for `key`.
    ///
    /// # Errors
    ///
    /// `ServiceUnavailable` if the backend cannot be reached.
    fn reset<'a>(&'a self, key: &'a str) -> Pin<Box<dyn Future<Output = Result<(), BookingError>> + Send + 'a>>;
}

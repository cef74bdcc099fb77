//! Backoff for transient backend failures.
//!
//! Two places wait out an unreachable backend:
//!
//! - worker loops, which back off after a store outage before polling again
//!   (see [`WorkerPoolConfig::error_backoff`](crate::worker::WorkerPoolConfig))
//! - process startup, which retries the first connection to Postgres and Redis
//!   with [`retry_with_backoff`]
//!
//! # Example
//!
//! ```rust
//! use appointments_runtime::retry::{RetryPolicy, retry_with_backoff};
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), String> {
//! let policy = RetryPolicy::builder()
//!     .max_retries(5)
//!     .initial_delay(Duration::from_millis(100))
//!     .max_delay(Duration::from_secs(10))
//!     .multiplier(2.0)
//!     .build();
//!
//! let pool_size = retry_with_backoff(&policy, "connect", |_: &String| true, || async {
//!     Ok::<_, String>(4)
//! })
//! .await?;
//! # Ok(())
//! # }
//! ```

use std::time::Duration;
use tokio::time::sleep;

/// Backoff schedule.
///
/// # Default Values
///
/// - `max_retries`: 3
/// - `initial_delay`: 5 seconds
/// - `max_delay`: 60 seconds
/// - `multiplier`: 1.0 (fixed delay)
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub max_retries: usize,
    /// Delay before the first retry
    pub initial_delay: Duration,
    /// Cap on any single delay
    pub max_delay: Duration,
    /// Growth factor per retry; 1.0 keeps the delay fixed
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::fixed(Duration::from_secs(5))
    }
}

impl RetryPolicy {
    /// Create a new policy builder.
    #[must_use]
    pub const fn builder() -> RetryPolicyBuilder {
        RetryPolicyBuilder {
            max_retries: None,
            initial_delay: None,
            max_delay: None,
            multiplier: None,
        }
    }

    /// Same delay before every retry.
    #[must_use]
    pub const fn fixed(delay: Duration) -> Self {
        Self {
            max_retries: 3,
            initial_delay: delay,
            max_delay: Duration::from_secs(60),
            multiplier: 1.0,
        }
    }

    /// Delay before retry number `attempt` (zero-based).
    ///
    /// `initial_delay * multiplier ^ attempt`, capped at `max_delay`.
    #[must_use]
    #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn delay_for_attempt(&self, attempt: usize) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let scaled = self.initial_delay.as_secs_f64() * self.multiplier.powi(exponent);
        if !scaled.is_finite() || scaled >= self.max_delay.as_secs_f64() {
            return self.max_delay;
        }
        Duration::from_secs_f64(scaled.max(0.0))
    }
}

/// Builder for [`RetryPolicy`].
#[derive(Debug, Clone)]
pub struct RetryPolicyBuilder {
    max_retries: Option<usize>,
    initial_delay: Option<Duration>,
    max_delay: Option<Duration>,
    multiplier: Option<f64>,
}

impl RetryPolicyBuilder {
    /// Set retries after the first attempt.
    #[must_use]
    pub const fn max_retries(mut self, max_retries: usize) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    /// Set delay before the first retry.
    #[must_use]
    pub const fn initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = Some(delay);
        self
    }

    /// Set cap on any single delay.
    #[must_use]
    pub const fn max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = Some(delay);
        self
    }

    /// Set growth factor per retry.
    #[must_use]
    pub const fn multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = Some(multiplier);
        self
    }

    /// Build the [`RetryPolicy`]. Unset values take the defaults.
    #[must_use]
    pub fn build(self) -> RetryPolicy {
        let defaults = RetryPolicy::default();
        RetryPolicy {
            max_retries: self.max_retries.unwrap_or(defaults.max_retries),
            initial_delay: self.initial_delay.unwrap_or(defaults.initial_delay),
            max_delay: self.max_delay.unwrap_or(defaults.max_delay),
            multiplier: self.multiplier.unwrap_or(defaults.multiplier),
        }
    }
}

/// Run `operation` until it succeeds, fails with an error `is_retryable`
/// rejects, or `policy.max_retries` retries are spent.
///
/// # Errors
///
/// Returns the last error from `operation`.
pub async fn retry_with_backoff<F, Fut, T, E, P>(
    policy: &RetryPolicy,
    what: &str,
    is_retryable: P,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    E: std::fmt::Display,
    P: Fn(&E) -> bool,
{
    let mut attempt = 0;

    loop {
        match operation().await {
            Ok(result) => {
                if attempt > 0 {
                    tracing::info!(what, attempt, "Succeeded after retry");
                }
                return Ok(result);
            }
            Err(err) if !is_retryable(&err) => {
                tracing::error!(what, error = %err, "Failed with non-retryable error");
                return Err(err);
            }
            Err(err) if attempt >= policy.max_retries => {
                tracing::error!(what, attempt, error = %err, "Failed after max retries");
                return Err(err);
            }
            Err(err) => {
                let delay = policy.delay_for_attempt(attempt);
                tracing::warn!(
                    what,
                    attempt,
                    delay_ms = delay.as_millis(),
                    error = %err,
                    "Failed, retrying"
                );
                sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

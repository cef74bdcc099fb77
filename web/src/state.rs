//! Application state for Axum handlers.

use appointments_core::{RateLimiter, ResponseCache};
use appointments_runtime::IntakeService;
use std::sync::Arc;
use std::time::Duration;

/// How long read responses stay cached by default.
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(60);

/// State shared across all HTTP handlers.
///
/// The queue and the system of record are reached through
/// [`IntakeService::queue`] and [`IntakeService::store`].
#[derive(Clone)]
pub struct AppState {
    /// Booking intake and record management
    pub intake: IntakeService,
    /// Response cache for read endpoints
    pub cache: Arc<dyn ResponseCache>,
    /// TTL for cached read responses
    pub cache_ttl: Duration,
    /// Per-endpoint limiter; `None` disables rate limiting
    pub rate_limiter: Option<Arc<dyn RateLimiter>>,
}

impl AppState {
    /// Create state with the default cache TTL and no rate limiting.
    #[must_use]
    pub fn new(intake: IntakeService, cache: Arc<dyn ResponseCache>) -> Self {
        Self {
            intake,
            cache,
            cache_ttl: DEFAULT_CACHE_TTL,
            rate_limiter: None,
        }
    }

    /// Override the cache TTL.
    #[must_use]
    pub const fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = ttl;
        self
    }

    /// Enable rate limiting through `limiter`.
    #[must_use]
    pub fn with_rate_limiter(mut self, limiter: Arc<dyn RateLimiter>) -> Self {
        self.rate_limiter = Some(limiter);
        self
    }
}

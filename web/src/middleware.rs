//! Per-endpoint rate limiting.
//!
//! Each route is wrapped in a [`RateLimitLayer`] carrying its own
//! [`RateLimitRule`]. The limiter key is `{endpoint}:{client_ip}`, so the
//! same caller has separate budgets per endpoint.
//!
//! # Example
//!
//! ```ignore
//! use axum::{Router, routing::post};
//! use appointments_web::middleware::{RateLimitLayer, RateLimitRule};
//!
//! let app = Router::new().route(
//!     "/appointments",
//!     post(create_appointment).layer(RateLimitLayer::new(limiter, RateLimitRule::CREATE)),
//! );
//! ```
//!
//! # Flow
//!
//! 1. **Resolve** the caller from proxy headers ([`client_ip`])
//! 2. **Record** the request in the sliding window
//! 3. **Reject** with 429 and `Retry-After` when over the limit
//! 4. **Fail open** when the limiter itself is unreachable

use crate::error::AppError;
use crate::extractors::client_ip;
use appointments_core::{BookingError, RateLimiter};
use axum::{extract::Request, response::IntoResponse, response::Response};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tower::{Layer, Service};

const WINDOW: Duration = Duration::from_secs(60);

/// Request budget for one endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitRule {
    /// Endpoint identity, the first half of the limiter key
    pub endpoint: &'static str,
    /// Requests allowed per window
    pub max_requests: u32,
    /// Sliding window length
    pub window: Duration,
}

impl RateLimitRule {
    /// `POST /appointments`
    pub const CREATE: Self = Self::per_minute("create_appointment", 20);
    /// `GET /appointments`
    pub const LIST: Self = Self::per_minute("list_appointments", 100);
    /// `GET /appointments/:id`
    pub const GET: Self = Self::per_minute("get_appointment", 100);
    /// `PUT /appointments/:id`
    pub const UPDATE: Self = Self::per_minute("update_appointment", 50);
    /// `DELETE /appointments/:id`
    pub const DELETE: Self = Self::per_minute("delete_appointment", 50);

    /// A rule over a one-minute window.
    #[must_use]
    pub const fn per_minute(endpoint: &'static str, max_requests: u32) -> Self {
        Self {
            endpoint,
            max_requests,
            window: WINDOW,
        }
    }
}

/// Layer applying one [`RateLimitRule`].
#[derive(Clone)]
pub struct RateLimitLayer {
    limiter: Arc<dyn RateLimiter>,
    rule: RateLimitRule,
}

impl RateLimitLayer {
    /// Limit requests through `limiter` according to `rule`.
    #[must_use]
    pub fn new(limiter: Arc<dyn RateLimiter>, rule: RateLimitRule) -> Self {
        Self { limiter, rule }
    }
}

impl<S> Layer<S> for RateLimitLayer {
    type Service = RateLimitService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RateLimitService {
            inner,
            limiter: Arc::clone(&self.limiter),
            rule: self.rule,
        }
    }
}

/// Middleware service produced by [`RateLimitLayer`].
#[derive(Clone)]
pub struct RateLimitService<S> {
    inner: S,
    limiter: Arc<dyn RateLimiter>,
    rule: RateLimitRule,
}

impl<S> Service<Request> for RateLimitService<S>
where
    S: Service<Request, Response = Response> + Clone + Send + 'static,
    S::Future: Send + 'static,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request) -> Self::Future {
        // The clone may not be ready; keep the one that was polled.
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);
        let limiter = Arc::clone(&self.limiter);
        let rule = self.rule;
        let key = format!("{}:{}", rule.endpoint, client_ip(req.headers()));

        Box::pin(async move {
            match limiter
                .check_and_record(&key, rule.max_requests, rule.window)
                .await
            {
                Ok(decision) => {
                    tracing::debug!(key = %key, remaining = decision.remaining, "Rate limit check passed");
                }
                Err(BookingError::TooManyRequests { retry_after }) => {
                    metrics::counter!("http_rate_limited_total", "endpoint" => rule.endpoint).increment(1);
                    return Ok(AppError::too_many_requests(retry_after).into_response());
                }
                Err(e) => {
                    tracing::warn!(key = %key, error = %e, "Rate limiter unavailable, allowing request");
                }
            }

            inner.call(req).await
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use appointments_testing::InMemoryRateLimiter;
    use axum::{Router, body::Body, http::StatusCode, http::header, routing::get};
    use tower::ServiceExt;

    fn app(limiter: &InMemoryRateLimiter, rule: RateLimitRule) -> Router {
        Router::new().route(
            "/test",
            get(|| async { "ok" }).layer(RateLimitLayer::new(Arc::new(limiter.clone()), rule)),
        )
    }

    fn request(ip: &str) -> Request {
        Request::builder()
            .uri("/test")
            .header("X-Forwarded-For", ip)
            .body(Body::empty())
            .unwrap()
    }

    #[tokio::test]
    async fn test_requests_over_limit_are_rejected() {
        let limiter = InMemoryRateLimiter::new();
        let app = app(&limiter, RateLimitRule::per_minute("test", 2));

        for _ in 0..2 {
            let response = app.clone().oneshot(request("203.0.113.1")).await.unwrap();
            assert_eq!(response.status(), StatusCode::OK);
        }

        let response = app.clone().oneshot(request("203.0.113.1")).await.unwrap();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers().get(header::RETRY_AFTER).unwrap(), "60");

        // Another caller has its own budget.
        let response = app.oneshot(request("203.0.113.2")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_key_combines_endpoint_and_client() {
        let limiter = InMemoryRateLimiter::new();
        let app = app(&limiter, RateLimitRule::CREATE);

        app.oneshot(request("198.51.100.7")).await.unwrap();

        assert_eq!(limiter.count("create_appointment:198.51.100.7"), 1);
    }

    #[tokio::test]
    async fn test_limiter_outage_fails_open() {
        let limiter = InMemoryRateLimiter::new();
        limiter.set_unavailable(true);
        let app = app(&limiter, RateLimitRule::per_minute("test", 1));

        for _ in 0..3 {
            let response = app.clone().oneshot(request("203.0.113.1")).await.unwrap();
            assert_eq!(response.status(), StatusCode::OK);
        }
    }

    #[test]
    fn test_endpoint_budgets() {
        assert_eq!(RateLimitRule::CREATE.max_requests, 20);
        assert_eq!(RateLimitRule::LIST.max_requests, 100);
        assert_eq!(RateLimitRule::GET.max_requests, 100);
        assert_eq!(RateLimitRule::UPDATE.max_requests, 50);
        assert_eq!(RateLimitRule::DELETE.max_requests, 50);
        assert_eq!(RateLimitRule::CREATE.window, Duration::from_secs(60));
    }
}

//! Axum HTTP surface for the appointment booking service.
//!
//! Handlers are thin: they parse the request, call into
//! [`IntakeService`](appointments_runtime::IntakeService) or the queue, and
//! map the result through [`AppError`].
//!
//! # Request Flow
//!
//! 1. **Trace**: every request runs inside a `tower_http` trace span
//! 2. **Rate limit**: per endpoint and client IP ([`middleware::RateLimitLayer`])
//! 3. **Cache**: read endpoints go through [`cache::cached`]
//! 4. **Handle**: the handler calls the intake service
//! 5. **Map**: [`BookingError`](appointments_core::BookingError) becomes an HTTP status
//!
//! # Example
//!
//! ```ignore
//! use appointments_web::{AppState, router};
//!
//! let state = AppState::new(intake, cache).with_rate_limiter(limiter);
//! let listener = tokio::net::TcpListener::bind("0.0.0.0:8000").await?;
//! axum::serve(listener, router(state)).await?;
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod cache;
pub mod error;
pub mod extractors;
pub mod handlers;
pub mod middleware;
pub mod state;

use appointments_core::RateLimiter;
use axum::{
    Router,
    routing::{MethodRouter, delete, get, post, put},
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

pub use error::AppError;
pub use extractors::ClientIp;
pub use middleware::{RateLimitLayer, RateLimitRule};
pub use state::AppState;

fn limited(
    route: MethodRouter<AppState>,
    limiter: Option<&Arc<dyn RateLimiter>>,
    rule: RateLimitRule,
) -> MethodRouter<AppState> {
    match limiter {
        Some(limiter) => route.layer(RateLimitLayer::new(Arc::clone(limiter), rule)),
        None => route,
    }
}

/// Build the service router.
///
/// Rate limits apply to the `/appointments` routes only, and only when
/// `state.rate_limiter` is set.
pub fn router(state: AppState) -> Router {
    use handlers::{appointments, health, queue};

    let limiter = state.rate_limiter.clone();
    let limiter = limiter.as_ref();

    let collection = limited(get(appointments::list_appointments), limiter, RateLimitRule::LIST).merge(limited(
        post(appointments::create_appointment),
        limiter,
        RateLimitRule::CREATE,
    ));
    let member = limited(get(appointments::get_appointment), limiter, RateLimitRule::GET)
        .merge(limited(
            put(appointments::update_appointment),
            limiter,
            RateLimitRule::UPDATE,
        ))
        .merge(limited(
            delete(appointments::delete_appointment),
            limiter,
            RateLimitRule::DELETE,
        ));

    Router::new()
        .route("/", get(health::root))
        .route("/health", get(health::health_check))
        .route("/ready", get(health::readiness))
        .route("/queue/stats", get(queue::queue_stats))
        .route("/appointments", collection)
        .route("/appointments/:id", member)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

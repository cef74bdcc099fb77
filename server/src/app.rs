//! Dependency wiring.
//!
//! [`build`] connects every backend, runs the schema migration and
//! assembles the HTTP router. Nothing is served and no worker runs until
//! [`Application::run`] is called.

use crate::config::Config;
use crate::lifecycle::Application;
use anyhow::Context;
use appointments_core::environment::{Clock, SystemClock};
use appointments_core::{AppointmentStore, ListStore, RateLimiter, ResponseCache, StoreError};
use appointments_postgres::PostgresAppointmentStore;
use appointments_redis::{RedisListStore, RedisRateLimiter, RedisResponseCache};
use appointments_runtime::metrics::MetricsServer;
use appointments_runtime::{
    ConfirmationProcessor, IntakeService, Processor, QueueKeys, RequestQueue, RetryPolicy, retry_with_backoff,
};
use appointments_web::AppState;
use std::sync::Arc;
use std::time::Duration;

/// Backoff for the first connection to each backend.
fn startup_policy() -> RetryPolicy {
    RetryPolicy::builder()
        .max_retries(5)
        .initial_delay(Duration::from_secs(1))
        .max_delay(Duration::from_secs(10))
        .multiplier(2.0)
        .build()
}

/// Connect the backends and assemble the application.
///
/// # Errors
///
/// Returns error if a backend stays unreachable through the startup
/// backoff, the migration fails, or an address cannot be bound.
pub async fn build(config: Config) -> anyhow::Result<Application> {
    let policy = startup_policy();

    let database = retry_with_backoff(&policy, "connect to PostgreSQL", StoreError::is_unavailable, || {
        PostgresAppointmentStore::connect(&config.postgres.url, config.postgres.max_connections)
    })
    .await
    .context("Failed to connect to PostgreSQL")?;
    database.migrate().await.context("Failed to run migrations")?;

    let redis = retry_with_backoff(&policy, "connect to Redis", StoreError::is_unavailable, || {
        appointments_redis::connect(&config.redis.url)
    })
    .await
    .context("Failed to connect to Redis")?;

    let mut metrics = MetricsServer::new(config.server.metrics_addr()?);
    metrics.start().context("Failed to start metrics exporter")?;

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let store: Arc<dyn AppointmentStore> = Arc::new(database);
    let lists: Arc<dyn ListStore> = Arc::new(RedisListStore::new(redis.clone()));
    let cache: Arc<dyn ResponseCache> = Arc::new(RedisResponseCache::new(redis.clone()));

    let queue = RequestQueue::new(
        lists,
        QueueKeys::namespaced(&config.redis.queue_namespace),
        Arc::clone(&clock),
    );
    let processor: Arc<dyn Processor> = Arc::new(
        ConfirmationProcessor::new(Arc::clone(&store), Arc::clone(&clock))
            .with_cache(Arc::clone(&cache))
            .with_capacity(config.worker.confirmation_capacity),
    );

    let intake = IntakeService::new(Arc::clone(&store), queue.clone(), Arc::clone(&cache), clock);
    let mut state = AppState::new(intake, cache).with_cache_ttl(config.server.cache_ttl);
    if config.server.rate_limit_enabled {
        let limiter: Arc<dyn RateLimiter> = Arc::new(RedisRateLimiter::new(redis));
        state = state.with_rate_limiter(limiter);
    } else {
        tracing::warn!("Rate limiting disabled");
    }

    let addr = config.server.http_addr()?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;

    Ok(Application::new(
        listener,
        appointments_web::router(state),
        queue,
        processor,
        store,
        config,
    ))
}

//! # Appointments Redis
//!
//! Redis implementations of the queue, cache and rate-limit collaborators.
//!
//! All three share one [`ConnectionManager`], which reconnects on its own
//! after a dropped connection. Connection-level failures surface as
//! [`StoreError::Unavailable`] so callers can tell an outage from a bad
//! request.
//!
//! ## Example
//!
//! ```no_run
//! use appointments_redis::{RedisListStore, RedisRateLimiter, RedisResponseCache, connect};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let conn = connect("redis://127.0.0.1:6379").await?;
//! let lists = RedisListStore::new(conn.clone());
//! let cache = RedisResponseCache::new(conn.clone());
//! let limiter = RedisRateLimiter::new(conn);
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use appointments_core::StoreError;
use redis::RedisError;
use redis::aio::ConnectionManager;

mod cache;
mod list_store;
mod rate_limiter;

pub use cache::RedisResponseCache;
pub use list_store::RedisListStore;
pub use rate_limiter::RedisRateLimiter;

/// Open a managed connection to `redis_url`.
///
/// # Errors
///
/// Returns `Unavailable` if the server cannot be reached, `Backend` if the
/// URL is invalid.
pub async fn connect(redis_url: &str) -> Result<ConnectionManager, StoreError> {
    let client = redis::Client::open(redis_url)
        .map_err(|e| StoreError::Backend(format!("Failed to create Redis client: {e}")))?;

    let conn = ConnectionManager::new(client)
        .await
        .map_err(|e| map_error("connect", &e))?;

    tracing::info!("Connected to Redis");
    Ok(conn)
}

/// Translate a Redis error, keeping outages distinguishable.
pub(crate) fn map_error(operation: &str, err: &RedisError) -> StoreError {
    if is_outage(err) {
        tracing::warn!(operation, error = %err, "Redis unavailable");
        StoreError::Unavailable(format!("Redis {operation} failed: {err}"))
    } else {
        tracing::error!(operation, error = %err, "Redis command failed");
        StoreError::Backend(format!("Redis {operation} failed: {err}"))
    }
}

fn is_outage(err: &RedisError) -> bool {
    err.is_io_error() || err.is_connection_refusal() || err.is_connection_dropped() || err.is_timeout()
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use redis::ErrorKind;

    #[test]
    fn test_io_errors_are_outages() {
        let err = RedisError::from(std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused"));
        assert!(map_error("lpush", &err).is_unavailable());
    }

    #[test]
    fn test_command_errors_are_backend_errors() {
        let err = RedisError::from((ErrorKind::TypeError, "WRONGTYPE"));
        let mapped = map_error("lpush", &err);
        assert!(!mapped.is_unavailable());
        assert!(matches!(mapped, StoreError::Backend(msg) if msg.contains("lpush")));
    }

    #[tokio::test]
    async fn test_invalid_url_is_backend_error() {
        let err = connect("not a url").await.err().unwrap();
        assert!(matches!(err, StoreError::Backend(_)));
    }
}

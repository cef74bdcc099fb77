//! Response cache stage for read endpoints.
//!
//! Bodies are stored as serialized JSON under a [`CacheKey`]. The cache only
//! ever speeds things up: a failed read is a miss, a failed write is dropped.

use crate::error::AppError;
use appointments_core::{CacheKey, ResponseCache};
use axum::{
    http::{HeaderValue, header},
    response::{IntoResponse, Response},
};
use serde::Serialize;
use std::future::Future;
use std::time::Duration;

/// A JSON body that is already serialized.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedJson(pub String);

impl IntoResponse for CachedJson {
    fn into_response(self) -> Response {
        let mut response = self.0.into_response();
        response
            .headers_mut()
            .insert(header::CONTENT_TYPE, HeaderValue::from_static("application/json"));
        response
    }
}

/// Serve `key` from the cache, or run `load` and cache its result for `ttl`.
///
/// Errors from `load` are returned as-is and nothing is cached.
///
/// # Errors
///
/// Whatever `load` returns, or `Internal` if the value cannot be serialized.
pub async fn cached<T, F, Fut>(
    cache: &dyn ResponseCache,
    key: &CacheKey,
    ttl: Duration,
    load: F,
) -> Result<CachedJson, AppError>
where
    T: Serialize,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T, AppError>>,
{
    match cache.get(key).await {
        Ok(Some(body)) => {
            metrics::counter!("http_cache_hits_total", "route" => key.route().to_string()).increment(1);
            tracing::debug!(key = %key, "Cache hit");
            return Ok(CachedJson(body));
        }
        Ok(None) => {}
        Err(e) => tracing::warn!(key = %key, error = %e, "Cache read failed, treating as miss"),
    }
    metrics::counter!("http_cache_misses_total", "route" => key.route().to_string()).increment(1);

    let value = load().await?;
    let body = serde_json::to_string(&value)
        .map_err(|e| AppError::internal("Failed to serialize response").with_source(e.into()))?;

    if let Err(e) = cache.set(key, body.clone(), ttl).await {
        tracing::warn!(key = %key, error = %e, "Cache write failed");
    }
    Ok(CachedJson(body))
}

//! Redis-backed response cache.
//!
//! Entries are stored with:
//! - **Primary key**: `cache:{route}?{params}` → serialized response body
//! - **Route index**: `cache:route:{route}` (Set) → keys cached for that route
//! - **TTL**: per entry; the route index outlives its entries by the same TTL

use crate::map_error;
use appointments_core::{CacheKey, ResponseCache, StoreFuture};
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use std::time::Duration;

/// [`ResponseCache`] on Redis strings, indexed per route.
#[derive(Clone)]
pub struct RedisResponseCache {
    conn_manager: ConnectionManager,
}

impl RedisResponseCache {
    /// Create a cache on an existing connection.
    #[must_use]
    pub const fn new(conn_manager: ConnectionManager) -> Self {
        Self { conn_manager }
    }

    fn entry_key(key: &CacheKey) -> String {
        format!("cache:{key}")
    }

    fn route_key(route: &str) -> String {
        format!("cache:route:{route}")
    }
}

impl ResponseCache for RedisResponseCache {
    fn get<'a>(&'a self, key: &'a CacheKey) -> StoreFuture<'a, Option<String>> {
        Box::pin(async move {
            let mut conn = self.conn_manager.clone();
            conn.get(Self::entry_key(key)).await.map_err(|e| map_error("GET", &e))
        })
    }

    fn set<'a>(&'a self, key: &'a CacheKey, value: String, ttl: Duration) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            let mut conn = self.conn_manager.clone();
            let entry_key = Self::entry_key(key);
            let route_key = Self::route_key(key.route());
            let ttl_seconds = ttl.as_secs().max(1);
            let index_ttl = i64::try_from(ttl_seconds.saturating_mul(2)).unwrap_or(i64::MAX);

            let _: () = redis::pipe()
                .atomic()
                .set_ex(&entry_key, value, ttl_seconds)
                .ignore()
                .sadd(&route_key, &entry_key)
                .ignore()
                .expire(&route_key, index_ttl)
                .ignore()
                .query_async(&mut conn)
                .await
                .map_err(|e| map_error("cache set", &e))?;

            tracing::debug!(key = %key, ttl_seconds, "Cached response");
            Ok(())
        })
    }

    fn invalidate<'a>(&'a self, key: &'a CacheKey) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            let mut conn = self.conn_manager.clone();
            let entry_key = Self::entry_key(key);

            let _: () = redis::pipe()
                .atomic()
                .del(&entry_key)
                .ignore()
                .srem(Self::route_key(key.route()), &entry_key)
                .ignore()
                .query_async(&mut conn)
                .await
                .map_err(|e| map_error("cache invalidate", &e))?;
            Ok(())
        })
    }

    fn invalidate_route<'a>(&'a self, route: &'a str) -> StoreFuture<'a, usize> {
        Box::pin(async move {
            let mut conn = self.conn_manager.clone();
            let route_key = Self::route_key(route);

            let members: Vec<String> = conn
                .smembers(&route_key)
                .await
                .map_err(|e| map_error("SMEMBERS", &e))?;

            if members.is_empty() {
                return Ok(0);
            }

            let (removed,): (usize,) = redis::pipe()
                .atomic()
                .del(&members)
                .del(&route_key)
                .ignore()
                .query_async(&mut conn)
                .await
                .map_err(|e| map_error("cache invalidate route", &e))?;

            tracing::debug!(route, removed, "Invalidated cached responses");
            Ok(removed)
        })
    }
}

impl std::fmt::Debug for RedisResponseCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisResponseCache").finish_non_exhaustive()
    }
}

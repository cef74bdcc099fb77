//! In-memory response cache.

#![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap for simplicity

use appointments_core::{CacheKey, ResponseCache, StoreError, StoreFuture};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone)]
struct Entry {
    route: String,
    value: String,
    expires_at: Instant,
}

/// In-memory [`ResponseCache`] with TTL.
///
/// Expiry uses `tokio::time::Instant`, so tests can pause and advance time.
#[derive(Clone, Debug, Default)]
pub struct InMemoryResponseCache {
    entries: Arc<Mutex<HashMap<String, Entry>>>,
    unavailable: Arc<AtomicBool>,
}

impl InMemoryResponseCache {
    /// Create an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent call fail with `Unavailable` (or succeed again).
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Whether `key` is cached and not expired.
    #[must_use]
    pub fn contains(&self, key: &CacheKey) -> bool {
        self.entries
            .lock()
            .unwrap()
            .get(key.as_str())
            .is_some_and(|e| e.expires_at > Instant::now())
    }

    /// Number of cached keys, expired ones included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    /// Whether nothing is cached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn with_entries<T>(&self, f: impl FnOnce(&mut HashMap<String, Entry>) -> T) -> Result<T, StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("connection refused".to_string()));
        }
        Ok(f(&mut self.entries.lock().unwrap()))
    }
}

impl ResponseCache for InMemoryResponseCache {
    fn get<'a>(&'a self, key: &'a CacheKey) -> StoreFuture<'a, Option<String>> {
        let result = self.with_entries(|entries| {
            let now = Instant::now();
            match entries.get(key.as_str()) {
                Some(e) if e.expires_at > now => Some(e.value.clone()),
                Some(_) => {
                    entries.remove(key.as_str());
                    None
                }
                None => None,
            }
        });
        Box::pin(async move { result })
    }

    fn set<'a>(&'a self, key: &'a CacheKey, value: String, ttl: Duration) -> StoreFuture<'a, ()> {
        let result = self.with_entries(|entries| {
            entries.insert(
                key.as_str().to_string(),
                Entry {
                    route: key.route().to_string(),
                    value,
                    expires_at: Instant::now() + ttl,
                },
            );
        });
        Box::pin(async move { result })
    }

    fn invalidate<'a>(&'a self, key: &'a CacheKey) -> StoreFuture<'a, ()> {
        let result = self.with_entries(|entries| {
            entries.remove(key.as_str());
        });
        Box::pin(async move { result })
    }

    fn invalidate_route<'a>(&'a self, route: &'a str) -> StoreFuture<'a, usize> {
        let result = self.with_entries(|entries| {
            let before = entries.len();
            entries.retain(|_, e| e.route != route);
            before - entries.len()
        });
        Box::pin(async move { result })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use appointments_core::cache::LIST_ROUTE;

    #[tokio::test(start_paused = true)]
    async fn test_entries_expire_after_ttl() {
        let cache = InMemoryResponseCache::new();
        let key = CacheKey::route_only(LIST_ROUTE);
        cache.set(&key, "[]".to_string(), Duration::from_secs(60)).await.unwrap();

        assert_eq!(cache.get(&key).await.unwrap().as_deref(), Some("[]"));
        tokio::time::advance(Duration::from_secs(61)).await;
        assert_eq!(cache.get(&key).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_invalidate_route_drops_every_variant() {
        let cache = InMemoryResponseCache::new();
        let ttl = Duration::from_secs(60);
        let all = CacheKey::route_only(LIST_ROUTE);
        let pending = CacheKey::new(LIST_ROUTE, [("status", "pending")]);
        let other = CacheKey::route_only("other");
        for key in [&all, &pending, &other] {
            cache.set(key, "x".to_string(), ttl).await.unwrap();
        }

        assert_eq!(cache.invalidate_route(LIST_ROUTE).await.unwrap(), 2);
        assert!(!cache.contains(&pending));
        assert!(cache.contains(&other));
    }
}

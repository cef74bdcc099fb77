//! Response cache collaborator.
//!
//! Read endpoints cache their JSON responses for a short TTL. Mutations
//! invalidate the affected keys. The cache is an optimization only: every
//! caller treats a cache error as a miss (on read) or a no-op (on write).

use crate::appointment::AppointmentId;
use crate::store::StoreFuture;
use std::fmt;
use std::time::Duration;

/// Route name of the appointment list endpoint.
pub const LIST_ROUTE: &str = "appointments:list";

/// Route name of the single-appointment endpoint.
pub const DETAIL_ROUTE: &str = "appointments:detail";

/// Canonical cache key: a route name plus normalized query parameters.
///
/// Parameters are trimmed, empty ones are dropped, and the rest are sorted
/// and percent-encoded, so logically equal requests produce equal keys:
///
/// ```
/// use appointments_core::CacheKey;
///
/// let a = CacheKey::new("appointments:list", [("status", "pending"), ("email", "a@b.c")]);
/// let b = CacheKey::new("appointments:list", [("email", " a@b.c "), ("phone_number", ""), ("status", "pending")]);
/// assert_eq!(a, b);
/// assert_eq!(a.as_str(), "appointments:list?email=a%40b.c&status=pending");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    route: String,
    canonical: String,
}

impl CacheKey {
    /// Build a key from a route name and query parameters.
    pub fn new<I, K, V>(route: &str, params: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut pairs: Vec<(String, String)> = params
            .into_iter()
            .filter_map(|(k, v)| {
                let (k, v) = (k.as_ref().trim(), v.as_ref().trim());
                (!k.is_empty() && !v.is_empty()).then(|| (k.to_string(), v.to_string()))
            })
            .collect();
        pairs.sort();
        pairs.dedup();

        let mut canonical = route.to_string();
        for (idx, (k, v)) in pairs.iter().enumerate() {
            canonical.push(if idx == 0 { '?' } else { '&' });
            canonical.push_str(&urlencoding::encode(k));
            canonical.push('=');
            canonical.push_str(&urlencoding::encode(v));
        }

        Self {
            route: route.to_string(),
            canonical,
        }
    }

    /// Key for a route with no parameters.
    #[must_use]
    pub fn route_only(route: &str) -> Self {
        Self::new(route, std::iter::empty::<(&str, &str)>())
    }

    /// Key of the cached detail response for one appointment.
    #[must_use]
    pub fn appointment(id: AppointmentId) -> Self {
        Self::new(DETAIL_ROUTE, [("id", id.to_string())])
    }

    /// The route this key belongs to.
    #[must_use]
    pub fn route(&self) -> &str {
        &self.route
    }

    /// The canonical key string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.canonical
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.canonical)
    }
}

/// Key/value response cache with TTL.
pub trait ResponseCache: Send + Sync {
    /// Cached value for `key`, if present and not expired.
    ///
    /// # Errors
    ///
    /// `Unavailable` if the backend cannot be reached.
    fn get<'a>(&'a self, key: &'a CacheKey) -> StoreFuture<'a, Option<String>>;

    /// Store `value` under `key` for `ttl`.
    ///
    /// # Errors
    ///
    /// `Unavailable` if the backend cannot be reached.
    fn set<'a>(&'a self, key: &'a CacheKey, value: String, ttl: Duration) -> StoreFuture<'a, ()>;

    /// Drop `key`.
    ///
    /// # Errors
    ///
    /// `Unavailable` if the backend cannot be reached.
    fn invalidate<'a>(&'a self, key: &'a CacheKey) -> StoreFuture<'a, ()>;

    /// Drop every key belonging to `route`, whatever its parameters.
    ///
    /// Returns how many keys were dropped.
    ///
    /// # Errors
    ///
    /// `Unavailable` if the backend cannot be reached.
    fn invalidate_route<'a>(&'a self, route: &'a str) -> StoreFuture<'a, usize>;
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_parameter_order_does_not_matter() {
        let a = CacheKey::new(LIST_ROUTE, [("status", "pending"), ("email", "x@y.z")]);
        let b = CacheKey::new(LIST_ROUTE, [("email", "x@y.z"), ("status", "pending")]);
        assert_eq!(a, b);
    }

    #[test]
    fn test_empty_parameters_are_dropped() {
        let a = CacheKey::new(LIST_ROUTE, [("email", ""), ("status", "  ")]);
        assert_eq!(a, CacheKey::route_only(LIST_ROUTE));
        assert_eq!(a.as_str(), LIST_ROUTE);
    }

    #[test]
    fn test_separators_in_values_are_escaped() {
        let key = CacheKey::new(LIST_ROUTE, [("email", "a&status=confirmed")]);
        assert_eq!(key.as_str(), "appointments:list?email=a%26status%3Dconfirmed");
        assert_ne!(key, CacheKey::new(LIST_ROUTE, [("email", "a"), ("status", "confirmed")]));
    }

    #[test]
    fn test_appointment_key() {
        let key = CacheKey::appointment(AppointmentId::new(12));
        assert_eq!(key.route(), DETAIL_ROUTE);
        assert_eq!(key.as_str(), "appointments:detail?id=12");
    }
}

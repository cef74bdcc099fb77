//! Custom Axum extractors.
//!
//! - `ClientIp`: the caller's address as reported by the proxy in front of us
//!
//! # Examples
//!
//! ```ignore
//! use appointments_web::extractors::ClientIp;
//!
//! async fn handler(client_ip: ClientIp) -> String {
//!     format!("Client IP: {}", client_ip.0)
//! }
//! ```

use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{HeaderMap, request::Parts},
};

/// Client identity used for per-caller rate limiting.
///
/// # Priority
///
/// 1. `X-Forwarded-For` (first address in the list)
/// 2. `X-Real-IP`
/// 3. `"unknown"`
///
/// Values are taken as sent; only surrounding whitespace is trimmed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientIp(pub String);

#[async_trait]
impl<S> FromRequestParts<S> for ClientIp
where
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(Self(client_ip(&parts.headers)))
    }
}

/// Resolve the client identity from proxy headers.
#[must_use]
pub fn client_ip(headers: &HeaderMap) -> String {
    let forwarded = headers
        .get("X-Forwarded-For")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty());

    let real_ip = || {
        headers
            .get("X-Real-IP")
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
    };

    forwarded.or_else(real_ip).unwrap_or("unknown").to_string()
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use axum::http::Request;

    async fn extract(req: Request<()>) -> ClientIp {
        let (mut parts, ()) = req.into_parts();
        ClientIp::from_request_parts(&mut parts, &()).await.unwrap()
    }

    #[tokio::test]
    async fn test_client_ip_from_x_forwarded_for() {
        let req = Request::builder()
            .header("X-Forwarded-For", "203.0.113.1, 198.51.100.1")
            .header("X-Real-IP", "198.51.100.42")
            .body(())
            .unwrap();

        assert_eq!(extract(req).await.0, "203.0.113.1");
    }

    #[tokio::test]
    async fn test_client_ip_from_x_real_ip() {
        let req = Request::builder()
            .header("X-Real-IP", "198.51.100.42")
            .body(())
            .unwrap();

        assert_eq!(extract(req).await.0, "198.51.100.42");
    }

    #[tokio::test]
    async fn test_client_ip_fallback() {
        let req = Request::builder().body(()).unwrap();
        assert_eq!(extract(req).await.0, "unknown");
    }

    #[test]
    fn test_blank_forwarded_header_falls_through() {
        let mut headers = HeaderMap::new();
        headers.insert("X-Forwarded-For", " ".parse().unwrap());
        headers.insert("X-Real-IP", "10.0.0.9".parse().unwrap());
        assert_eq!(client_ip(&headers), "10.0.0.9");
    }
}

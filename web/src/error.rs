//! Error types for web handlers.
//!
//! [`AppError`] bridges [`BookingError`] and HTTP responses. The body is
//! always `{"code": ..., "message": ...}`.

use appointments_core::BookingError;
use axum::{
    Json,
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use serde::Serialize;
use std::fmt;

/// Application error type for web handlers.
///
/// # Examples
///
/// ```ignore
/// async fn handler(State(state): State<AppState>, Path(id): Path<i64>) -> Result<Json<Appointment>, AppError> {
///     let appointment = state.intake.get(AppointmentId::new(id)).await?;
///     Ok(Json(appointment))
/// }
/// ```
#[derive(Debug)]
pub struct AppError {
    /// HTTP status code
    status: StatusCode,
    /// Error message (user-facing)
    message: String,
    /// Error code (for client error handling)
    code: &'static str,
    /// Seconds the client should wait, sent as `Retry-After`
    retry_after: Option<u64>,
    /// Internal error (for logging, not exposed to client)
    source: Option<anyhow::Error>,
}

impl AppError {
    /// Create a new application error.
    #[must_use]
    pub const fn new(status: StatusCode, message: String, code: &'static str) -> Self {
        Self {
            status,
            message,
            code,
            retry_after: None,
            source: None,
        }
    }

    /// Attach the underlying cause.
    #[must_use]
    pub fn with_source(mut self, source: anyhow::Error) -> Self {
        self.source = Some(source);
        self
    }

    /// Create a 400 Bad Request error.
    #[must_use]
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message.into(), "BAD_REQUEST")
    }

    /// Create a 404 Not Found error.
    #[must_use]
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message.into(), "NOT_FOUND")
    }

    /// Create a 429 Too Many Requests error carrying `Retry-After`.
    #[must_use]
    pub fn too_many_requests(retry_after: u64) -> Self {
        let mut err = Self::new(
            StatusCode::TOO_MANY_REQUESTS,
            format!("Too many requests. Retry after {retry_after} seconds"),
            "TOO_MANY_REQUESTS",
        );
        err.retry_after = Some(retry_after);
        err
    }

    /// Create a 500 Internal Server Error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message.into(), "INTERNAL_SERVER_ERROR")
    }

    /// Create a 503 Service Unavailable error.
    #[must_use]
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(StatusCode::SERVICE_UNAVAILABLE, message.into(), "SERVICE_UNAVAILABLE")
    }

    /// HTTP status this error renders as.
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        self.status
    }

    /// Machine-readable error code.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        self.code
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

impl std::error::Error for AppError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_ref()
            .map(|e| e.as_ref() as &(dyn std::error::Error + 'static))
    }
}

/// Error response body (JSON).
#[derive(Debug, Serialize)]
struct ErrorResponse {
    code: &'static str,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            if let Some(source) = &self.source {
                tracing::error!(
                    status = %self.status,
                    code = self.code,
                    message = %self.message,
                    error = %source,
                    "Request failed"
                );
            } else {
                tracing::error!(
                    status = %self.status,
                    code = self.code,
                    message = %self.message,
                    "Request failed"
                );
            }
        }

        let retry_after = self.retry_after;
        let body = ErrorResponse {
            code: self.code,
            message: self.message,
        };
        let mut response = (self.status, Json(body)).into_response();

        if let Some(seconds) = retry_after {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(seconds));
        }
        response
    }
}

impl From<BookingError> for AppError {
    fn from(err: BookingError) -> Self {
        match err {
            BookingError::Validation(message) => {
                Self::new(StatusCode::BAD_REQUEST, message, "VALIDATION_ERROR")
            }
            BookingError::NotFound(message) => Self::not_found(message),
            // The booking API has always answered a taken slot with 400.
            BookingError::Conflict(message) => Self::new(StatusCode::BAD_REQUEST, message, "CONFLICT"),
            BookingError::ServiceUnavailable(message) => {
                Self::unavailable("Service temporarily unavailable")
                    .with_source(anyhow::anyhow!(message))
            }
            BookingError::TooManyRequests { retry_after } => Self::too_many_requests(retry_after),
            BookingError::Internal(message) => {
                Self::internal("An internal error occurred").with_source(anyhow::anyhow!(message))
            }
        }
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        Self::internal("An internal error occurred").with_source(err)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = AppError::bad_request("Invalid input");
        assert_eq!(err.to_string(), "[BAD_REQUEST] Invalid input");
    }

    #[test]
    fn test_booking_errors_map_to_statuses() {
        let cases = [
            (BookingError::Validation("v".into()), StatusCode::BAD_REQUEST, "VALIDATION_ERROR"),
            (BookingError::NotFound("n".into()), StatusCode::NOT_FOUND, "NOT_FOUND"),
            (BookingError::Conflict("c".into()), StatusCode::BAD_REQUEST, "CONFLICT"),
            (
                BookingError::ServiceUnavailable("s".into()),
                StatusCode::SERVICE_UNAVAILABLE,
                "SERVICE_UNAVAILABLE",
            ),
            (
                BookingError::TooManyRequests { retry_after: 60 },
                StatusCode::TOO_MANY_REQUESTS,
                "TOO_MANY_REQUESTS",
            ),
            (
                BookingError::Internal("i".into()),
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_SERVER_ERROR",
            ),
        ];

        for (booking, status, code) in cases {
            let err = AppError::from(booking);
            assert_eq!(err.status(), status);
            assert_eq!(err.code(), code);
        }
    }

    #[test]
    fn test_too_many_requests_sets_retry_after() {
        let response = AppError::from(BookingError::TooManyRequests { retry_after: 42 }).into_response();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers().get(header::RETRY_AFTER).unwrap(), "42");
    }

    #[test]
    fn test_internal_details_are_not_exposed() {
        let err = AppError::from(BookingError::Internal("connection string leaked".into()));
        assert_eq!(err.to_string(), "[INTERNAL_SERVER_ERROR] An internal error occurred");
        assert!(std::error::Error::source(&err).is_some());
    }
}

//! Error taxonomy.
//!
//! - [`BookingError`] is what callers of the booking service see.
//! - [`StoreError`] is what storage collaborators (durable list, system of
//!   record, cache) report. It converts into [`BookingError`] at the service
//!   boundary.

use chrono::{DateTime, Utc};
use thiserror::Error;

/// Errors surfaced to callers of the booking service.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BookingError {
    /// Bad input, reported synchronously to the caller.
    #[error("Validation error: {0}")]
    Validation(String),

    /// Referenced record does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// The time slot is already held.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// A backing service is unreachable; retry later.
    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    /// Rate limit exceeded.
    #[error("Too many requests. Retry after {retry_after} seconds")]
    TooManyRequests {
        /// Seconds until the oldest counted request leaves the window.
        retry_after: u64,
    },

    /// Unexpected failure. Logged with cause, surfaced generically.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Errors reported by storage collaborators.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Backend unreachable (connection refused, dropped, timed out).
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// No record with this identifier.
    #[error("Record not found: {0}")]
    NotFound(String),

    /// Another record already holds this instant.
    #[error("Time slot {instant} is already held")]
    SlotTaken {
        /// The contested instant.
        instant: DateTime<Utc>,
    },

    /// Value could not be encoded or decoded.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Any other backend failure.
    #[error("Backend error: {0}")]
    Backend(String),
}

impl StoreError {
    /// Whether this error means the backend could not be reached.
    #[must_use]
    pub const fn is_unavailable(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}

impl From<StoreError> for BookingError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Unavailable(msg) => Self::ServiceUnavailable(msg),
            StoreError::NotFound(msg) => Self::NotFound(msg),
            StoreError::SlotTaken { .. } => Self::Conflict("This time slot is already booked".to_string()),
            StoreError::Serialization(msg) | StoreError::Backend(msg) => Self::Internal(msg),
        }
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

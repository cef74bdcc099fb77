//! # Appointments Core
//!
//! Domain types, queue wire format and collaborator traits for the
//! appointment booking service.
//!
//! The booking flow is split in two halves:
//!
//! - **Intake** persists a skeletal `pending` record and pushes a [`QueueEntry`]
//!   onto the durable request queue. The caller gets a queue position back
//!   immediately.
//! - **Confirmation** runs in background workers. Each worker pulls entries,
//!   re-validates them against the system of record and transitions the record
//!   to `confirmed`.
//!
//! This crate holds everything both halves agree on:
//!
//! - [`appointment`]: the persisted record and its status machine
//! - [`entry`]: the queue entry and its exact, canonical JSON codec
//! - [`error`]: the error taxonomy surfaced to callers and reported by stores
//! - [`store`]: the durable list primitive and the system of record
//! - [`cache`]: the response cache collaborator and canonical cache keys
//! - [`rate_limit`]: the sliding-window rate limiter collaborator
//! - [`environment`]: injected dependencies such as the clock
//!
//! Implementations live elsewhere: `appointments-redis` and
//! `appointments-postgres` for production, `appointments-testing` for
//! fast deterministic tests.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod appointment;
pub mod cache;
pub mod entry;
pub mod error;
pub mod rate_limit;
pub mod store;

// Re-export commonly used types
pub use appointment::{Appointment, AppointmentFilter, AppointmentId, AppointmentStatus, NewAppointment};
pub use cache::{CacheKey, ResponseCache};
pub use chrono::{DateTime, Utc};
pub use entry::QueueEntry;
pub use error::{BookingError, StoreError};
pub use rate_limit::{RateDecision, RateLimiter};
pub use store::{AppointmentStore, ListStore, StoreFuture};

/// Environment module - injected dependencies
pub mod environment {
    use chrono::{DateTime, Utc};

    /// Clock trait - abstracts time operations for testability
    ///
    /// # Examples
    ///
    /// ```ignore
    /// // Production - uses system clock
    /// let clock = SystemClock;
    /// let now = clock.now();
    ///
    /// // Test - controllable time (see appointments-testing)
    /// let clock = MockClock::new(fixed_instant);
    /// clock.advance(Duration::from_secs(60));
    /// ```
    pub trait Clock: Send + Sync {
        /// Get the current time
        fn now(&self) -> DateTime<Utc>;
    }

    /// Wall clock.
    #[derive(Debug, Clone, Copy, Default)]
    pub struct SystemClock;

    impl Clock for SystemClock {
        fn now(&self) -> DateTime<Utc> {
            Utc::now()
        }
    }
}

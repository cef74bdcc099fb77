//! # Appointments Testing
//!
//! Testing utilities for the appointment booking service.
//!
//! This crate provides:
//! - In-memory implementations of every collaborator trait
//!   ([`InMemoryListStore`], [`InMemoryAppointmentStore`],
//!   [`InMemoryResponseCache`], [`InMemoryRateLimiter`])
//! - A controllable clock ([`mocks::MockClock`])
//! - Fixtures for booking requests
//!
//! The in-memory stores can be switched into an "unavailable" mode to exercise
//! outage handling without a real backend.
//!
//! ## Example
//!
//! ```ignore
//! use appointments_testing::{InMemoryAppointmentStore, InMemoryListStore, fixtures, test_clock};
//!
//! #[tokio::test]
//! async fn test_confirmation() {
//!     let clock = Arc::new(test_clock());
//!     let store = InMemoryAppointmentStore::with_clock(clock.clone());
//!     let record = store.create(fixtures::request_at(clock.now() + Duration::hours(24))).await?;
//!     // ...
//! }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
// Test doubles: a poisoned lock means a test already panicked.
#![allow(clippy::unwrap_used, clippy::expect_used)]

use appointments_core::environment::Clock;
use chrono::{DateTime, Utc};

mod appointment_store;
mod cache;
mod list_store;
mod rate_limiter;

pub use appointment_store::InMemoryAppointmentStore;
pub use cache::InMemoryResponseCache;
pub use list_store::InMemoryListStore;
pub use rate_limiter::InMemoryRateLimiter;
pub use mocks::test_clock;

/// Mock implementations for testing.
pub mod mocks {
    #![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap for simplicity

    use super::{Clock, DateTime, Utc};
    use std::sync::{Arc, Mutex};

    /// Controllable clock for deterministic tests.
    ///
    /// Clones share the same time, so a test can hold one handle and move
    /// time forward while the code under test reads another.
    ///
    /// # Example
    ///
    /// ```
    /// use appointments_testing::mocks::MockClock;
    /// use appointments_core::environment::Clock;
    /// use chrono::{Duration, Utc};
    ///
    /// let clock = MockClock::new(Utc::now());
    /// let before = clock.now();
    /// clock.advance(Duration::hours(1));
    /// assert_eq!(clock.now() - before, Duration::hours(1));
    /// ```
    #[derive(Debug, Clone)]
    pub struct MockClock {
        time: Arc<Mutex<DateTime<Utc>>>,
    }

    impl MockClock {
        /// Create a clock stopped at `time`.
        #[must_use]
        pub fn new(time: DateTime<Utc>) -> Self {
            Self {
                time: Arc::new(Mutex::new(time)),
            }
        }

        /// Jump to `time`.
        pub fn set(&self, time: DateTime<Utc>) {
            *self.time.lock().unwrap() = time;
        }

        /// Move time forward by `by`.
        pub fn advance(&self, by: chrono::Duration) {
            *self.time.lock().unwrap() += by;
        }
    }

    impl Clock for MockClock {
        fn now(&self) -> DateTime<Utc> {
            *self.time.lock().unwrap()
        }
    }

    /// Create a default mock clock for tests (2025-01-01 00:00:00 UTC)
    ///
    /// # Panics
    ///
    /// This function will panic if the hardcoded timestamp fails to parse,
    /// which should never happen in practice.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn test_clock() -> MockClock {
        MockClock::new(
            DateTime::parse_from_rfc3339("2025-01-01T00:00:00Z")
                .expect("hardcoded timestamp should always parse")
                .with_timezone(&Utc),
        )
    }
}

/// Booking request fixtures.
pub mod fixtures {
    use appointments_core::NewAppointment;
    use chrono::{DateTime, Utc};

    /// A valid booking request for `at`.
    #[must_use]
    pub fn request_at(at: DateTime<Utc>) -> NewAppointment {
        request_for("test@example.com", at)
    }

    /// A valid booking request for `at` from `email`.
    #[must_use]
    pub fn request_for(email: &str, at: DateTime<Utc>) -> NewAppointment {
        NewAppointment {
            email: email.to_string(),
            phone_number: "+12345678901".to_string(),
            appointment_time: at,
            vehicle_year: "2020".to_string(),
            vehicle_make: "Toyota".to_string(),
            vehicle_model: "Camry".to_string(),
            problem_description: "Regular maintenance".to_string(),
        }
    }
}

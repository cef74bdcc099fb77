//! Storage collaborators.
//!
//! - [`ListStore`]: the durable, key-addressed list primitive the request
//!   queue is built on.
//! - [`AppointmentStore`]: the system of record for appointments, and the
//!   authority on which record holds which time slot.
//!
//! # Implementations
//!
//! - `RedisListStore` (in `appointments-redis`) and
//!   `PostgresAppointmentStore` (in `appointments-postgres`): production
//! - `InMemoryListStore` and `InMemoryAppointmentStore` (in
//!   `appointments-testing`): fast, deterministic tests
//!
//! # Dyn Compatibility
//!
//! Both traits return [`StoreFuture`] instead of using `async fn` so they can
//! be shared as `Arc<dyn ListStore>` between the queue, the worker pool and
//! HTTP handlers.

use crate::appointment::{Appointment, AppointmentFilter, AppointmentId, AppointmentStatus, NewAppointment};
use crate::error::StoreError;
use chrono::{DateTime, Utc};
use std::future::Future;
use std::pin::Pin;

/// Boxed future returned by storage collaborators.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, StoreError>> + Send + 'a>>;

/// Durable, key-addressed lists of strings.
///
/// Lists have a head (left) and a tail (right). Producers push onto the head;
/// consumers take from the tail, giving FIFO order.
///
/// Every operation is atomic with respect to every other operation on the
/// same store.
pub trait ListStore: Send + Sync {
    /// Push `value` onto the head of `key`.
    ///
    /// Returns the length of the list after the push.
    ///
    /// # Errors
    ///
    /// `Unavailable` if the backend cannot be reached.
    fn push_head<'a>(&'a self, key: &'a str, value: &'a str) -> StoreFuture<'a, usize>;

    /// Pop the tail of `source` and push it onto the head of `destination`
    /// as one indivisible step.
    ///
    /// Returns the moved value, or `None` if `source` was empty. No two
    /// callers ever receive the same moved value.
    ///
    /// # Errors
    ///
    /// `Unavailable` if the backend cannot be reached.
    fn move_tail_to_head<'a>(
        &'a self,
        source: &'a str,
        destination: &'a str,
    ) -> StoreFuture<'a, Option<String>>;

    /// Remove one occurrence of `value` from `key`, searching from the head.
    ///
    /// Returns whether an occurrence was removed.
    ///
    /// # Errors
    ///
    /// `Unavailable` if the backend cannot be reached.
    fn remove<'a>(&'a self, key: &'a str, value: &'a str) -> StoreFuture<'a, bool>;

    /// Remove one occurrence of `old` from `source` and push `new` onto the
    /// head of `destination`, as one indivisible step.
    ///
    /// Does nothing and returns `false` if `old` is not in `source`.
    ///
    /// # Errors
    ///
    /// `Unavailable` if the backend cannot be reached.
    fn swap<'a>(
        &'a self,
        source: &'a str,
        old: &'a str,
        destination: &'a str,
        new: &'a str,
    ) -> StoreFuture<'a, bool>;

    /// Number of values in `key`. Missing lists are empty.
    ///
    /// # Errors
    ///
    /// `Unavailable` if the backend cannot be reached.
    fn len<'a>(&'a self, key: &'a str) -> StoreFuture<'a, usize>;

    /// Values from head index `start` to `stop` inclusive. Negative indices
    /// count from the tail (`-1` is the tail).
    ///
    /// # Errors
    ///
    /// `Unavailable` if the backend cannot be reached.
    fn range<'a>(&'a self, key: &'a str, start: isize, stop: isize) -> StoreFuture<'a, Vec<String>>;

    /// Round-trip to the backend.
    ///
    /// # Errors
    ///
    /// `Unavailable` if the backend cannot be reached.
    fn ping(&self) -> StoreFuture<'_, ()>;
}

/// The system of record for appointments.
///
/// # Slot Uniqueness
///
/// At most one record may hold a given instant in a slot-holding status
/// (`Confirmed` or `Completed`). Implementations enforce this atomically in
/// [`transition`](Self::transition): the check and the write happen as one
/// step, so two concurrent confirmations for the same instant can never both
/// succeed.
pub trait AppointmentStore: Send + Sync {
    /// Persist a new record in `Pending` status.
    ///
    /// # Errors
    ///
    /// `Unavailable` if the backend cannot be reached.
    fn create(&self, request: NewAppointment) -> StoreFuture<'_, Appointment>;

    /// Load one record.
    ///
    /// # Errors
    ///
    /// `Unavailable` if the backend cannot be reached.
    fn get(&self, id: AppointmentId) -> StoreFuture<'_, Option<Appointment>>;

    /// Load every record matching `filter`, latest appointment time first.
    ///
    /// # Errors
    ///
    /// `Unavailable` if the backend cannot be reached.
    fn list(&self, filter: AppointmentFilter) -> StoreFuture<'_, Vec<Appointment>>;

    /// Load every non-cancelled record scheduled at exactly `instant`.
    ///
    /// # Errors
    ///
    /// `Unavailable` if the backend cannot be reached.
    fn find_at(&self, instant: DateTime<Utc>) -> StoreFuture<'_, Vec<Appointment>>;

    /// Move a record to `status` and stamp `updated_at`.
    ///
    /// Rolls back and returns an error if the write cannot be committed.
    ///
    /// # Errors
    ///
    /// - `NotFound` if no record has this id
    /// - `SlotTaken` if `status` holds a slot and another record already holds
    ///   this record's instant
    /// - `Unavailable` if the backend cannot be reached
    fn transition(&self, id: AppointmentId, status: AppointmentStatus) -> StoreFuture<'_, Appointment>;

    /// Periodic idle maintenance (connection recycling, health probing).
    ///
    /// # Errors
    ///
    /// `Unavailable` if the backend cannot be reached.
    fn maintain(&self) -> StoreFuture<'_, ()>;

    /// Round-trip to the backend.
    ///
    /// # Errors
    ///
    /// `Unavailable` if the backend cannot be reached.
    fn ping(&self) -> StoreFuture<'_, ()>;
}

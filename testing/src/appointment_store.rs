//! In-memory system of record.

#![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap for simplicity

use appointments_core::environment::{Clock, SystemClock};
use appointments_core::{
    Appointment, AppointmentFilter, AppointmentId, AppointmentStatus, AppointmentStore, NewAppointment,
    StoreError, StoreFuture,
};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Debug, Default)]
struct Records {
    by_id: BTreeMap<AppointmentId, Appointment>,
    next_id: i64,
}

/// In-memory [`AppointmentStore`].
///
/// The slot-uniqueness check and the status write in
/// [`transition`](AppointmentStore::transition) run under one lock, matching
/// the partial unique index of the Postgres store.
///
/// # Example
///
/// ```
/// use appointments_testing::{InMemoryAppointmentStore, fixtures};
/// use appointments_core::{AppointmentStatus, AppointmentStore};
/// use chrono::{Duration, Utc};
///
/// # async fn example() -> Result<(), appointments_core::StoreError> {
/// let store = InMemoryAppointmentStore::new();
/// let at = Utc::now() + Duration::hours(24);
///
/// let first = store.create(fixtures::request_at(at)).await?;
/// let second = store.create(fixtures::request_at(at)).await?;
///
/// store.transition(first.id, AppointmentStatus::Confirmed).await?;
/// assert!(store.transition(second.id, AppointmentStatus::Confirmed).await.is_err());
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct InMemoryAppointmentStore {
    records: Arc<Mutex<Records>>,
    clock: Arc<dyn Clock>,
    unavailable: Arc<AtomicBool>,
    maintenance_runs: Arc<AtomicUsize>,
    transition_delay: Option<Duration>,
}

impl InMemoryAppointmentStore {
    /// Create an empty store on the system clock.
    #[must_use]
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Create an empty store that stamps records with `clock`.
    #[must_use]
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            records: Arc::new(Mutex::new(Records::default())),
            clock,
            unavailable: Arc::new(AtomicBool::new(false)),
            maintenance_runs: Arc::new(AtomicUsize::new(0)),
            transition_delay: None,
        }
    }

    /// Sleep for `delay` at the start of every transition.
    ///
    /// Widens the window between a caller's conflict check and its write, so
    /// concurrent confirmations for one slot really do overlap.
    #[must_use]
    pub const fn with_transition_delay(mut self, delay: Duration) -> Self {
        self.transition_delay = Some(delay);
        self
    }

    /// Make every subsequent call fail with `Unavailable` (or succeed again).
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// How many times [`maintain`](AppointmentStore::maintain) has run.
    #[must_use]
    pub fn maintenance_runs(&self) -> usize {
        self.maintenance_runs.load(Ordering::SeqCst)
    }

    /// Overwrite the status of a record directly, bypassing slot checks.
    ///
    /// Used to seed states such as a pre-existing confirmed holder.
    pub fn force_status(&self, id: AppointmentId, status: AppointmentStatus) {
        if let Some(record) = self.records.lock().unwrap().by_id.get_mut(&id) {
            record.status = status;
        }
    }

    /// Every record, in id order.
    #[must_use]
    pub fn all(&self) -> Vec<Appointment> {
        self.records.lock().unwrap().by_id.values().cloned().collect()
    }

    /// Records in `status` scheduled at `instant`.
    #[must_use]
    pub fn count_at(&self, instant: DateTime<Utc>, status: AppointmentStatus) -> usize {
        self.records
            .lock()
            .unwrap()
            .by_id
            .values()
            .filter(|r| r.appointment_time == instant && r.status == status)
            .count()
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("connection refused".to_string()));
        }
        Ok(())
    }

    fn apply_transition(&self, id: AppointmentId, status: AppointmentStatus) -> Result<Appointment, StoreError> {
        self.check_available()?;
        let mut records = self.records.lock().unwrap();

        let instant = records
            .by_id
            .get(&id)
            .map(|r| r.appointment_time)
            .ok_or_else(|| StoreError::NotFound(format!("appointment {id}")))?;

        if status.holds_slot()
            && records
                .by_id
                .values()
                .any(|r| r.id != id && r.appointment_time == instant && r.status.holds_slot())
        {
            return Err(StoreError::SlotTaken { instant });
        }

        let now = self.clock.now();
        let record = records
            .by_id
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound(format!("appointment {id}")))?;
        record.status = status;
        record.updated_at = Some(now);
        Ok(record.clone())
    }
}

impl Default for InMemoryAppointmentStore {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for InMemoryAppointmentStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryAppointmentStore")
            .field("records", &self.records.lock().unwrap().by_id.len())
            .finish_non_exhaustive()
    }
}

impl AppointmentStore for InMemoryAppointmentStore {
    fn create(&self, request: NewAppointment) -> StoreFuture<'_, Appointment> {
        let result = self.check_available().map(|()| {
            let mut records = self.records.lock().unwrap();
            records.next_id += 1;
            let id = AppointmentId::new(records.next_id);
            let record = Appointment::from_new(id, request, self.clock.now());
            records.by_id.insert(id, record.clone());
            record
        });
        Box::pin(async move { result })
    }

    fn get(&self, id: AppointmentId) -> StoreFuture<'_, Option<Appointment>> {
        let result = self
            .check_available()
            .map(|()| self.records.lock().unwrap().by_id.get(&id).cloned());
        Box::pin(async move { result })
    }

    fn list(&self, filter: AppointmentFilter) -> StoreFuture<'_, Vec<Appointment>> {
        let result = self.check_available().map(|()| {
            let mut matching: Vec<Appointment> = self
                .records
                .lock()
                .unwrap()
                .by_id
                .values()
                .filter(|r| filter.matches(r))
                .cloned()
                .collect();
            matching.sort_by(|a, b| b.appointment_time.cmp(&a.appointment_time));
            matching
        });
        Box::pin(async move { result })
    }

    fn find_at(&self, instant: DateTime<Utc>) -> StoreFuture<'_, Vec<Appointment>> {
        let result = self.check_available().map(|()| {
            self.records
                .lock()
                .unwrap()
                .by_id
                .values()
                .filter(|r| r.appointment_time == instant && r.status != AppointmentStatus::Cancelled)
                .cloned()
                .collect()
        });
        Box::pin(async move { result })
    }

    fn transition(&self, id: AppointmentId, status: AppointmentStatus) -> StoreFuture<'_, Appointment> {
        Box::pin(async move {
            if let Some(delay) = self.transition_delay {
                tokio::time::sleep(delay).await;
            }
            self.apply_transition(id, status)
        })
    }

    fn maintain(&self) -> StoreFuture<'_, ()> {
        let result = self.check_available().map(|()| {
            self.maintenance_runs.fetch_add(1, Ordering::SeqCst);
        });
        Box::pin(async move { result })
    }

    fn ping(&self) -> StoreFuture<'_, ()> {
        let result = self.check_available();
        Box::pin(async move { result })
    }
}

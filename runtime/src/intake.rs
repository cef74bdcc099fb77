//! Booking intake and record management.
//!
//! [`IntakeService::submit`] is the producer side of the pipeline: it checks
//! the request, persists a `pending` record and queues it for confirmation.
//! The HTTP layer calls into this service and nothing else.

use crate::queue::{QueueReceipt, RequestQueue};
use appointments_core::cache::LIST_ROUTE;
use appointments_core::environment::Clock;
use appointments_core::{
    Appointment, AppointmentFilter, AppointmentId, AppointmentStatus, AppointmentStore, BookingError,
    CacheKey, NewAppointment, QueueEntry, ResponseCache,
};
use std::sync::Arc;

/// Accepts booking requests and manages existing records.
#[derive(Clone)]
pub struct IntakeService {
    store: Arc<dyn AppointmentStore>,
    queue: RequestQueue,
    cache: Arc<dyn ResponseCache>,
    clock: Arc<dyn Clock>,
}

impl IntakeService {
    /// Create an intake service.
    #[must_use]
    pub fn new(
        store: Arc<dyn AppointmentStore>,
        queue: RequestQueue,
        cache: Arc<dyn ResponseCache>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            queue,
            cache,
            clock,
        }
    }

    /// The queue requests are pushed onto.
    #[must_use]
    pub const fn queue(&self) -> &RequestQueue {
        &self.queue
    }

    /// The system of record.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn AppointmentStore> {
        &self.store
    }

    /// Accept a booking request.
    ///
    /// The slot check here is advisory: two requests for the same slot can
    /// both pass it. The confirmation step settles which one wins.
    ///
    /// # Errors
    ///
    /// - `Validation` if the slot is not in the future
    /// - `Conflict` if a non-cancelled record already sits at that instant
    /// - `ServiceUnavailable` if the store or the queue cannot be reached
    pub async fn submit(&self, request: NewAppointment) -> Result<QueueReceipt, BookingError> {
        if request.appointment_time <= self.clock.now() {
            return Err(BookingError::Validation(
                "Appointment time must be in the future".to_string(),
            ));
        }

        if !self.store.find_at(request.appointment_time).await?.is_empty() {
            return Err(BookingError::Conflict("This time slot is already booked".to_string()));
        }

        let appointment = self.store.create(request).await?;
        tracing::info!(
            id = %appointment.id,
            appointment_time = %appointment.appointment_time,
            "Appointment request recorded"
        );
        self.invalidate(None).await;

        match self.queue.enqueue(QueueEntry::for_appointment(&appointment)).await {
            Ok(receipt) => Ok(receipt),
            Err(e) => {
                // Unqueued records would hold the slot forever.
                self.withdraw(appointment.id).await;
                Err(e)
            }
        }
    }

    async fn withdraw(&self, id: AppointmentId) {
        match self.store.transition(id, AppointmentStatus::Cancelled).await {
            Ok(_) => {
                tracing::warn!(id = %id, "Queue unavailable, appointment request withdrawn");
                self.invalidate(Some(id)).await;
            }
            Err(e) => {
                tracing::error!(id = %id, error = %e, "Failed to withdraw unqueued appointment request");
            }
        }
    }

    /// Load one record.
    ///
    /// # Errors
    ///
    /// `NotFound` if no record has this id.
    pub async fn get(&self, id: AppointmentId) -> Result<Appointment, BookingError> {
        self.store
            .get(id)
            .await?
            .ok_or_else(|| BookingError::NotFound("Appointment not found".to_string()))
    }

    /// Load records matching `filter`, latest first.
    ///
    /// # Errors
    ///
    /// `ServiceUnavailable` if the store cannot be reached.
    pub async fn list(&self, filter: AppointmentFilter) -> Result<Vec<Appointment>, BookingError> {
        Ok(self.store.list(filter).await?)
    }

    /// Move a record to the status named by `status`.
    ///
    /// # Errors
    ///
    /// - `Validation` if `status` is not a known status
    /// - `NotFound` if no record has this id
    /// - `Conflict` if the new status would double-book the slot
    pub async fn update_status(&self, id: AppointmentId, status: &str) -> Result<Appointment, BookingError> {
        let status = AppointmentStatus::parse(status)?;
        self.transition(id, status).await
    }

    /// Cancel a record, freeing its slot.
    ///
    /// # Errors
    ///
    /// `NotFound` if no record has this id.
    pub async fn cancel(&self, id: AppointmentId) -> Result<Appointment, BookingError> {
        self.transition(id, AppointmentStatus::Cancelled).await
    }

    async fn transition(&self, id: AppointmentId, status: AppointmentStatus) -> Result<Appointment, BookingError> {
        let updated = self.store.transition(id, status).await?;
        tracing::info!(id = %id, status = %status, "Appointment status updated");
        self.invalidate(Some(id)).await;
        Ok(updated)
    }

    async fn invalidate(&self, id: Option<AppointmentId>) {
        if let Err(e) = self.cache.invalidate_route(LIST_ROUTE).await {
            tracing::warn!(error = %e, "Failed to invalidate appointment list cache");
        }
        if let Some(id) = id {
            if let Err(e) = self.cache.invalidate(&CacheKey::appointment(id)).await {
                tracing::warn!(id = %id, error = %e, "Failed to invalidate appointment cache");
            }
        }
    }
}

impl std::fmt::Debug for IntakeService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IntakeService")
            .field("queue", &self.queue)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::queue::QueueKeys;
    use appointments_core::entry::decode;
    use appointments_testing::{
        InMemoryAppointmentStore, InMemoryListStore, InMemoryResponseCache, fixtures, test_clock,
    };
    use chrono::{DateTime, Duration, TimeZone, Utc};
    use std::time::Duration as StdDuration;

    struct Fixture {
        intake: IntakeService,
        store: InMemoryAppointmentStore,
        lists: InMemoryListStore,
        cache: InMemoryResponseCache,
    }

    fn fixture() -> Fixture {
        let clock: Arc<dyn Clock> = Arc::new(test_clock());
        let store = InMemoryAppointmentStore::with_clock(Arc::clone(&clock));
        let lists = InMemoryListStore::new();
        let cache = InMemoryResponseCache::new();
        let queue = RequestQueue::new(Arc::new(lists.clone()), QueueKeys::default(), Arc::clone(&clock));
        let intake = IntakeService::new(Arc::new(store.clone()), queue, Arc::new(cache.clone()), clock);
        Fixture {
            intake,
            store,
            lists,
            cache,
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap()
    }

    fn tomorrow() -> DateTime<Utc> {
        now() + Duration::days(1)
    }

    #[tokio::test]
    async fn test_submit_records_and_queues() {
        let f = fixture();

        let receipt = f.intake.submit(fixtures::request_at(tomorrow())).await.unwrap();

        assert_eq!(receipt.status, "queued");
        assert_eq!(receipt.message, "Appointment request has been queued");
        assert_eq!(receipt.queue_position, 1);
        let record = f.store.all().pop().unwrap();
        assert_eq!(record.id, receipt.id);
        assert_eq!(record.status, AppointmentStatus::Pending);

        let queued = f.lists.contents("appointment_requests");
        let entry = decode(&queued[0]).unwrap();
        assert_eq!(entry.id, Some(receipt.id));
        assert_eq!(entry.appointment_time, tomorrow());
    }

    #[tokio::test]
    async fn test_submit_rejects_past_and_present_slots() {
        let f = fixture();

        for at in [now(), now() - Duration::hours(1)] {
            let err = f.intake.submit(fixtures::request_at(at)).await.unwrap_err();
            assert_eq!(
                err,
                BookingError::Validation("Appointment time must be in the future".to_string())
            );
        }
        assert!(f.store.all().is_empty());
        assert!(f.lists.contents("appointment_requests").is_empty());
    }

    #[tokio::test]
    async fn test_submit_rejects_taken_slot() {
        let f = fixture();
        f.intake.submit(fixtures::request_at(tomorrow())).await.unwrap();

        let err = f.intake.submit(fixtures::request_at(tomorrow())).await.unwrap_err();

        assert_eq!(err, BookingError::Conflict("This time slot is already booked".to_string()));
        assert_eq!(f.store.all().len(), 1);
    }

    #[tokio::test]
    async fn test_cancelled_slot_can_be_booked_again() {
        let f = fixture();
        let first = f.intake.submit(fixtures::request_at(tomorrow())).await.unwrap();
        f.intake.cancel(first.id).await.unwrap();

        let second = f.intake.submit(fixtures::request_at(tomorrow())).await.unwrap();

        assert_ne!(first.id, second.id);
    }

    #[tokio::test]
    async fn test_submit_fails_when_queue_unavailable() {
        let f = fixture();
        f.lists.set_unavailable(true);

        let err = f.intake.submit(fixtures::request_at(tomorrow())).await.unwrap_err();

        assert!(matches!(err, BookingError::ServiceUnavailable(_)));
        let records = f.store.all();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].status, AppointmentStatus::Cancelled);

        // The slot is free again once the queue is back.
        f.lists.set_unavailable(false);
        let receipt = f.intake.submit(fixtures::request_at(tomorrow())).await.unwrap();
        assert_eq!(receipt.queue_position, 1);
        assert_eq!(f.lists.contents("appointment_requests").len(), 1);
    }

    #[tokio::test]
    async fn test_submit_fails_when_store_unavailable() {
        let f = fixture();
        f.store.set_unavailable(true);

        let err = f.intake.submit(fixtures::request_at(tomorrow())).await.unwrap_err();

        assert!(matches!(err, BookingError::ServiceUnavailable(_)));
        assert!(f.lists.contents("appointment_requests").is_empty());
    }

    #[tokio::test]
    async fn test_get_missing_is_not_found() {
        let f = fixture();

        let err = f.intake.get(AppointmentId::new(99)).await.unwrap_err();

        assert_eq!(err, BookingError::NotFound("Appointment not found".to_string()));
    }

    #[tokio::test]
    async fn test_update_status_validates_and_invalidates() {
        let f = fixture();
        let receipt = f.intake.submit(fixtures::request_at(tomorrow())).await.unwrap();
        let detail = CacheKey::appointment(receipt.id);
        f.cache
            .set(&detail, "{}".to_string(), StdDuration::from_secs(60))
            .await
            .unwrap();

        let err = f.intake.update_status(receipt.id, "done").await.unwrap_err();
        assert!(matches!(err, BookingError::Validation(_)));
        assert!(f.cache.contains(&detail));

        let updated = f.intake.update_status(receipt.id, "completed").await.unwrap();
        assert_eq!(updated.status, AppointmentStatus::Completed);
        assert!(!f.cache.contains(&detail));
    }

    #[tokio::test]
    async fn test_list_filters() {
        let f = fixture();
        f.intake
            .submit(fixtures::request_for("a@example.com", tomorrow()))
            .await
            .unwrap();
        f.intake
            .submit(fixtures::request_for("b@example.com", tomorrow() + Duration::hours(1)))
            .await
            .unwrap();

        let filter = AppointmentFilter {
            email: Some("b@example.com".to_string()),
            ..AppointmentFilter::default()
        };
        let found = f.intake.list(filter).await.unwrap();

        assert_eq!(found.len(), 1);
        assert_eq!(found[0].email, "b@example.com");
    }
}

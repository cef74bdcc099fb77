//! Confirmation of queued booking requests.
//!
//! A worker hands each claimed [`QueueEntry`] to a [`Processor`]. The
//! production processor, [`ConfirmationProcessor`], re-validates the request
//! against the system of record and moves the record to `confirmed`:
//!
//! 1. the entry must carry a record id
//! 2. the slot must still be in the future
//! 3. the record must exist (already-confirmed and cancelled records are
//!    settled without a write)
//! 4. no *other* record may hold the slot
//! 5. the status write itself is guarded by the store's atomic slot
//!    uniqueness, so two workers racing for one slot cannot both win

use appointments_core::cache::LIST_ROUTE;
use appointments_core::environment::Clock;
use appointments_core::{
    Appointment, AppointmentId, AppointmentStatus, AppointmentStore, CacheKey, QueueEntry, ResponseCache, StoreError,
};
use metrics::counter;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Semaphore;

/// Why a queue entry could not be confirmed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProcessingError {
    /// The entry carries no record id.
    #[error("appointment id is missing")]
    MissingId,

    /// The slot is not strictly after the current time.
    #[error("time must be in the future")]
    InPast,

    /// No record matches the entry's id.
    #[error("not found")]
    NotFound,

    /// Another record already holds the slot.
    #[error("slot unavailable")]
    SlotUnavailable,

    /// The processor did not finish in time.
    #[error("processing timed out after {0:?}")]
    TimedOut(Duration),

    /// The system of record failed.
    #[error("store error: {0}")]
    Store(StoreError),
}

impl ProcessingError {
    /// Whether another attempt could succeed.
    ///
    /// A missing id or a past slot never changes, so those go straight to
    /// dead-letter.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        !matches!(self, Self::MissingId | Self::InPast)
    }

    /// Whether the system of record could not be reached at all.
    #[must_use]
    pub const fn is_outage(&self) -> bool {
        matches!(self, Self::Store(StoreError::Unavailable(_)))
    }

    /// Short label for metrics.
    #[must_use]
    pub const fn reason(&self) -> &'static str {
        match self {
            Self::MissingId => "missing_id",
            Self::InPast => "in_past",
            Self::NotFound => "not_found",
            Self::SlotUnavailable => "slot_unavailable",
            Self::TimedOut(_) => "timeout",
            Self::Store(_) => "store",
        }
    }
}

impl From<StoreError> for ProcessingError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(_) => Self::NotFound,
            StoreError::SlotTaken { .. } => Self::SlotUnavailable,
            other => Self::Store(other),
        }
    }
}

/// How an entry was settled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// The record moved to `confirmed`.
    Confirmed(Appointment),
    /// The record was already confirmed (or completed). Redelivery is a no-op.
    AlreadyConfirmed,
    /// The record was cancelled while queued. Nothing to do.
    SkippedCancelled,
}

/// Settles one queue entry.
///
/// # Dyn Compatibility
///
/// Returns a boxed future so workers can share an `Arc<dyn Processor>`.
pub trait Processor: Send + Sync {
    /// Process `entry`.
    ///
    /// # Errors
    ///
    /// Returns a [`ProcessingError`] describing why the entry could not be
    /// settled; the worker decides whether to retry it.
    fn process<'a>(
        &'a self,
        entry: &'a QueueEntry,
    ) -> Pin<Box<dyn Future<Output = Result<Outcome, ProcessingError>> + Send + 'a>>;

    /// Process `entry`, failing with [`ProcessingError::TimedOut`] after `limit`.
    ///
    /// The default bounds the whole [`process`](Processor::process) call.
    fn process_within<'a>(
        &'a self,
        entry: &'a QueueEntry,
        limit: Option<Duration>,
    ) -> Pin<Box<dyn Future<Output = Result<Outcome, ProcessingError>> + Send + 'a>> {
        Box::pin(async move {
            match limit {
                Some(limit) => tokio::time::timeout(limit, self.process(entry))
                    .await
                    .unwrap_or(Err(ProcessingError::TimedOut(limit))),
                None => self.process(entry).await,
            }
        })
    }

    /// Called after `entry` was moved to dead-letter because of `error`.
    fn dead_lettered<'a>(
        &'a self,
        _entry: &'a QueueEntry,
        _error: &'a ProcessingError,
    ) -> Pin<Box<dyn Future<Output = ()> + Send + 'a>> {
        Box::pin(async {})
    }
}

/// Confirms booking requests against the system of record.
///
/// Calls into the store are bounded by a semaphore, so at most
/// `capacity` confirmations hit the database at once across all workers.
pub struct ConfirmationProcessor {
    store: Arc<dyn AppointmentStore>,
    cache: Option<Arc<dyn ResponseCache>>,
    clock: Arc<dyn Clock>,
    capacity: Arc<Semaphore>,
}

impl ConfirmationProcessor {
    /// Default number of concurrent confirmations.
    pub const DEFAULT_CAPACITY: usize = 10;

    /// Create a processor over `store`.
    #[must_use]
    pub fn new(store: Arc<dyn AppointmentStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            cache: None,
            clock,
            capacity: Arc::new(Semaphore::new(Self::DEFAULT_CAPACITY)),
        }
    }

    /// Invalidate cached reads in `cache` after each confirmation.
    #[must_use]
    pub fn with_cache(mut self, cache: Arc<dyn ResponseCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Allow at most `capacity` concurrent confirmations (minimum 1).
    #[must_use]
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = Arc::new(Semaphore::new(capacity.max(1)));
        self
    }

    /// Confirm the record `entry` refers to.
    ///
    /// # Errors
    ///
    /// See [`ProcessingError`].
    pub async fn confirm(&self, entry: &QueueEntry) -> Result<Outcome, ProcessingError> {
        self.confirm_within(entry, None).await
    }

    /// Confirm the record `entry` refers to, giving the store `limit` once
    /// capacity is granted. Time spent waiting for capacity is not counted.
    ///
    /// # Errors
    ///
    /// See [`ProcessingError`].
    pub async fn confirm_within(
        &self,
        entry: &QueueEntry,
        limit: Option<Duration>,
    ) -> Result<Outcome, ProcessingError> {
        let id = entry.id.ok_or(ProcessingError::MissingId)?;
        if entry.appointment_time <= self.clock.now() {
            return Err(ProcessingError::InPast);
        }

        let _permit = self
            .capacity
            .acquire()
            .await
            .map_err(|_| StoreError::Unavailable("confirmation capacity closed".to_string()))?;

        match limit {
            Some(limit) => tokio::time::timeout(limit, self.settle(id))
                .await
                .unwrap_or(Err(ProcessingError::TimedOut(limit))),
            None => self.settle(id).await,
        }
    }

    async fn settle(&self, id: AppointmentId) -> Result<Outcome, ProcessingError> {
        let record = self.store.get(id).await?.ok_or(ProcessingError::NotFound)?;
        match record.status {
            AppointmentStatus::Confirmed | AppointmentStatus::Completed => {
                tracing::debug!(id = %id, "Appointment already confirmed");
                return Ok(Outcome::AlreadyConfirmed);
            }
            AppointmentStatus::Cancelled => {
                tracing::debug!(id = %id, "Appointment cancelled while queued");
                return Ok(Outcome::SkippedCancelled);
            }
            AppointmentStatus::Pending => {}
        }

        let holders = self.store.find_at(record.appointment_time).await?;
        if holders.iter().any(|other| other.id != id && other.status.holds_slot()) {
            return Err(ProcessingError::SlotUnavailable);
        }

        let confirmed = self.store.transition(id, AppointmentStatus::Confirmed).await?;
        self.invalidate_cached_reads(&confirmed).await;

        tracing::info!(
            id = %id,
            appointment_time = %confirmed.appointment_time,
            "Appointment confirmed"
        );
        Ok(Outcome::Confirmed(confirmed))
    }

    async fn invalidate_cached_reads(&self, appointment: &Appointment) {
        let Some(cache) = &self.cache else { return };
        if let Err(e) = cache.invalidate_route(LIST_ROUTE).await {
            tracing::warn!(error = %e, "Failed to invalidate appointment list cache");
        }
        if let Err(e) = cache.invalidate(&CacheKey::appointment(appointment.id)).await {
            tracing::warn!(id = %appointment.id, error = %e, "Failed to invalidate appointment cache");
        }
    }
}

impl Processor for ConfirmationProcessor {
    fn process<'a>(
        &'a self,
        entry: &'a QueueEntry,
    ) -> Pin<Box<dyn Future<Output = Result<Outcome, ProcessingError>> + Send + 'a>> {
        Box::pin(async move { observe(entry, self.confirm(entry).await) })
    }

    fn process_within<'a>(
        &'a self,
        entry: &'a QueueEntry,
        limit: Option<Duration>,
    ) -> Pin<Box<dyn Future<Output = Result<Outcome, ProcessingError>> + Send + 'a>> {
        Box::pin(async move { observe(entry, self.confirm_within(entry, limit).await) })
    }

    /// A request that lost its slot is cancelled so the slot is not held by a
    /// record that will never be confirmed.
    fn dead_lettered<'a>(
        &'a self,
        entry: &'a QueueEntry,
        error: &'a ProcessingError,
    ) -> Pin<Box<dyn Future<Output = ()> + Send + 'a>> {
        Box::pin(async move {
            let (ProcessingError::SlotUnavailable, Some(id)) = (error, entry.id) else {
                return;
            };
            match self.store.transition(id, AppointmentStatus::Cancelled).await {
                Ok(cancelled) => {
                    tracing::info!(id = %id, "Appointment lost its slot, request cancelled");
                    self.invalidate_cached_reads(&cancelled).await;
                }
                Err(e) => {
                    tracing::warn!(id = %id, error = %e, "Failed to cancel appointment that lost its slot");
                }
            }
        })
    }
}

fn observe(entry: &QueueEntry, result: Result<Outcome, ProcessingError>) -> Result<Outcome, ProcessingError> {
    match &result {
        Ok(Outcome::Confirmed(_)) => counter!("processor_confirmations_total").increment(1),
        Ok(_) => counter!("processor_settled_without_write_total").increment(1),
        Err(e) => {
            counter!("processor_failures_total", "reason" => e.reason()).increment(1);
            tracing::debug!(id = ?entry.id, error = %e, "Appointment confirmation failed");
        }
    }
    result
}

impl std::fmt::Debug for ConfirmationProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfirmationProcessor")
            .field("available_capacity", &self.capacity.available_permits())
            .finish_non_exhaustive()
    }
}

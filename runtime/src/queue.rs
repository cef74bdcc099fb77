//! Durable request queue.
//!
//! The queue owns three lists in a [`ListStore`]:
//!
//! ```text
//!   enqueue                    dequeue                    complete
//! ──────────▶ [ pending ] ─────────────────▶ [ in-flight ] ──────────▶ (gone)
//!                 ▲                               │
//!                 └───── retry / requeue ─────────┤
//!                                                 │ attempts exhausted
//!                                                 ▼
//!                                          [ dead-letter ]
//! ```
//!
//! Entries enter at the head of `pending` and leave from its tail (FIFO).
//! Dequeue moves an entry from `pending` to `in-flight` in one atomic step, so
//! no two workers ever claim the same entry.
//!
//! # Conservation
//!
//! Every entry is in exactly one list until it is completed:
//! `pending + in_flight + dead_letter == enqueued - completed`.

use appointments_core::entry::{decode, encode};
use appointments_core::environment::Clock;
use appointments_core::{AppointmentId, BookingError, ListStore, QueueEntry, StoreError};
use metrics::{counter, gauge};
use serde::Serialize;
use std::sync::Arc;

/// Names of the lists backing one queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueKeys {
    /// Entries waiting for a worker
    pub pending: String,
    /// Entries claimed by a worker
    pub in_flight: String,
    /// Entries that exhausted their attempts or can never succeed
    pub dead_letter: String,
}

impl QueueKeys {
    /// Keys scoped to one deployment, e.g. `staging:appointment_requests`.
    #[must_use]
    pub fn namespaced(namespace: &str) -> Self {
        Self {
            pending: format!("{namespace}:appointment_requests"),
            in_flight: format!("{namespace}:appointment_processing"),
            dead_letter: format!("{namespace}:appointment_dead_letter"),
        }
    }
}

impl Default for QueueKeys {
    fn default() -> Self {
        Self {
            pending: "appointment_requests".to_string(),
            in_flight: "appointment_processing".to_string(),
            dead_letter: "appointment_dead_letter".to_string(),
        }
    }
}

/// Returned to the submitter once an entry is queued.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueueReceipt {
    /// Always `"queued"`
    pub status: String,
    /// Human-readable confirmation
    pub message: String,
    /// Length of the pending list right after the push
    pub queue_position: usize,
    /// Record the entry will confirm
    pub id: AppointmentId,
}

/// An entry claimed by a worker.
///
/// Keeps the exact bytes that were moved into `in-flight`, so completing or
/// retrying the entry removes precisely what was claimed.
#[derive(Debug, Clone, PartialEq)]
pub struct ClaimedEntry {
    /// Decoded entry
    pub entry: QueueEntry,
    raw: String,
}

impl ClaimedEntry {
    /// The serialized form sitting in `in-flight`.
    #[must_use]
    pub fn raw(&self) -> &str {
        &self.raw
    }
}

/// Where a failed entry went.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Back on `pending` for another attempt
    Requeued {
        /// Failed attempts so far
        attempts: u32,
    },
    /// Moved to `dead-letter`
    DeadLettered {
        /// Failed attempts so far
        attempts: u32,
    },
    /// No longer in `in-flight` (already requeued by someone else)
    Missing,
}

/// Point-in-time list lengths.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    /// Entries waiting
    pub pending: usize,
    /// Entries being processed
    pub in_flight: usize,
    /// Entries parked for an operator
    pub dead_letter: usize,
}

/// Durable FIFO queue of booking requests with an in-flight stage.
///
/// Cheap to clone; clones share the same store.
#[derive(Clone)]
pub struct RequestQueue {
    store: Arc<dyn ListStore>,
    keys: QueueKeys,
    clock: Arc<dyn Clock>,
}

impl RequestQueue {
    /// Create a queue over `store` using `keys`.
    #[must_use]
    pub fn new(store: Arc<dyn ListStore>, keys: QueueKeys, clock: Arc<dyn Clock>) -> Self {
        Self { store, keys, clock }
    }

    /// The list names this queue uses.
    #[must_use]
    pub const fn keys(&self) -> &QueueKeys {
        &self.keys
    }

    /// Stamp `queued_at` and push `entry` onto `pending`.
    ///
    /// # Errors
    ///
    /// - `Validation` if `entry.id` is missing
    /// - `ServiceUnavailable` if the store cannot be reached
    pub async fn enqueue(&self, mut entry: QueueEntry) -> Result<QueueReceipt, BookingError> {
        let id = entry
            .id
            .ok_or_else(|| BookingError::Validation("Appointment ID is required".to_string()))?;
        entry.queued_at = Some(self.clock.now());

        let raw = encode(&entry)?;
        let queue_position = self
            .store
            .push_head(&self.keys.pending, &raw)
            .await
            .map_err(|e| {
                tracing::error!(id = %id, error = %e, "Failed to enqueue appointment request");
                BookingError::from(e)
            })?;

        counter!("queue_entries_enqueued_total").increment(1);
        tracing::info!(id = %id, queue_position, "Appointment request queued");

        Ok(QueueReceipt {
            status: "queued".to_string(),
            message: "Appointment request has been queued".to_string(),
            queue_position,
            id,
        })
    }

    /// Claim the oldest pending entry.
    ///
    /// An entry that cannot be decoded is moved straight to `dead-letter` and
    /// the next one is tried.
    ///
    /// # Errors
    ///
    /// `Unavailable` if the store cannot be reached.
    pub async fn try_dequeue(&self) -> Result<Option<ClaimedEntry>, StoreError> {
        loop {
            let Some(raw) = self
                .store
                .move_tail_to_head(&self.keys.pending, &self.keys.in_flight)
                .await?
            else {
                return Ok(None);
            };

            match decode(&raw) {
                Ok(entry) => return Ok(Some(ClaimedEntry { entry, raw })),
                Err(e) => {
                    tracing::warn!(error = %e, "Undecodable queue entry, moving to dead-letter");
                    self.store
                        .swap(&self.keys.in_flight, &raw, &self.keys.dead_letter, &raw)
                        .await?;
                    counter!("queue_entries_dead_lettered_total", "reason" => "undecodable").increment(1);
                }
            }
        }
    }

    /// Claim the oldest pending entry, treating store errors as an empty queue.
    pub async fn dequeue(&self) -> Option<ClaimedEntry> {
        match self.try_dequeue().await {
            Ok(claimed) => claimed,
            Err(e) => {
                tracing::error!(error = %e, "Failed to dequeue appointment request");
                None
            }
        }
    }

    /// Remove a processed entry from `in-flight`.
    ///
    /// Returns `false` if the entry was no longer there.
    ///
    /// # Errors
    ///
    /// `Unavailable` if the store cannot be reached.
    pub async fn complete(&self, claimed: &ClaimedEntry) -> Result<bool, StoreError> {
        let removed = self.store.remove(&self.keys.in_flight, &claimed.raw).await?;
        if removed {
            counter!("queue_entries_completed_total").increment(1);
        } else {
            tracing::warn!(id = ?claimed.entry.id, "Completed entry was no longer in flight");
        }
        Ok(removed)
    }

    /// Put a claimed entry back on `pending` unchanged, without counting an
    /// attempt.
    ///
    /// # Errors
    ///
    /// `Unavailable` if the store cannot be reached.
    pub async fn release(&self, claimed: &ClaimedEntry) -> Result<bool, StoreError> {
        self.store
            .swap(&self.keys.in_flight, &claimed.raw, &self.keys.pending, &claimed.raw)
            .await
    }

    /// Move every in-flight entry back onto `pending`.
    ///
    /// Returns how many entries were moved.
    ///
    /// # Errors
    ///
    /// `Unavailable` if the store cannot be reached.
    pub async fn requeue_all_in_flight(&self) -> Result<usize, StoreError> {
        let mut moved = 0;
        while self
            .store
            .move_tail_to_head(&self.keys.in_flight, &self.keys.pending)
            .await?
            .is_some()
        {
            moved += 1;
        }

        if moved > 0 {
            counter!("queue_entries_requeued_total").increment(moved as u64);
            tracing::info!(count = moved, "Requeued in-flight appointment requests");
        }
        Ok(moved)
    }

    /// Record a failed attempt and move the entry on.
    ///
    /// The entry goes back to `pending` if `retryable` and it has failed fewer
    /// than `max_attempts` times; otherwise it goes to `dead-letter`.
    ///
    /// # Errors
    ///
    /// `Unavailable` if the store cannot be reached.
    pub async fn retry_or_dead_letter(
        &self,
        claimed: &ClaimedEntry,
        reason: &str,
        retryable: bool,
        max_attempts: u32,
    ) -> Result<Disposition, StoreError> {
        let updated = claimed.entry.clone().with_failure(reason);
        let attempts = updated.attempts;
        let raw = encode(&updated)?;

        let (destination, disposition) = if retryable && attempts < max_attempts {
            (&self.keys.pending, Disposition::Requeued { attempts })
        } else {
            (&self.keys.dead_letter, Disposition::DeadLettered { attempts })
        };

        if !self
            .store
            .swap(&self.keys.in_flight, &claimed.raw, destination, &raw)
            .await?
        {
            tracing::warn!(id = ?claimed.entry.id, "Failed entry was no longer in flight");
            return Ok(Disposition::Missing);
        }

        match disposition {
            Disposition::Requeued { .. } => {
                counter!("queue_entries_retried_total").increment(1);
                tracing::info!(id = ?updated.id, attempts, reason, "Appointment request requeued for retry");
            }
            Disposition::DeadLettered { .. } => {
                counter!("queue_entries_dead_lettered_total", "reason" => "exhausted").increment(1);
                tracing::warn!(id = ?updated.id, attempts, reason, "Appointment request moved to dead-letter");
            }
            Disposition::Missing => {}
        }
        Ok(disposition)
    }

    /// Up to `limit` dead-lettered entries, most recent first.
    ///
    /// # Errors
    ///
    /// `Unavailable` if the store cannot be reached.
    pub async fn dead_letters(&self, limit: usize) -> Result<Vec<QueueEntry>, StoreError> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let stop = isize::try_from(limit).unwrap_or(isize::MAX) - 1;
        let raws = self.store.range(&self.keys.dead_letter, 0, stop).await?;
        Ok(raws.iter().filter_map(|raw| decode(raw).ok()).collect())
    }

    /// Move every decodable dead-lettered entry back onto `pending` with its
    /// attempt count reset.
    ///
    /// Returns how many entries were replayed.
    ///
    /// # Errors
    ///
    /// `Unavailable` if the store cannot be reached.
    pub async fn replay_dead_letters(&self) -> Result<usize, StoreError> {
        let parked = self.store.len(&self.keys.dead_letter).await?;
        let mut replayed = 0;

        for _ in 0..parked {
            let Some(raw) = self
                .store
                .move_tail_to_head(&self.keys.dead_letter, &self.keys.in_flight)
                .await?
            else {
                break;
            };

            if let Ok(mut entry) = decode(&raw) {
                entry.attempts = 0;
                entry.last_error = None;
                let fresh = encode(&entry)?;
                self.store
                    .swap(&self.keys.in_flight, &raw, &self.keys.pending, &fresh)
                    .await?;
                replayed += 1;
            } else {
                self.store
                    .swap(&self.keys.in_flight, &raw, &self.keys.dead_letter, &raw)
                    .await?;
            }
        }

        tracing::info!(count = replayed, "Replayed dead-lettered appointment requests");
        Ok(replayed)
    }

    /// Entries waiting. Zero if the store cannot be reached.
    pub async fn pending_length(&self) -> usize {
        self.length(&self.keys.pending).await
    }

    /// Entries being processed. Zero if the store cannot be reached.
    pub async fn in_flight_length(&self) -> usize {
        self.length(&self.keys.in_flight).await
    }

    /// Entries parked in dead-letter. Zero if the store cannot be reached.
    pub async fn dead_letter_length(&self) -> usize {
        self.length(&self.keys.dead_letter).await
    }

    /// All three lengths, also published as gauges.
    #[allow(clippy::cast_precision_loss)]
    pub async fn stats(&self) -> QueueStats {
        let stats = QueueStats {
            pending: self.pending_length().await,
            in_flight: self.in_flight_length().await,
            dead_letter: self.dead_letter_length().await,
        };
        gauge!("queue_pending_entries").set(stats.pending as f64);
        gauge!("queue_in_flight_entries").set(stats.in_flight as f64);
        gauge!("queue_dead_letter_entries").set(stats.dead_letter as f64);
        stats
    }

    /// Round-trip to the underlying store.
    ///
    /// # Errors
    ///
    /// `Unavailable` if the store cannot be reached.
    pub async fn ping(&self) -> Result<(), StoreError> {
        self.store.ping().await
    }

    async fn length(&self, key: &str) -> usize {
        match self.store.len(key).await {
            Ok(len) => len,
            Err(e) => {
                tracing::error!(key, error = %e, "Failed to read queue length");
                0
            }
        }
    }
}

impl std::fmt::Debug for RequestQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestQueue")
            .field("keys", &self.keys)
            .finish_non_exhaustive()
    }
}

//! Worker pool draining the request queue.
//!
//! Each worker runs the same loop until shutdown:
//!
//! ```text
//! loop {
//!     maintenance due?   -> store.maintain()
//!     claim up to batch_size entries
//!     empty?             -> sleep poll_interval
//!     process the batch concurrently, wait for all
//!     settle each entry  -> complete / retry / dead-letter
//!     store outage?      -> requeue in-flight, sleep error_backoff
//! }
//! ```
//!
//! Workers poll; nothing wakes them on enqueue.

use crate::processor::{Outcome, ProcessingError, Processor};
use crate::queue::{ClaimedEntry, Disposition, RequestQueue};
use crate::retry::RetryPolicy;
use appointments_core::{AppointmentStore, QueueEntry, StoreError};
use futures::future::join_all;
use metrics::{counter, histogram};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::TryRecvError;
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// What to do when an entry in a batch fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FailurePolicy {
    /// Retry only the failed entry, counting attempts; dead-letter it once
    /// attempts run out or the failure is permanent. Successful entries in
    /// the same batch are completed.
    #[default]
    RequeueEntry,
    /// Move the whole in-flight list back to pending once per failing batch.
    ///
    /// Every in-flight entry is redelivered, including ones other workers hold,
    /// and an entry that can never succeed cycles forever.
    RequeueInFlight,
}

impl FailurePolicy {
    /// Parse `per-entry` or `requeue-in-flight`.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "per-entry" => Some(Self::RequeueEntry),
            "requeue-in-flight" => Some(Self::RequeueInFlight),
            _ => None,
        }
    }
}

/// Worker pool configuration.
///
/// # Default Values
///
/// - `workers`: 4
/// - `batch_size`: 10
/// - `poll_interval`: 1 second
/// - `maintenance_interval`: 300 seconds
/// - `error_backoff`: fixed 5 seconds
/// - `max_attempts`: 5
/// - `failure_policy`: [`FailurePolicy::RequeueEntry`]
/// - `processing_timeout`: 30 seconds
/// - `recover_on_start`: false
#[derive(Debug, Clone)]
pub struct WorkerPoolConfig {
    /// Independent worker loops
    pub workers: usize,
    /// Entries claimed per cycle
    pub batch_size: usize,
    /// Sleep when the queue is empty
    pub poll_interval: Duration,
    /// Interval between idle maintenance runs
    pub maintenance_interval: Duration,
    /// Backoff after a store outage
    pub error_backoff: RetryPolicy,
    /// Failed attempts before an entry is dead-lettered
    pub max_attempts: u32,
    /// Reaction to a failed entry
    pub failure_policy: FailurePolicy,
    /// Upper bound on one processor call
    pub processing_timeout: Option<Duration>,
    /// Requeue in-flight leftovers from a previous process at start
    pub recover_on_start: bool,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            batch_size: 10,
            poll_interval: Duration::from_secs(1),
            maintenance_interval: Duration::from_secs(300),
            error_backoff: RetryPolicy::fixed(Duration::from_secs(5)),
            max_attempts: 5,
            failure_policy: FailurePolicy::RequeueEntry,
            processing_timeout: Some(Duration::from_secs(30)),
            recover_on_start: false,
        }
    }
}

impl WorkerPoolConfig {
    /// Set the number of workers (minimum 1).
    #[must_use]
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    /// Set entries claimed per cycle (minimum 1).
    #[must_use]
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Set the idle poll interval.
    #[must_use]
    pub const fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Set the maintenance interval.
    #[must_use]
    pub const fn with_maintenance_interval(mut self, interval: Duration) -> Self {
        self.maintenance_interval = interval;
        self
    }

    /// Set the outage backoff.
    #[must_use]
    pub fn with_error_backoff(mut self, backoff: RetryPolicy) -> Self {
        self.error_backoff = backoff;
        self
    }

    /// Set failed attempts before dead-lettering (minimum 1).
    #[must_use]
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    /// Set the failure policy.
    #[must_use]
    pub const fn with_failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.failure_policy = policy;
        self
    }

    /// Set (or clear) the per-entry processing timeout.
    #[must_use]
    pub const fn with_processing_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.processing_timeout = timeout;
        self
    }

    /// Requeue in-flight leftovers when the pool starts.
    #[must_use]
    pub const fn with_recover_on_start(mut self, recover: bool) -> Self {
        self.recover_on_start = recover;
        self
    }
}

/// Tally of one worker cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleReport {
    /// Entries claimed from pending
    pub claimed: usize,
    /// Entries settled successfully and removed from in-flight
    pub completed: usize,
    /// Entries put back on pending individually
    pub retried: usize,
    /// Entries moved to dead-letter
    pub dead_lettered: usize,
    /// Entries moved back from in-flight in bulk
    pub requeued: usize,
    /// Whether the system of record was unreachable during the cycle
    pub store_outage: bool,
}

impl CycleReport {
    /// Whether any claimed entry failed.
    #[must_use]
    pub const fn had_failures(&self) -> bool {
        self.retried > 0 || self.dead_lettered > 0 || self.requeued > 0 || self.store_outage
    }
}

/// One worker loop.
pub struct Worker {
    id: usize,
    queue: RequestQueue,
    processor: Arc<dyn Processor>,
    store: Arc<dyn AppointmentStore>,
    config: Arc<WorkerPoolConfig>,
}

impl Worker {
    /// Create worker `id`.
    #[must_use]
    pub fn new(
        id: usize,
        queue: RequestQueue,
        processor: Arc<dyn Processor>,
        store: Arc<dyn AppointmentStore>,
        config: Arc<WorkerPoolConfig>,
    ) -> Self {
        Self {
            id,
            queue,
            processor,
            store,
            config,
        }
    }

    /// Claim one batch, process it concurrently and settle every entry.
    ///
    /// # Errors
    ///
    /// Returns `Unavailable` if the queue store could not be reached. Entries
    /// already claimed stay in-flight and are recovered by a requeue.
    pub async fn run_cycle(&self) -> Result<CycleReport, StoreError> {
        let started = Instant::now();
        let batch = self.claim_batch().await?;
        let mut report = CycleReport {
            claimed: batch.len(),
            ..CycleReport::default()
        };
        if batch.is_empty() {
            return Ok(report);
        }

        tracing::debug!(worker = self.id, batch = batch.len(), "Processing batch");
        let results = join_all(batch.iter().map(|claimed| self.process(&claimed.entry))).await;

        match self.config.failure_policy {
            FailurePolicy::RequeueEntry => self.settle_each(&batch, results, &mut report).await?,
            FailurePolicy::RequeueInFlight => self.settle_batch(&batch, results, &mut report).await?,
        }

        histogram!("worker_cycle_duration_seconds").record(started.elapsed().as_secs_f64());
        Ok(report)
    }

    /// Run until `shutdown` fires.
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        tracing::info!(worker = self.id, "Worker started");
        let mut last_maintenance = Instant::now();
        let mut consecutive_outages = 0;

        loop {
            if last_maintenance.elapsed() >= self.config.maintenance_interval {
                self.maintain().await;
                last_maintenance = Instant::now();
            }

            let pause = match self.run_cycle().await {
                Ok(report) if report.store_outage => {
                    self.backoff_delay(&mut consecutive_outages)
                }
                Ok(report) if report.claimed == 0 => {
                    consecutive_outages = 0;
                    self.config.poll_interval
                }
                Ok(_) => {
                    consecutive_outages = 0;
                    Duration::ZERO
                }
                Err(e) => {
                    tracing::error!(worker = self.id, error = %e, "Queue store unavailable");
                    if let Err(e) = self.queue.requeue_all_in_flight().await {
                        tracing::warn!(worker = self.id, error = %e, "Could not requeue in-flight entries");
                    }
                    self.backoff_delay(&mut consecutive_outages)
                }
            };

            if pause.is_zero() {
                match shutdown.try_recv() {
                    Err(TryRecvError::Empty) => continue,
                    _ => break,
                }
            }

            tokio::select! {
                _ = shutdown.recv() => break,
                () = tokio::time::sleep(pause) => {}
            }
        }

        tracing::info!(worker = self.id, "Worker stopped");
    }

    async fn claim_batch(&self) -> Result<Vec<ClaimedEntry>, StoreError> {
        let mut batch = Vec::with_capacity(self.config.batch_size);
        while batch.len() < self.config.batch_size {
            match self.queue.try_dequeue().await {
                Ok(Some(claimed)) => batch.push(claimed),
                Ok(None) => break,
                Err(e) if batch.is_empty() => return Err(e),
                Err(e) => {
                    tracing::warn!(worker = self.id, error = %e, "Dequeue failed mid-batch, processing partial batch");
                    break;
                }
            }
        }
        Ok(batch)
    }

    async fn process(&self, entry: &QueueEntry) -> Result<Outcome, ProcessingError> {
        self.processor.process_within(entry, self.config.processing_timeout).await
    }

    async fn settle_each(
        &self,
        batch: &[ClaimedEntry],
        results: Vec<Result<Outcome, ProcessingError>>,
        report: &mut CycleReport,
    ) -> Result<(), StoreError> {
        for (claimed, result) in batch.iter().zip(results) {
            match result {
                Ok(_) => {
                    if self.queue.complete(claimed).await? {
                        report.completed += 1;
                    }
                }
                Err(e) if e.is_outage() => {
                    // Not the entry's fault; put it back without counting an attempt.
                    report.store_outage = true;
                    if self.queue.release(claimed).await? {
                        report.retried += 1;
                    }
                }
                Err(e) => {
                    let disposition = self
                        .queue
                        .retry_or_dead_letter(claimed, &e.to_string(), e.is_retryable(), self.config.max_attempts)
                        .await?;
                    match disposition {
                        Disposition::Requeued { .. } => report.retried += 1,
                        Disposition::DeadLettered { .. } => {
                            report.dead_lettered += 1;
                            self.processor.dead_lettered(&claimed.entry, &e).await;
                        }
                        Disposition::Missing => {}
                    }
                }
            }
        }
        Ok(())
    }

    async fn settle_batch(
        &self,
        batch: &[ClaimedEntry],
        results: Vec<Result<Outcome, ProcessingError>>,
        report: &mut CycleReport,
    ) -> Result<(), StoreError> {
        let mut failed = false;
        for (claimed, result) in batch.iter().zip(results) {
            match result {
                Ok(_) => {
                    if self.queue.complete(claimed).await? {
                        report.completed += 1;
                    }
                }
                Err(e) => {
                    tracing::warn!(worker = self.id, id = ?claimed.entry.id, error = %e, "Entry failed");
                    report.store_outage |= e.is_outage();
                    failed = true;
                }
            }
        }

        if failed {
            report.requeued = self.queue.requeue_all_in_flight().await?;
        }
        Ok(())
    }

    async fn maintain(&self) {
        counter!("worker_maintenance_runs_total").increment(1);
        match self.store.maintain().await {
            Ok(()) => tracing::debug!(worker = self.id, "Maintenance complete"),
            Err(e) => tracing::warn!(worker = self.id, error = %e, "Maintenance failed"),
        }
    }

    fn backoff_delay(&self, consecutive_outages: &mut usize) -> Duration {
        let delay = self.config.error_backoff.delay_for_attempt(*consecutive_outages);
        *consecutive_outages = consecutive_outages.saturating_add(1);
        counter!("worker_backoffs_total").increment(1);
        tracing::warn!(
            worker = self.id,
            delay_ms = delay.as_millis(),
            "Backing off after store outage"
        );
        delay
    }
}

/// A running set of workers sharing one queue.
///
/// # Example
///
/// ```rust,ignore
/// let pool = WorkerPool::start(config, queue, processor, store).await;
/// // ... serve traffic ...
/// pool.shutdown(Duration::from_secs(30)).await;
/// ```
pub struct WorkerPool {
    handles: Vec<JoinHandle<()>>,
    shutdown_tx: broadcast::Sender<()>,
}

impl WorkerPool {
    /// Spawn `config.workers` workers.
    pub async fn start(
        config: WorkerPoolConfig,
        queue: RequestQueue,
        processor: Arc<dyn Processor>,
        store: Arc<dyn AppointmentStore>,
    ) -> Self {
        if config.recover_on_start {
            match queue.requeue_all_in_flight().await {
                Ok(0) => {}
                Ok(count) => tracing::info!(count, "Recovered in-flight entries from a previous run"),
                Err(e) => tracing::warn!(error = %e, "Could not recover in-flight entries"),
            }
        }

        let config = Arc::new(config);
        let (shutdown_tx, _) = broadcast::channel(1);
        let handles = (0..config.workers)
            .map(|id| {
                let worker = Worker::new(
                    id,
                    queue.clone(),
                    Arc::clone(&processor),
                    Arc::clone(&store),
                    Arc::clone(&config),
                );
                tokio::spawn(worker.run(shutdown_tx.subscribe()))
            })
            .collect::<Vec<_>>();

        tracing::info!(
            workers = handles.len(),
            batch_size = config.batch_size,
            policy = ?config.failure_policy,
            "Worker pool started"
        );
        Self { handles, shutdown_tx }
    }

    /// Number of workers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.handles.len()
    }

    /// Whether the pool has no workers.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Signal every worker to stop and wait up to `timeout` for all of them.
    ///
    /// Workers still settling a batch when the deadline passes are abandoned;
    /// their entries stay in-flight and are recovered by a later requeue.
    pub async fn shutdown(self, timeout: Duration) {
        let _ = self.shutdown_tx.send(());
        let deadline = Instant::now() + timeout;

        for (idx, handle) in self.handles.into_iter().enumerate() {
            match tokio::time::timeout_at(deadline, handle).await {
                Ok(Ok(())) => tracing::info!(worker = idx, "Worker stopped gracefully"),
                Ok(Err(e)) => tracing::warn!(worker = idx, error = %e, "Worker task failed"),
                Err(_) => tracing::warn!(worker = idx, "Worker shutdown timed out"),
            }
        }
    }
}

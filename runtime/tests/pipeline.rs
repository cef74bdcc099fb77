//! End-to-end tests for the queue → worker → processor pipeline.
//!
//! Everything runs against the in-memory collaborators from
//! `appointments-testing`, with a [`MockClock`] standing in for wall time.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use appointments_core::environment::Clock;
use appointments_core::{AppointmentId, AppointmentStatus, AppointmentStore, QueueEntry};
use appointments_runtime::{
    ClaimedEntry, ConfirmationProcessor, FailurePolicy, IntakeService, Outcome, ProcessingError, Processor,
    QueueKeys, RequestQueue, Worker, WorkerPool, WorkerPoolConfig,
};
use appointments_testing::mocks::MockClock;
use appointments_testing::{
    InMemoryAppointmentStore, InMemoryListStore, InMemoryResponseCache, fixtures, test_clock,
};
use chrono::{DateTime, Utc};
use proptest::prelude::*;
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_env_filter("appointments_runtime=debug")
        .try_init();
}

struct Harness {
    clock: MockClock,
    store: InMemoryAppointmentStore,
    lists: InMemoryListStore,
    queue: RequestQueue,
}

impl Harness {
    fn new() -> Self {
        Self::with_store(|store| store)
    }

    fn with_store(configure: impl FnOnce(InMemoryAppointmentStore) -> InMemoryAppointmentStore) -> Self {
        init_tracing();
        let clock = test_clock();
        let store = configure(InMemoryAppointmentStore::with_clock(Arc::new(clock.clone())));
        let lists = InMemoryListStore::new();
        let queue = RequestQueue::new(Arc::new(lists.clone()), QueueKeys::default(), Arc::new(clock.clone()));
        Self {
            clock,
            store,
            lists,
            queue,
        }
    }

    fn tomorrow(&self) -> DateTime<Utc> {
        self.clock.now() + chrono::Duration::hours(24)
    }

    fn confirmer(&self) -> Arc<dyn Processor> {
        Arc::new(ConfirmationProcessor::new(
            Arc::new(self.store.clone()),
            Arc::new(self.clock.clone()),
        ))
    }

    fn worker(&self, id: usize, config: WorkerPoolConfig, processor: Arc<dyn Processor>) -> Worker {
        Worker::new(
            id,
            self.queue.clone(),
            processor,
            Arc::new(self.store.clone()),
            Arc::new(config),
        )
    }

    /// Record a pending appointment at `at` and queue it.
    async fn book(&self, at: DateTime<Utc>) -> AppointmentId {
        let record = self.store.create(fixtures::request_at(at)).await.unwrap();
        self.queue.enqueue(QueueEntry::for_appointment(&record)).await.unwrap();
        record.id
    }

    async fn status(&self, id: AppointmentId) -> AppointmentStatus {
        self.store.get(id).await.unwrap().unwrap().status
    }

    fn pending_entries(&self) -> Vec<QueueEntry> {
        self.lists
            .contents("appointment_requests")
            .iter()
            .map(|raw| appointments_core::entry::decode(raw).unwrap())
            .collect()
    }
}

/// Fails the entries it is told to, settles everything else.
#[derive(Default)]
struct ScriptedProcessor {
    failures: HashMap<AppointmentId, ProcessingError>,
    delay: Option<Duration>,
}

impl ScriptedProcessor {
    fn failing(id: AppointmentId, error: ProcessingError) -> Self {
        Self {
            failures: HashMap::from([(id, error)]),
            delay: None,
        }
    }

    fn slow(delay: Duration) -> Self {
        Self {
            failures: HashMap::new(),
            delay: Some(delay),
        }
    }
}

impl Processor for ScriptedProcessor {
    fn process<'a>(
        &'a self,
        entry: &'a QueueEntry,
    ) -> Pin<Box<dyn Future<Output = Result<Outcome, ProcessingError>> + Send + 'a>> {
        Box::pin(async move {
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            match entry.id.and_then(|id| self.failures.get(&id)) {
                Some(error) => Err(error.clone()),
                None => Ok(Outcome::AlreadyConfirmed),
            }
        })
    }
}

// ---------------------------------------------------------------------------
// Scenarios
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_one_cycle_confirms_and_completes() {
    let h = Harness::new();
    let id = h.book(h.tomorrow()).await;

    let report = h
        .worker(0, WorkerPoolConfig::default(), h.confirmer())
        .run_cycle()
        .await
        .unwrap();

    assert_eq!(report.claimed, 1);
    assert_eq!(report.completed, 1);
    assert!(!report.had_failures());
    assert_eq!(h.status(id).await, AppointmentStatus::Confirmed);
    assert_eq!(h.queue.in_flight_length().await, 0);
    assert_eq!(h.queue.pending_length().await, 0);
}

#[tokio::test]
async fn test_same_instant_back_to_back_confirms_exactly_one() {
    let h = Harness::new();
    let at = h.tomorrow();
    let first = h.book(at).await;
    let second = h.book(at).await;

    let worker = h.worker(0, WorkerPoolConfig::default().with_max_attempts(3), h.confirmer());
    let mut cycles = 0;
    loop {
        let report = worker.run_cycle().await.unwrap();
        if report.claimed == 0 {
            break;
        }
        cycles += 1;
        assert!(cycles < 10, "pipeline did not drain");
    }

    assert_eq!(h.store.count_at(at, AppointmentStatus::Confirmed), 1);
    assert_eq!(h.status(first).await, AppointmentStatus::Confirmed);
    assert_eq!(h.status(second).await, AppointmentStatus::Cancelled);

    let parked = h.queue.dead_letters(10).await.unwrap();
    assert_eq!(parked.len(), 1);
    assert_eq!(parked[0].id, Some(second));
    assert_eq!(parked[0].attempts, 3);
    assert_eq!(parked[0].last_error.as_deref(), Some("slot unavailable"));

    // Only the winner holds the slot, so cancelling it frees the slot.
    let holders = h.store.find_at(at).await.unwrap();
    assert_eq!(holders.len(), 1);
    assert_eq!(holders[0].id, first);
}

#[tokio::test]
async fn test_missing_record_is_requeued_not_lost() {
    let h = Harness::new();
    let mut entry = QueueEntry::from_request(fixtures::request_at(h.tomorrow()));
    entry.id = Some(AppointmentId::new(404));
    h.queue.enqueue(entry).await.unwrap();

    let report = h
        .worker(0, WorkerPoolConfig::default(), h.confirmer())
        .run_cycle()
        .await
        .unwrap();

    assert!(report.had_failures());
    assert_eq!(report.retried, 1);
    let pending = h.pending_entries();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].id, Some(AppointmentId::new(404)));
    assert_eq!(pending[0].attempts, 1);
    assert_eq!(pending[0].last_error.as_deref(), Some("not found"));
    assert_eq!(h.queue.in_flight_length().await, 0);
}

// ---------------------------------------------------------------------------
// Properties
// ---------------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_dequeue_never_double_delivers() {
    let h = Harness::new();
    for _ in 0..50 {
        h.book(h.tomorrow()).await;
    }

    let tasks = (0..8)
        .map(|_| {
            let queue = h.queue.clone();
            tokio::spawn(async move {
                let mut claimed = Vec::new();
                while let Some(entry) = queue.dequeue().await {
                    claimed.push(entry.entry.id.unwrap());
                }
                claimed
            })
        })
        .collect::<Vec<_>>();

    let mut seen = HashSet::new();
    for task in tasks {
        for id in task.await.unwrap() {
            assert!(seen.insert(id), "{id} delivered twice");
        }
    }
    assert_eq!(seen.len(), 50);
    assert_eq!(h.queue.in_flight_length().await, 50);
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_workers_confirm_one_record_per_slot() {
    let h = Harness::with_store(|store| store.with_transition_delay(Duration::from_millis(50)));
    let at = h.tomorrow();
    let first = h.book(at).await;
    let second = h.book(at).await;

    let config = WorkerPoolConfig::default().with_batch_size(1);
    let w1 = h.worker(0, config.clone(), h.confirmer());
    let w2 = h.worker(1, config, h.confirmer());

    let (r1, r2) = tokio::join!(w1.run_cycle(), w2.run_cycle());
    let (r1, r2) = (r1.unwrap(), r2.unwrap());

    assert_eq!(r1.claimed + r2.claimed, 2);
    assert_eq!(r1.completed + r2.completed, 1);
    assert_eq!(r1.retried + r2.retried, 1);
    assert_eq!(h.store.count_at(at, AppointmentStatus::Confirmed), 1);

    let statuses = [h.status(first).await, h.status(second).await];
    assert!(statuses.contains(&AppointmentStatus::Confirmed));
    assert!(statuses.contains(&AppointmentStatus::Pending));
}

#[tokio::test]
async fn test_slot_in_the_past_is_never_confirmed() {
    let h = Harness::new();
    let id = h.book(h.clock.now() + chrono::Duration::minutes(5)).await;
    h.clock.advance(chrono::Duration::minutes(10));

    let report = h
        .worker(0, WorkerPoolConfig::default(), h.confirmer())
        .run_cycle()
        .await
        .unwrap();

    assert_eq!(report.dead_lettered, 1);
    assert_eq!(h.status(id).await, AppointmentStatus::Pending);
    assert_eq!(h.queue.dead_letter_length().await, 1);
}

#[tokio::test]
async fn test_requeue_restores_exactly_the_in_flight_entries() {
    let h = Harness::new();
    for _ in 0..5 {
        h.book(h.tomorrow()).await;
    }
    let claimed: Vec<ClaimedEntry> = {
        let mut claimed = Vec::new();
        for _ in 0..3 {
            claimed.push(h.queue.dequeue().await.unwrap());
        }
        claimed
    };
    let before = h.queue.pending_length().await;

    let moved = h.queue.requeue_all_in_flight().await.unwrap();

    assert_eq!(moved, claimed.len());
    assert_eq!(h.queue.pending_length().await, before + claimed.len());
    assert_eq!(h.queue.in_flight_length().await, 0);
}

#[derive(Debug, Clone)]
enum Op {
    Enqueue,
    Claim,
    Complete,
    Fail,
    RequeueAll,
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        3 => Just(Op::Enqueue),
        3 => Just(Op::Claim),
        2 => Just(Op::Complete),
        2 => Just(Op::Fail),
        1 => Just(Op::RequeueAll),
    ]
}

proptest! {
    #[test]
    fn prop_queue_conserves_entries(ops in prop::collection::vec(op(), 1..40)) {
        let runtime = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
        runtime.block_on(async {
            let h = Harness::new();
            let mut claimed: Vec<ClaimedEntry> = Vec::new();
            let (mut enqueued, mut completed) = (0usize, 0usize);

            for op in ops {
                match op {
                    Op::Enqueue => {
                        h.book(h.tomorrow()).await;
                        enqueued += 1;
                    }
                    Op::Claim => {
                        if let Some(entry) = h.queue.try_dequeue().await.unwrap() {
                            claimed.push(entry);
                        }
                    }
                    Op::Complete => {
                        if let Some(entry) = claimed.pop() {
                            if h.queue.complete(&entry).await.unwrap() {
                                completed += 1;
                            }
                        }
                    }
                    Op::Fail => {
                        if let Some(entry) = claimed.pop() {
                            h.queue.retry_or_dead_letter(&entry, "boom", true, 2).await.unwrap();
                        }
                    }
                    Op::RequeueAll => {
                        h.queue.requeue_all_in_flight().await.unwrap();
                        claimed.clear();
                    }
                }

                let stats = h.queue.stats().await;
                assert_eq!(stats.pending + stats.in_flight + stats.dead_letter, enqueued - completed);
                assert_eq!(stats.in_flight, claimed.len());
            }
        });
    }
}

// ---------------------------------------------------------------------------
// Failure handling
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_successes_complete_while_failures_retry_individually() {
    let h = Harness::new();
    let ok = h.book(h.tomorrow()).await;
    let bad = h.book(h.tomorrow() + chrono::Duration::hours(1)).await;
    let processor = Arc::new(ScriptedProcessor::failing(bad, ProcessingError::NotFound));

    let report = h
        .worker(0, WorkerPoolConfig::default(), processor)
        .run_cycle()
        .await
        .unwrap();

    assert_eq!(report.completed, 1);
    assert_eq!(report.retried, 1);
    let pending = h.pending_entries();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].id, Some(bad));
    assert_ne!(pending[0].id, Some(ok));
}

#[tokio::test]
async fn test_retries_are_bounded_by_dead_letter() {
    let h = Harness::new();
    let id = h.book(h.tomorrow()).await;
    let processor: Arc<dyn Processor> = Arc::new(ScriptedProcessor::failing(id, ProcessingError::NotFound));
    let worker = h.worker(0, WorkerPoolConfig::default().with_max_attempts(4), processor);

    for _ in 0..3 {
        assert_eq!(worker.run_cycle().await.unwrap().retried, 1);
    }
    let last = worker.run_cycle().await.unwrap();
    assert_eq!(last.dead_lettered, 1);

    assert_eq!(worker.run_cycle().await.unwrap().claimed, 0);
    assert_eq!(h.queue.dead_letter_length().await, 1);

    assert_eq!(h.queue.replay_dead_letters().await.unwrap(), 1);
    assert_eq!(h.pending_entries()[0].attempts, 0);
}

#[tokio::test]
async fn test_requeue_in_flight_policy_moves_failed_batch_back() {
    let h = Harness::new();
    h.book(h.tomorrow()).await;
    let bad = h.book(h.tomorrow() + chrono::Duration::hours(1)).await;
    let processor = Arc::new(ScriptedProcessor::failing(bad, ProcessingError::SlotUnavailable));
    let config = WorkerPoolConfig::default().with_failure_policy(FailurePolicy::RequeueInFlight);

    let report = h.worker(0, config, processor).run_cycle().await.unwrap();

    assert_eq!(report.completed, 1);
    assert_eq!(report.requeued, 1);
    assert_eq!(report.dead_lettered, 0);
    let pending = h.pending_entries();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].id, Some(bad));
    assert_eq!(pending[0].attempts, 0);
    assert_eq!(h.queue.in_flight_length().await, 0);
}

#[tokio::test]
async fn test_store_outage_releases_without_counting_attempt() {
    let h = Harness::new();
    let id = h.book(h.tomorrow()).await;
    h.store.set_unavailable(true);

    let report = h
        .worker(0, WorkerPoolConfig::default(), h.confirmer())
        .run_cycle()
        .await
        .unwrap();

    assert!(report.store_outage);
    let pending = h.pending_entries();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].id, Some(id));
    assert_eq!(pending[0].attempts, 0);

    h.store.set_unavailable(false);
    let report = h
        .worker(0, WorkerPoolConfig::default(), h.confirmer())
        .run_cycle()
        .await
        .unwrap();
    assert_eq!(report.completed, 1);
    assert_eq!(h.status(id).await, AppointmentStatus::Confirmed);
}

#[tokio::test]
async fn test_queue_outage_fails_cycle() {
    let h = Harness::new();
    h.book(h.tomorrow()).await;
    h.lists.set_unavailable(true);

    let result = h
        .worker(0, WorkerPoolConfig::default(), h.confirmer())
        .run_cycle()
        .await;

    assert!(result.unwrap_err().is_unavailable());
}

#[tokio::test(start_paused = true)]
async fn test_slow_processing_times_out_and_retries() {
    let h = Harness::new();
    h.book(h.tomorrow()).await;
    let processor = Arc::new(ScriptedProcessor::slow(Duration::from_secs(3600)));
    let config = WorkerPoolConfig::default().with_processing_timeout(Some(Duration::from_secs(1)));

    let report = h.worker(0, config, processor).run_cycle().await.unwrap();

    assert_eq!(report.retried, 1);
    assert_eq!(
        h.pending_entries()[0].last_error.as_deref(),
        Some("processing timed out after 1s")
    );
}

// ---------------------------------------------------------------------------
// Pool lifecycle
// ---------------------------------------------------------------------------

async fn wait_for(h: &Harness, id: AppointmentId, status: AppointmentStatus) {
    for _ in 0..200 {
        if h.status(id).await == status {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(h.status(id).await, status, "timed out waiting for {id}");
}

fn fast_config() -> WorkerPoolConfig {
    WorkerPoolConfig::default()
        .with_workers(2)
        .with_poll_interval(Duration::from_millis(5))
}

#[tokio::test]
async fn test_pool_confirms_submitted_requests_and_shuts_down() {
    let h = Harness::new();
    let cache = InMemoryResponseCache::new();
    let intake = IntakeService::new(
        Arc::new(h.store.clone()),
        h.queue.clone(),
        Arc::new(cache),
        Arc::new(h.clock.clone()),
    );

    let pool = WorkerPool::start(
        fast_config().with_maintenance_interval(Duration::ZERO),
        h.queue.clone(),
        h.confirmer(),
        Arc::new(h.store.clone()),
    )
    .await;
    assert_eq!(pool.len(), 2);

    let receipt = intake.submit(fixtures::request_at(h.tomorrow())).await.unwrap();
    wait_for(&h, receipt.id, AppointmentStatus::Confirmed).await;

    pool.shutdown(Duration::from_secs(1)).await;
    assert_eq!(h.queue.stats().await.in_flight, 0);
    assert!(h.store.maintenance_runs() > 0);
}

#[tokio::test]
async fn test_pool_recovers_in_flight_leftovers_on_start() {
    let h = Harness::new();
    let id = h.book(h.tomorrow()).await;
    h.queue.dequeue().await.unwrap();
    assert_eq!(h.queue.in_flight_length().await, 1);

    let pool = WorkerPool::start(
        fast_config().with_recover_on_start(true),
        h.queue.clone(),
        h.confirmer(),
        Arc::new(h.store.clone()),
    )
    .await;

    wait_for(&h, id, AppointmentStatus::Confirmed).await;
    pool.shutdown(Duration::from_secs(1)).await;
}

#[tokio::test(start_paused = true)]
async fn test_pool_keeps_running_through_queue_outage() {
    let h = Harness::new();
    h.lists.set_unavailable(true);
    let id = h.book_unqueued().await;

    let pool = WorkerPool::start(
        fast_config().with_error_backoff(appointments_runtime::RetryPolicy::fixed(Duration::from_millis(100))),
        h.queue.clone(),
        h.confirmer(),
        Arc::new(h.store.clone()),
    )
    .await;

    tokio::time::sleep(Duration::from_millis(350)).await;
    h.lists.set_unavailable(false);
    let record = h.store.get(id).await.unwrap().unwrap();
    h.queue.enqueue(QueueEntry::for_appointment(&record)).await.unwrap();

    wait_for(&h, id, AppointmentStatus::Confirmed).await;
    pool.shutdown(Duration::from_secs(1)).await;
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_waits_one_deadline_for_all_workers() {
    let h = Harness::new();
    for _ in 0..4 {
        h.book(h.tomorrow()).await;
    }

    let pool = WorkerPool::start(
        fast_config()
            .with_workers(4)
            .with_batch_size(1)
            .with_processing_timeout(None),
        h.queue.clone(),
        Arc::new(ScriptedProcessor::slow(Duration::from_secs(3600))),
        Arc::new(h.store.clone()),
    )
    .await;

    // Every worker is now stuck in the processor with one entry.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(h.queue.in_flight_length().await, 4);

    let started = tokio::time::Instant::now();
    pool.shutdown(Duration::from_secs(1)).await;

    assert!(started.elapsed() < Duration::from_secs(2));
    assert_eq!(h.queue.in_flight_length().await, 4);
}

impl Harness {
    async fn book_unqueued(&self) -> AppointmentId {
        self.store.create(fixtures::request_at(self.tomorrow())).await.unwrap().id
    }
}

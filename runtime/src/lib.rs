//! # Appointments Runtime
//!
//! The booking pipeline: intake, the durable request queue, confirmation and
//! the worker pool that drives it.
//!
//! ## Core Components
//!
//! - **Intake**: validates a booking request, records it and queues it
//! - **Queue**: pending / in-flight / dead-letter lists with atomic claims
//! - **Processor**: confirms a queued request against the system of record
//! - **Worker Pool**: polls the queue, processes batches and settles failures
//!
//! ## Example
//!
//! ```ignore
//! use appointments_runtime::{ConfirmationProcessor, IntakeService, RequestQueue, WorkerPool, WorkerPoolConfig};
//!
//! let queue = RequestQueue::new(lists, QueueKeys::namespaced("hmls"), clock.clone());
//! let intake = IntakeService::new(store.clone(), queue.clone(), cache.clone(), clock.clone());
//! let processor = Arc::new(ConfirmationProcessor::new(store.clone(), clock).with_cache(cache));
//!
//! let pool = WorkerPool::start(WorkerPoolConfig::default(), queue, processor, store).await;
//! let receipt = intake.submit(request).await?;
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

/// Readiness checks
pub mod health;

/// Booking intake and record management
pub mod intake;

/// Prometheus metrics for observability
pub mod metrics;

/// Confirmation of queued requests
pub mod processor;

/// Durable request queue
pub mod queue;

/// Backoff for transient backend failures
pub mod retry;

/// Worker pool draining the queue
pub mod worker;

pub use health::{HealthCheck, HealthReport, HealthStatus};
pub use intake::IntakeService;
pub use processor::{ConfirmationProcessor, Outcome, ProcessingError, Processor};
pub use queue::{ClaimedEntry, Disposition, QueueKeys, QueueReceipt, QueueStats, RequestQueue};
pub use retry::{RetryPolicy, retry_with_backoff};
pub use worker::{CycleReport, FailurePolicy, Worker, WorkerPool, WorkerPoolConfig};

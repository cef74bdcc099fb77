//! Prometheus metrics for the booking pipeline.
//!
//! Metric families:
//! - `queue_*`: enqueues, completions, retries, requeues, dead-letters and
//!   list depths
//! - `processor_*`: confirmation outcomes by reason
//! - `worker_*`: cycle latency, maintenance runs and outage backoffs
//! - `http_*`: rate-limit rejections and cache hit ratio
//!
//! # Example
//!
//! ```rust,no_run
//! use appointments_runtime::metrics::MetricsServer;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut server = MetricsServer::new("0.0.0.0:9090".parse()?);
//! server.start()?;
//!
//! // Metrics available at http://localhost:9090/metrics
//! # Ok(())
//! # }
//! ```

use metrics::{describe_counter, describe_gauge, describe_histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder};
use std::net::SocketAddr;
use thiserror::Error;

/// Errors from metrics operations.
#[derive(Error, Debug)]
pub enum MetricsError {
    /// Failed to build metrics exporter
    #[error("Failed to build metrics exporter: {0}")]
    Build(String),
    /// Failed to install metrics exporter
    #[error("Failed to install metrics exporter: {0}")]
    Install(String),
}

/// Prometheus exporter serving `/metrics` on its own listener.
#[derive(Debug)]
pub struct MetricsServer {
    addr: SocketAddr,
    started: bool,
}

impl MetricsServer {
    /// Create a metrics server that will listen on `addr`.
    #[must_use]
    pub const fn new(addr: SocketAddr) -> Self {
        Self { addr, started: false }
    }

    /// Whether this server installed the global recorder.
    #[must_use]
    pub const fn is_started(&self) -> bool {
        self.started
    }

    /// Install the recorder, start the scrape listener and register metric
    /// descriptions.
    ///
    /// Must be called from within a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns error if the exporter cannot be built or installed.
    ///
    /// # Note
    ///
    /// If a recorder is already installed (e.g. by a test), this logs a
    /// warning and leaves the existing recorder in place.
    pub fn start(&mut self) -> Result<(), MetricsError> {
        let builder = PrometheusBuilder::new()
            .with_http_listener(self.addr)
            .set_buckets_for_metric(
                Matcher::Suffix("duration_seconds".to_string()),
                &[0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0],
            )
            .map_err(|e| MetricsError::Build(e.to_string()))?;

        let (recorder, exporter) = builder
            .build()
            .map_err(|e| MetricsError::Build(e.to_string()))?;

        match metrics::set_global_recorder(recorder) {
            Ok(()) => {
                tokio::spawn(async move {
                    if exporter.await.is_err() {
                        tracing::error!("Metrics listener stopped");
                    }
                });
                register_metrics();
                self.started = true;
                tracing::info!(addr = %self.addr, "Metrics server started");
                Ok(())
            }
            Err(e) => {
                let err_msg = e.to_string();
                if err_msg.contains("already") {
                    tracing::warn!("Metrics recorder already initialized, skipping re-initialization");
                    Ok(())
                } else {
                    Err(MetricsError::Install(err_msg))
                }
            }
        }
    }
}

/// Register all metric descriptions.
fn register_metrics() {
    // Queue
    describe_counter!("queue_entries_enqueued_total", "Booking requests pushed onto the pending list");
    describe_counter!("queue_entries_completed_total", "Entries removed from in-flight after processing");
    describe_counter!("queue_entries_retried_total", "Failed entries put back on pending individually");
    describe_counter!("queue_entries_requeued_total", "Entries moved back from in-flight in bulk");
    describe_counter!("queue_entries_dead_lettered_total", "Entries moved to the dead-letter list");
    describe_gauge!("queue_pending_entries", "Entries waiting on the pending list");
    describe_gauge!("queue_in_flight_entries", "Entries claimed by workers");
    describe_gauge!("queue_dead_letter_entries", "Entries parked on the dead-letter list");

    // Processor
    describe_counter!("processor_confirmations_total", "Appointments moved to confirmed");
    describe_counter!(
        "processor_settled_without_write_total",
        "Entries settled without a write (already confirmed or cancelled)"
    );
    describe_counter!("processor_failures_total", "Confirmation failures by reason");

    // Worker
    describe_histogram!("worker_cycle_duration_seconds", "Time to claim and settle one batch");
    describe_counter!("worker_maintenance_runs_total", "Periodic maintenance runs");
    describe_counter!("worker_backoffs_total", "Backoffs after a store outage");

    // HTTP
    describe_counter!("http_rate_limited_total", "Requests rejected by the rate limiter");
    describe_counter!("http_cache_hits_total", "Read responses served from cache");
    describe_counter!("http_cache_misses_total", "Read responses computed and cached");
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_metrics_server_creation() {
        let server = MetricsServer::new("127.0.0.1:0".parse().unwrap());
        assert!(!server.is_started());
    }

    #[tokio::test]
    async fn test_metrics_server_start_is_idempotent() {
        let mut first = MetricsServer::new("127.0.0.1:0".parse().unwrap());
        assert!(first.start().is_ok());

        // The global recorder is already installed; a second start leaves it in place.
        let mut second = MetricsServer::new("127.0.0.1:0".parse().unwrap());
        assert!(second.start().is_ok());
        assert!(!second.is_started());
    }
}

//! Process lifecycle and graceful shutdown.
//!
//! 1. **Startup**: spawn the confirmation workers
//! 2. **Runtime**: serve HTTP until Ctrl+C or SIGTERM
//! 3. **Shutdown**: stop accepting connections, then stop the workers under
//!    the configured timeout. Entries still in flight stay in the in-flight
//!    list and are recovered by a later requeue.

use crate::config::Config;
use anyhow::Context;
use appointments_core::AppointmentStore;
use appointments_runtime::{Processor, RequestQueue, WorkerPool};
use std::sync::Arc;
use tracing::info;

/// A fully wired application, ready to run.
pub struct Application {
    listener: tokio::net::TcpListener,
    router: axum::Router,
    queue: RequestQueue,
    processor: Arc<dyn Processor>,
    store: Arc<dyn AppointmentStore>,
    config: Config,
}

impl Application {
    /// Assemble an application from connected parts.
    #[must_use]
    pub fn new(
        listener: tokio::net::TcpListener,
        router: axum::Router,
        queue: RequestQueue,
        processor: Arc<dyn Processor>,
        store: Arc<dyn AppointmentStore>,
        config: Config,
    ) -> Self {
        Self {
            listener,
            router,
            queue,
            processor,
            store,
            config,
        }
    }

    /// Run until a shutdown signal, then drain the workers.
    ///
    /// # Errors
    ///
    /// Returns error if the HTTP server fails.
    pub async fn run(self) -> anyhow::Result<()> {
        let pool = WorkerPool::start(self.config.worker_pool(), self.queue, self.processor, self.store).await;

        info!(
            address = ?self.listener.local_addr().ok(),
            workers = pool.len(),
            "HTTP server listening for requests"
        );
        axum::serve(self.listener, self.router)
            .with_graceful_shutdown(shutdown_signal())
            .await
            .context("HTTP server failed")?;

        info!("HTTP server stopped, stopping workers...");
        pool.shutdown(self.config.server.shutdown_timeout).await;

        info!("Graceful shutdown complete");
        Ok(())
    }
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            info!("Received Ctrl+C signal");
        }
        () = terminate => {
            info!("Received SIGTERM signal");
        }
    }
}

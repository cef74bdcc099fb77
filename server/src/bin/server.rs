//! Appointment booking server.
//!
//! Serves the booking API and runs the confirmation workers in one process.
//!
//! # Usage
//!
//! ```bash
//! # Start infrastructure
//! docker run -d -p 5432:5432 -e POSTGRES_PASSWORD=postgres -e POSTGRES_DB=hmls postgres:16
//! docker run -d -p 6379:6379 redis:7-alpine
//!
//! # Run server
//! cargo run --bin appointments-server
//! ```

use anyhow::Context;
use appointments_server::{Config, app};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Loads .env first, so RUST_LOG may come from there.
    let config = Config::from_env().context("Invalid configuration")?;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,appointments=debug,sqlx=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!(
        http = %format!("{}:{}", config.server.host, config.server.port),
        workers = config.worker.count,
        namespace = %config.redis.queue_namespace,
        "Configuration loaded"
    );

    let application = app::build(config).await?;
    application.run().await
}

//! Health check endpoints.
//!
//! These endpoints are used by load balancers and monitoring systems
//! to verify service health.

use crate::state::AppState;
use appointments_runtime::HealthReport;
use appointments_runtime::health::{check_queue, check_store};
use axum::{Json, extract::State, http::StatusCode};
use serde_json::{Value, json};

/// Welcome message.
///
/// ```text
/// GET /
/// ```
#[allow(clippy::unused_async)]
pub async fn root() -> Json<Value> {
    Json(json!({ "message": "Welcome to HMLS API" }))
}

/// Simple health check endpoint (for basic liveness).
///
/// Returns 200 OK to indicate the process is serving. Dependencies are not
/// checked here.
#[allow(clippy::unused_async)]
pub async fn health_check() -> (StatusCode, &'static str) {
    (StatusCode::OK, "ok")
}

/// Readiness: pings the queue store and the database.
///
/// # Status Codes
///
/// - 200 OK: Healthy or Degraded
/// - 503 Service Unavailable: any dependency unreachable
pub async fn readiness(State(state): State<AppState>) -> (StatusCode, Json<HealthReport>) {
    let report = HealthReport::new(vec![
        check_queue(state.intake.queue()).await,
        check_store(state.intake.store().as_ref()).await,
    ]);

    let status = if report.is_ready() {
        StatusCode::OK
    } else {
        tracing::warn!(status = ?report.status, "Readiness check failed");
        StatusCode::SERVICE_UNAVAILABLE
    };

    (status, Json(report))
}

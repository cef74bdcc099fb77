//! Queue depth endpoint.

use crate::state::AppState;
use appointments_runtime::QueueStats;
use axum::{Json, extract::State};

/// Pending, in-flight and dead-letter list lengths.
///
/// ```text
/// GET /queue/stats
/// ```
pub async fn queue_stats(State(state): State<AppState>) -> Json<QueueStats> {
    Json(state.intake.queue().stats().await)
}

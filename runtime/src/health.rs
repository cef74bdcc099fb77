//! Readiness checks for the queue and the system of record.

use crate::queue::RequestQueue;
use appointments_core::AppointmentStore;
use serde::Serialize;

/// Health check status levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Component is fully operational
    Healthy,

    /// Component is operational but needs attention (e.g. dead-lettered entries)
    Degraded,

    /// Component is not operational
    Unhealthy,
}

impl HealthStatus {
    /// Whether traffic can be accepted.
    #[must_use]
    pub const fn is_ready(self) -> bool {
        matches!(self, Self::Healthy | Self::Degraded)
    }

    /// Get the worst status between two statuses
    #[must_use]
    pub const fn worst(self, other: Self) -> Self {
        match (self, other) {
            (Self::Unhealthy, _) | (_, Self::Unhealthy) => Self::Unhealthy,
            (Self::Degraded, _) | (_, Self::Degraded) => Self::Degraded,
            _ => Self::Healthy,
        }
    }
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Healthy => write!(f, "healthy"),
            Self::Degraded => write!(f, "degraded"),
            Self::Unhealthy => write!(f, "unhealthy"),
        }
    }
}

/// Health check result for a component
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthCheck {
    /// Name of the component being checked
    pub component: String,

    /// Current health status
    pub status: HealthStatus,

    /// Optional message providing details
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    /// Extra figures, e.g. list lengths
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub metadata: Vec<(String, String)>,
}

impl HealthCheck {
    /// Create a healthy check result
    #[must_use]
    pub fn healthy(component: impl Into<String>) -> Self {
        Self {
            component: component.into(),
            status: HealthStatus::Healthy,
            message: None,
            metadata: Vec::new(),
        }
    }

    /// Create a degraded check result
    #[must_use]
    pub fn degraded(component: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            component: component.into(),
            status: HealthStatus::Degraded,
            message: Some(message.into()),
            metadata: Vec::new(),
        }
    }

    /// Create an unhealthy check result
    #[must_use]
    pub fn unhealthy(component: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            component: component.into(),
            status: HealthStatus::Unhealthy,
            message: Some(message.into()),
            metadata: Vec::new(),
        }
    }

    /// Add metadata to the health check
    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.metadata.push((key.into(), value.to_string()));
        self
    }
}

/// Aggregated health report
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    /// Overall status (worst of all checks)
    pub status: HealthStatus,

    /// Individual component checks
    pub checks: Vec<HealthCheck>,

    /// Timestamp when report was generated
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

impl HealthReport {
    /// Create a new health report from checks
    #[must_use]
    pub fn new(checks: Vec<HealthCheck>) -> Self {
        let status = checks
            .iter()
            .map(|c| c.status)
            .fold(HealthStatus::Healthy, HealthStatus::worst);

        Self {
            status,
            checks,
            timestamp: chrono::Utc::now(),
        }
    }

    /// Whether traffic can be accepted.
    #[must_use]
    pub const fn is_ready(&self) -> bool {
        self.status.is_ready()
    }
}

/// Pending entries above which the queue reports degraded.
pub const BACKLOG_THRESHOLD: usize = 1000;

/// Check the queue store and the shape of the lists.
///
/// Unreachable → unhealthy. Dead-lettered entries or a backlog over
/// [`BACKLOG_THRESHOLD`] → degraded.
pub async fn check_queue(queue: &RequestQueue) -> HealthCheck {
    if let Err(e) = queue.ping().await {
        return HealthCheck::unhealthy("queue", e.to_string());
    }

    let stats = queue.stats().await;
    let check = if stats.dead_letter > 0 {
        HealthCheck::degraded("queue", format!("{} entries dead-lettered", stats.dead_letter))
    } else if stats.pending > BACKLOG_THRESHOLD {
        HealthCheck::degraded("queue", format!("{} entries waiting", stats.pending))
    } else {
        HealthCheck::healthy("queue")
    };

    check
        .with_metadata("pending", stats.pending)
        .with_metadata("in_flight", stats.in_flight)
        .with_metadata("dead_letter", stats.dead_letter)
}

/// Check the system of record.
pub async fn check_store(store: &dyn AppointmentStore) -> HealthCheck {
    match store.ping().await {
        Ok(()) => HealthCheck::healthy("database"),
        Err(e) => HealthCheck::unhealthy("database", e.to_string()),
    }
}

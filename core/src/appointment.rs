//! The persisted appointment record and its status machine.
//!
//! ```text
//! Pending ──confirm──▶ Confirmed ──▶ Completed
//!    │                    │
//!    └──────cancel────────┴──▶ Cancelled
//! ```
//!
//! Only `Confirmed` and `Completed` records hold a time slot. A slot is an
//! exact instant; at most one record may hold it at a time.

use crate::error::BookingError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of a persisted appointment record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AppointmentId(i64);

impl AppointmentId {
    /// Wrap a raw database identifier.
    #[must_use]
    pub const fn new(id: i64) -> Self {
        Self(id)
    }

    /// The raw database identifier.
    #[must_use]
    pub const fn get(self) -> i64 {
        self.0
    }
}

impl fmt::Display for AppointmentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle status of an appointment record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AppointmentStatus {
    /// Submitted, waiting for a worker to confirm it
    #[default]
    Pending,
    /// Slot checked and held
    Confirmed,
    /// Service delivered
    Completed,
    /// Withdrawn; no longer holds or competes for a slot
    Cancelled,
}

impl AppointmentStatus {
    /// Every status, in lifecycle order.
    pub const ALL: [Self; 4] = [Self::Pending, Self::Confirmed, Self::Completed, Self::Cancelled];

    /// Convert status to database string representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Confirmed => "confirmed",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
        }
    }

    /// Parse status from its string representation.
    ///
    /// # Errors
    ///
    /// Returns [`BookingError::Validation`] if the string doesn't match a known status.
    pub fn parse(s: &str) -> Result<Self, BookingError> {
        match s {
            "pending" => Ok(Self::Pending),
            "confirmed" => Ok(Self::Confirmed),
            "completed" => Ok(Self::Completed),
            "cancelled" => Ok(Self::Cancelled),
            _ => {
                let valid: Vec<&str> = Self::ALL.iter().map(Self::as_str).collect();
                Err(BookingError::Validation(format!(
                    "Invalid status. Must be one of: {}",
                    valid.join(", ")
                )))
            }
        }
    }

    /// Whether a record in this status holds its time slot.
    #[must_use]
    pub const fn holds_slot(self) -> bool {
        matches!(self, Self::Confirmed | Self::Completed)
    }
}

impl fmt::Display for AppointmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A validated booking request, before it has been persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewAppointment {
    /// Contact email
    pub email: String,
    /// Contact phone number
    pub phone_number: String,
    /// Requested slot
    pub appointment_time: DateTime<Utc>,
    /// Vehicle model year
    pub vehicle_year: String,
    /// Vehicle manufacturer
    pub vehicle_make: String,
    /// Vehicle model
    pub vehicle_model: String,
    /// What the customer reports is wrong
    pub problem_description: String,
}

/// A persisted appointment record (system of record).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Appointment {
    /// Record identifier
    pub id: AppointmentId,
    /// Contact email
    pub email: String,
    /// Contact phone number
    pub phone_number: String,
    /// Scheduled slot
    pub appointment_time: DateTime<Utc>,
    /// Vehicle model year
    pub vehicle_year: String,
    /// Vehicle manufacturer
    pub vehicle_make: String,
    /// Vehicle model
    pub vehicle_model: String,
    /// What the customer reports is wrong
    pub problem_description: String,
    /// Lifecycle status
    pub status: AppointmentStatus,
    /// When the record was created
    pub created_at: DateTime<Utc>,
    /// When the record last changed
    pub updated_at: Option<DateTime<Utc>>,
}

impl Appointment {
    /// Build the record a store would persist for `new`.
    #[must_use]
    pub fn from_new(id: AppointmentId, new: NewAppointment, created_at: DateTime<Utc>) -> Self {
        Self {
            id,
            email: new.email,
            phone_number: new.phone_number,
            appointment_time: new.appointment_time,
            vehicle_year: new.vehicle_year,
            vehicle_make: new.vehicle_make,
            vehicle_model: new.vehicle_model,
            problem_description: new.problem_description,
            status: AppointmentStatus::Pending,
            created_at,
            updated_at: None,
        }
    }
}

/// Filter for the list read path. `None` fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppointmentFilter {
    /// Exact email match
    pub email: Option<String>,
    /// Exact phone number match
    pub phone_number: Option<String>,
    /// Exact status match
    pub status: Option<AppointmentStatus>,
}

impl AppointmentFilter {
    /// Whether `appointment` passes this filter.
    #[must_use]
    pub fn matches(&self, appointment: &Appointment) -> bool {
        self.email.as_ref().is_none_or(|e| *e == appointment.email)
            && self
                .phone_number
                .as_ref()
                .is_none_or(|p| *p == appointment.phone_number)
            && self.status.is_none_or(|s| s == appointment.status)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trips_through_str() {
        for status in AppointmentStatus::ALL {
            assert_eq!(AppointmentStatus::parse(status.as_str()).unwrap(), status);
        }
    }

    #[test]
    fn test_status_parse_lists_valid_values() {
        let err = AppointmentStatus::parse("done").unwrap_err();
        assert_eq!(
            err.to_string(),
            "Validation error: Invalid status. Must be one of: pending, confirmed, completed, cancelled"
        );
    }

    #[test]
    fn test_only_confirmed_and_completed_hold_slot() {
        assert!(!AppointmentStatus::Pending.holds_slot());
        assert!(AppointmentStatus::Confirmed.holds_slot());
        assert!(AppointmentStatus::Completed.holds_slot());
        assert!(!AppointmentStatus::Cancelled.holds_slot());
    }

    #[test]
    fn test_filter_matches() {
        let appointment = Appointment::from_new(
            AppointmentId::new(1),
            NewAppointment {
                email: "a@example.com".to_string(),
                phone_number: "+12345678901".to_string(),
                appointment_time: Utc::now(),
                vehicle_year: "2020".to_string(),
                vehicle_make: "Toyota".to_string(),
                vehicle_model: "Camry".to_string(),
                problem_description: "Regular maintenance".to_string(),
            },
            Utc::now(),
        );

        assert!(AppointmentFilter::default().matches(&appointment));
        assert!(AppointmentFilter {
            email: Some("a@example.com".to_string()),
            status: Some(AppointmentStatus::Pending),
            ..Default::default()
        }
        .matches(&appointment));
        assert!(!AppointmentFilter {
            status: Some(AppointmentStatus::Confirmed),
            ..Default::default()
        }
        .matches(&appointment));
    }
}

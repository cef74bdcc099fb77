//! Queue entries and their wire format.
//!
//! A [`QueueEntry`] travels through the durable queue as a JSON document.
//! The encoding is canonical: fields are written in declaration order, unknown
//! fields are kept in a sorted map, and every instant is written as RFC 3339
//! with nanosecond precision and an explicit offset:
//!
//! ```text
//! {"id":42,"email":"a@example.com",...,"appointment_time":"2026-10-20T09:30:00.000000000+00:00",...}
//! ```
//!
//! Encoding the same value twice yields identical bytes, and decoding an
//! encoded entry yields an equal entry, instants included.

use crate::appointment::{Appointment, AppointmentId, NewAppointment};
use crate::error::StoreError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One booking request waiting for (or undergoing) confirmation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueEntry {
    /// Identifier of the persisted record. Required before enqueue.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<AppointmentId>,
    /// Contact email
    pub email: String,
    /// Contact phone number
    pub phone_number: String,
    /// Requested slot
    #[serde(with = "instant")]
    pub appointment_time: DateTime<Utc>,
    /// Vehicle model year
    pub vehicle_year: String,
    /// Vehicle manufacturer
    pub vehicle_make: String,
    /// Vehicle model
    pub vehicle_model: String,
    /// What the customer reports is wrong
    pub problem_description: String,
    /// When the entry entered the queue. Stamped by enqueue.
    #[serde(default, with = "instant::option", skip_serializing_if = "Option::is_none")]
    pub queued_at: Option<DateTime<Utc>>,
    /// Failed processing attempts so far.
    #[serde(default, skip_serializing_if = "is_zero")]
    pub attempts: u32,
    /// Error from the most recent failed attempt.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    /// Fields this version does not know about, preserved as-is.
    ///
    /// Keys must not collide with the named fields above.
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

#[allow(clippy::trivially_copy_pass_by_ref)] // serde passes by reference
const fn is_zero(n: &u32) -> bool {
    *n == 0
}

impl QueueEntry {
    /// Build an entry for a request that has not been persisted yet.
    #[must_use]
    pub fn from_request(request: NewAppointment) -> Self {
        Self {
            id: None,
            email: request.email,
            phone_number: request.phone_number,
            appointment_time: request.appointment_time,
            vehicle_year: request.vehicle_year,
            vehicle_make: request.vehicle_make,
            vehicle_model: request.vehicle_model,
            problem_description: request.problem_description,
            queued_at: None,
            attempts: 0,
            last_error: None,
            extra: BTreeMap::new(),
        }
    }

    /// Build the entry that asks for `appointment` to be confirmed.
    #[must_use]
    pub fn for_appointment(appointment: &Appointment) -> Self {
        Self {
            id: Some(appointment.id),
            email: appointment.email.clone(),
            phone_number: appointment.phone_number.clone(),
            appointment_time: appointment.appointment_time,
            vehicle_year: appointment.vehicle_year.clone(),
            vehicle_make: appointment.vehicle_make.clone(),
            vehicle_model: appointment.vehicle_model.clone(),
            problem_description: appointment.problem_description.clone(),
            queued_at: None,
            attempts: 0,
            last_error: None,
            extra: BTreeMap::new(),
        }
    }

    /// Record one more failed attempt.
    #[must_use]
    pub fn with_failure(mut self, error: impl Into<String>) -> Self {
        self.attempts = self.attempts.saturating_add(1);
        self.last_error = Some(error.into());
        self
    }
}

/// Serialize an entry to its canonical wire form.
///
/// # Errors
///
/// Returns [`StoreError::Serialization`] if an `extra` value cannot be encoded.
pub fn encode(entry: &QueueEntry) -> Result<String, StoreError> {
    Ok(serde_json::to_string(entry)?)
}

/// Deserialize an entry from its wire form.
///
/// # Errors
///
/// Returns [`StoreError::Serialization`] if `raw` is not a valid entry.
pub fn decode(raw: &str) -> Result<QueueEntry, StoreError> {
    Ok(serde_json::from_str(raw)?)
}

/// Exact textual encoding for instants.
///
/// Use with `#[serde(with = "instant")]`, or `instant::option` for
/// `Option<DateTime<Utc>>`.
pub mod instant {
    use chrono::{DateTime, SecondsFormat, Utc};
    use serde::{Deserialize, Deserializer, Serializer, de};

    /// Format an instant as RFC 3339 with nanoseconds and a `+00:00` offset.
    #[must_use]
    pub fn format(value: &DateTime<Utc>) -> String {
        value.to_rfc3339_opts(SecondsFormat::Nanos, false)
    }

    /// Parse any RFC 3339 timestamp and normalize it to UTC.
    ///
    /// # Errors
    ///
    /// Returns the chrono parse error if `raw` is not RFC 3339.
    pub fn parse(raw: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
        DateTime::parse_from_rfc3339(raw).map(|dt| dt.with_timezone(&Utc))
    }

    /// Serialize with [`format`].
    ///
    /// # Errors
    ///
    /// Propagates serializer errors.
    pub fn serialize<S: Serializer>(value: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format(value))
    }

    /// Deserialize with [`parse`].
    ///
    /// # Errors
    ///
    /// Fails if the value is not an RFC 3339 string.
    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(deserializer)?;
        parse(&raw).map_err(de::Error::custom)
    }

    /// Same encoding for optional instants.
    pub mod option {
        use chrono::{DateTime, Utc};
        use serde::{Deserialize, Deserializer, Serializer, de};

        /// Serialize `Some` with [`super::format`], `None` as null.
        ///
        /// # Errors
        ///
        /// Propagates serializer errors.
        #[allow(clippy::ref_option)] // serde passes by reference
        pub fn serialize<S: Serializer>(
            value: &Option<DateTime<Utc>>,
            serializer: S,
        ) -> Result<S::Ok, S::Error> {
            match value {
                Some(v) => serializer.serialize_some(&super::format(v)),
                None => serializer.serialize_none(),
            }
        }

        /// Deserialize null as `None`, a string with [`super::parse`].
        ///
        /// # Errors
        ///
        /// Fails if a present value is not an RFC 3339 string.
        pub fn deserialize<'de, D: Deserializer<'de>>(
            deserializer: D,
        ) -> Result<Option<DateTime<Utc>>, D::Error> {
            Option::<String>::deserialize(deserializer)?
                .map(|raw| super::parse(&raw).map_err(de::Error::custom))
                .transpose()
        }
    }
}

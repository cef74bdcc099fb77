//! Appointment endpoints.
//!
//! ```text
//! POST   /appointments          queue a booking request
//! GET    /appointments          list, filtered by email, phone_number (or phone), status
//! GET    /appointments/:id      one record
//! PUT    /appointments/:id      change status
//! DELETE /appointments/:id      cancel
//! ```

use crate::cache::{CachedJson, cached};
use crate::error::AppError;
use crate::extractors::ClientIp;
use crate::state::AppState;
use appointments_core::cache::LIST_ROUTE;
use appointments_core::{
    Appointment, AppointmentFilter, AppointmentId, AppointmentStatus, BookingError, CacheKey, NewAppointment,
};
use appointments_runtime::QueueReceipt;
use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use serde::Deserialize;

/// Query parameters of `GET /appointments`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ListParams {
    /// Exact email match
    pub email: Option<String>,
    /// Exact phone number match, also accepted as `phone`
    #[serde(alias = "phone")]
    pub phone_number: Option<String>,
    /// One of `pending`, `confirmed`, `completed`, `cancelled`
    pub status: Option<String>,
}

impl ListParams {
    fn cache_key(&self) -> CacheKey {
        CacheKey::new(
            LIST_ROUTE,
            [
                ("email", self.email.as_deref().unwrap_or_default()),
                ("phone_number", self.phone_number.as_deref().unwrap_or_default()),
                ("status", self.status.as_deref().unwrap_or_default()),
            ],
        )
    }

    fn filter(&self) -> Result<AppointmentFilter, BookingError> {
        let present = |v: &Option<String>| {
            v.as_deref()
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(str::to_string)
        };

        Ok(AppointmentFilter {
            email: present(&self.email),
            phone_number: present(&self.phone_number),
            status: present(&self.status)
                .map(|s| AppointmentStatus::parse(&s))
                .transpose()?,
        })
    }
}

/// Body of `PUT /appointments/:id`.
#[derive(Debug, Clone, Deserialize)]
pub struct StatusUpdate {
    /// New status name
    pub status: String,
}

/// Queue a booking request for confirmation.
///
/// # Errors
///
/// `400` for a past slot or a slot that is already booked, `503` when the
/// queue or the database is unreachable.
pub async fn create_appointment(
    State(state): State<AppState>,
    client_ip: ClientIp,
    Json(request): Json<NewAppointment>,
) -> Result<Json<QueueReceipt>, AppError> {
    tracing::info!(
        client_ip = %client_ip.0,
        appointment_time = %request.appointment_time,
        "Booking request received"
    );

    let receipt = state.intake.submit(request).await?;
    Ok(Json(receipt))
}

/// List appointments, latest slot first.
///
/// # Errors
///
/// `400` for an unknown status filter.
pub async fn list_appointments(
    State(state): State<AppState>,
    Query(params): Query<ListParams>,
) -> Result<CachedJson, AppError> {
    let filter = params.filter()?;
    let key = params.cache_key();
    let intake = &state.intake;

    cached(state.cache.as_ref(), &key, state.cache_ttl, move || async move {
        Ok::<Vec<Appointment>, AppError>(intake.list(filter).await?)
    })
    .await
}

/// Fetch one appointment.
///
/// # Errors
///
/// `404` if there is no such record.
pub async fn get_appointment(State(state): State<AppState>, Path(id): Path<i64>) -> Result<CachedJson, AppError> {
    let id = AppointmentId::new(id);
    let key = CacheKey::appointment(id);
    let intake = &state.intake;

    cached(state.cache.as_ref(), &key, state.cache_ttl, move || async move {
        Ok::<Appointment, AppError>(intake.get(id).await?)
    })
    .await
}

/// Change an appointment's status.
///
/// # Errors
///
/// `400` for an unknown status, `404` if there is no such record.
pub async fn update_appointment(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(update): Json<StatusUpdate>,
) -> Result<Json<Appointment>, AppError> {
    let appointment = state
        .intake
        .update_status(AppointmentId::new(id), &update.status)
        .await?;
    Ok(Json(appointment))
}

/// Cancel an appointment.
///
/// # Errors
///
/// `404` if there is no such record.
pub async fn delete_appointment(State(state): State<AppState>, Path(id): Path<i64>) -> Result<StatusCode, AppError> {
    state.intake.cancel(AppointmentId::new(id)).await?;
    Ok(StatusCode::NO_CONTENT)
}

//! `PostgreSQL` system of record for appointments.
//!
//! This crate implements [`AppointmentStore`] on a sqlx connection pool:
//!
//! - Records live in the `appointments` table (see `migrations/`)
//! - Slot uniqueness is a partial unique index on `appointment_time` over
//!   `confirmed` and `completed` rows, so two concurrent confirmations for one
//!   instant cannot both commit
//! - Status changes run in a transaction and roll back on any error
//!
//! # Example
//!
//! ```ignore
//! use appointments_postgres::PostgresAppointmentStore;
//!
//! async fn example() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = PostgresAppointmentStore::connect("postgres://localhost/hmls", 20).await?;
//!     store.migrate().await?;
//!     Ok(())
//! }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use appointments_core::{
    Appointment, AppointmentFilter, AppointmentId, AppointmentStatus, AppointmentStore, NewAppointment,
    StoreError, StoreFuture,
};
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;

const COLUMNS: &str = "id, email, phone_number, appointment_time, vehicle_year, vehicle_make, \
                       vehicle_model, problem_description, status, created_at, updated_at";

#[derive(sqlx::FromRow)]
struct AppointmentRow {
    id: i64,
    email: String,
    phone_number: String,
    appointment_time: DateTime<Utc>,
    vehicle_year: String,
    vehicle_make: String,
    vehicle_model: String,
    problem_description: String,
    status: String,
    created_at: DateTime<Utc>,
    updated_at: Option<DateTime<Utc>>,
}

impl TryFrom<AppointmentRow> for Appointment {
    type Error = StoreError;

    fn try_from(row: AppointmentRow) -> Result<Self, Self::Error> {
        let status = AppointmentStatus::parse(&row.status)
            .map_err(|_| StoreError::Serialization(format!("Unknown status in row {}: {}", row.id, row.status)))?;

        Ok(Self {
            id: AppointmentId::new(row.id),
            email: row.email,
            phone_number: row.phone_number,
            appointment_time: row.appointment_time,
            vehicle_year: row.vehicle_year,
            vehicle_make: row.vehicle_make,
            vehicle_model: row.vehicle_model,
            problem_description: row.problem_description,
            status,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

/// Translate a sqlx error, keeping outages distinguishable.
fn map_error(operation: &str, err: &sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Io(_) | sqlx::Error::Tls(_) | sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed => {
            tracing::warn!(operation, error = %err, "Database unavailable");
            StoreError::Unavailable(format!("Failed to {operation}: {err}"))
        }
        _ => {
            tracing::error!(operation, error = %err, "Database query failed");
            StoreError::Backend(format!("Failed to {operation}: {err}"))
        }
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db_err) if db_err.is_unique_violation())
}

/// [`AppointmentStore`] on `PostgreSQL`.
#[derive(Clone, Debug)]
pub struct PostgresAppointmentStore {
    pool: PgPool,
}

impl PostgresAppointmentStore {
    /// Connect a pool of up to `max_connections` to `database_url`.
    ///
    /// # Errors
    ///
    /// Returns `Unavailable` if the database cannot be reached.
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(5))
            .connect(database_url)
            .await
            .map_err(|e| map_error("connect", &e))?;

        tracing::info!(max_connections, "Connected to PostgreSQL");
        Ok(Self::from_pool(pool))
    }

    /// Wrap an existing pool.
    #[must_use]
    pub const fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// The underlying pool.
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Create the `appointments` table and its indexes if missing.
    ///
    /// # Errors
    ///
    /// Returns `Backend` if a migration fails.
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| StoreError::Backend(format!("Migration failed: {e}")))?;
        Ok(())
    }

    async fn transition_in_tx(
        &self,
        id: AppointmentId,
        status: AppointmentStatus,
    ) -> Result<Appointment, StoreError> {
        let mut tx = self.pool.begin().await.map_err(|e| map_error("begin transaction", &e))?;

        let instant: Option<(DateTime<Utc>,)> =
            sqlx::query_as("SELECT appointment_time FROM appointments WHERE id = $1 FOR UPDATE")
                .bind(id.get())
                .fetch_optional(&mut *tx)
                .await
                .map_err(|e| map_error("lock appointment", &e))?;
        let Some((instant,)) = instant else {
            return Err(StoreError::NotFound(format!("appointment {id}")));
        };

        let row: AppointmentRow = sqlx::query_as(&format!(
            "UPDATE appointments SET status = $2, updated_at = now() WHERE id = $1 RETURNING {COLUMNS}"
        ))
        .bind(id.get())
        .bind(status.as_str())
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                tracing::info!(id = %id, instant = %instant, "Slot already held");
                StoreError::SlotTaken { instant }
            } else {
                map_error("update appointment status", &e)
            }
        })?;

        tx.commit().await.map_err(|e| map_error("commit transaction", &e))?;
        row.try_into()
    }
}

impl AppointmentStore for PostgresAppointmentStore {
    fn create(&self, request: NewAppointment) -> StoreFuture<'_, Appointment> {
        Box::pin(async move {
            let row: AppointmentRow = sqlx::query_as(&format!(
                r"
                INSERT INTO appointments (
                    email, phone_number, appointment_time, vehicle_year,
                    vehicle_make, vehicle_model, problem_description, status
                ) VALUES ($1, $2, $3, $4, $5, $6, $7, 'pending')
                RETURNING {COLUMNS}
                "
            ))
            .bind(&request.email)
            .bind(&request.phone_number)
            .bind(request.appointment_time)
            .bind(&request.vehicle_year)
            .bind(&request.vehicle_make)
            .bind(&request.vehicle_model)
            .bind(&request.problem_description)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| map_error("create appointment", &e))?;

            row.try_into()
        })
    }

    fn get(&self, id: AppointmentId) -> StoreFuture<'_, Option<Appointment>> {
        Box::pin(async move {
            let row: Option<AppointmentRow> =
                sqlx::query_as(&format!("SELECT {COLUMNS} FROM appointments WHERE id = $1"))
                    .bind(id.get())
                    .fetch_optional(&self.pool)
                    .await
                    .map_err(|e| map_error("load appointment", &e))?;

            row.map(Appointment::try_from).transpose()
        })
    }

    fn list(&self, filter: AppointmentFilter) -> StoreFuture<'_, Vec<Appointment>> {
        Box::pin(async move {
            let rows: Vec<AppointmentRow> = sqlx::query_as(&format!(
                r"
                SELECT {COLUMNS} FROM appointments
                WHERE ($1::TEXT IS NULL OR email = $1)
                  AND ($2::TEXT IS NULL OR phone_number = $2)
                  AND ($3::TEXT IS NULL OR status = $3)
                ORDER BY appointment_time DESC, id DESC
                "
            ))
            .bind(filter.email.as_deref())
            .bind(filter.phone_number.as_deref())
            .bind(filter.status.map(|s| s.as_str()))
            .fetch_all(&self.pool)
            .await
            .map_err(|e| map_error("list appointments", &e))?;

            rows.into_iter().map(Appointment::try_from).collect()
        })
    }

    fn find_at(&self, instant: DateTime<Utc>) -> StoreFuture<'_, Vec<Appointment>> {
        Box::pin(async move {
            let rows: Vec<AppointmentRow> = sqlx::query_as(&format!(
                "SELECT {COLUMNS} FROM appointments \
                 WHERE appointment_time = $1 AND status <> 'cancelled' ORDER BY id"
            ))
            .bind(instant)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| map_error("find appointments by time", &e))?;

            rows.into_iter().map(Appointment::try_from).collect()
        })
    }

    fn transition(&self, id: AppointmentId, status: AppointmentStatus) -> StoreFuture<'_, Appointment> {
        Box::pin(self.transition_in_tx(id, status))
    }

    fn maintain(&self) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            sqlx::query("SELECT 1")
                .execute(&self.pool)
                .await
                .map_err(|e| map_error("probe connection", &e))?;

            tracing::debug!(
                pool_size = self.pool.size(),
                idle = self.pool.num_idle(),
                "Database pool healthy"
            );
            Ok(())
        })
    }

    fn ping(&self) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            sqlx::query("SELECT 1")
                .execute(&self.pool)
                .await
                .map_err(|e| map_error("ping database", &e))?;
            Ok(())
        })
    }
}

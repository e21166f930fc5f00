//! Conditional writes and lookups on the `emergencies` table.
//!
//! Every write is a single statement whose predicate makes it idempotent:
//! creation relies on the primary key (`ON CONFLICT DO NOTHING`), and a
//! status transition only matches rows still in the expected status. Two
//! concurrent writers for the same emergency therefore serialize inside
//! `PostgreSQL`, and at most one of them observes an affected row.

use chrono::{DateTime, Utc};
use emergency_types::{EmergencyId, EmergencyRecord, EmergencyStatus};
use sqlx::PgPool;

use crate::error::DbError;

/// Operations on the `emergencies` table.
pub struct EmergencyStore<'a> {
    pool: &'a PgPool,
}

impl<'a> EmergencyStore<'a> {
    /// Create a new emergency store bound to a connection pool.
    pub const fn new(pool: &'a PgPool) -> Self {
        Self { pool }
    }

    /// Insert `record` unless a row with the same identifier exists.
    ///
    /// Returns `true` if this call inserted the row.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Postgres`] if the insert fails.
    pub async fn create_if_absent(&self, record: &EmergencyRecord) -> Result<bool, DbError> {
        let result = sqlx::query(
            r"INSERT INTO emergencies (emergency_id, name, latitude, longitude, magnitude, status)
              VALUES ($1, $2, $3, $4, $5, $6::emergency_status)
              ON CONFLICT (emergency_id) DO NOTHING",
        )
        .bind(record.emergency_id.as_str())
        .bind(&record.name)
        .bind(record.latitude)
        .bind(record.longitude)
        .bind(record.magnitude)
        .bind(record.status.as_db())
        .execute(self.pool)
        .await?;

        let inserted = result.rows_affected() == 1;
        tracing::debug!(
            emergency_id = %record.emergency_id,
            inserted,
            "create_if_absent"
        );
        Ok(inserted)
    }

    /// Move the row for `id` from `from` to `to` if it is currently `from`.
    ///
    /// Returns the number of rows modified: 0 or 1.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Postgres`] if the update fails.
    pub async fn transition_if_match(
        &self,
        id: &EmergencyId,
        from: EmergencyStatus,
        to: EmergencyStatus,
    ) -> Result<u64, DbError> {
        let result = sqlx::query(
            r"UPDATE emergencies
              SET status = $3::emergency_status, updated_at = now()
              WHERE emergency_id = $1 AND status = $2::emergency_status",
        )
        .bind(id.as_str())
        .bind(from.as_db())
        .bind(to.as_db())
        .execute(self.pool)
        .await?;

        tracing::debug!(
            emergency_id = %id,
            from = from.as_db(),
            to = to.as_db(),
            modified = result.rows_affected(),
            "transition_if_match"
        );
        Ok(result.rows_affected())
    }

    /// Fetch the row for `id`, if any.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Postgres`] if the query fails, or
    /// [`DbError::Decode`] if the stored status is unknown.
    pub async fn find(&self, id: &EmergencyId) -> Result<Option<EmergencyRecord>, DbError> {
        let row = sqlx::query_as::<_, EmergencyRow>(
            r"SELECT emergency_id, name, latitude, longitude, magnitude,
                     status::TEXT AS status, created_at, updated_at
              FROM emergencies
              WHERE emergency_id = $1",
        )
        .bind(id.as_str())
        .fetch_optional(self.pool)
        .await?;

        row.map(EmergencyRow::into_record).transpose()
    }

    /// Count rows currently in `status`.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Postgres`] if the query fails.
    pub async fn count_by_status(&self, status: EmergencyStatus) -> Result<i64, DbError> {
        let count: i64 = sqlx::query_scalar(
            r"SELECT COUNT(*) FROM emergencies WHERE status = $1::emergency_status",
        )
        .bind(status.as_db())
        .fetch_one(self.pool)
        .await?;
        Ok(count)
    }
}

/// A row from the `emergencies` table.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct EmergencyRow {
    /// Primary key.
    pub emergency_id: String,
    /// Display name captured at creation.
    pub name: String,
    /// Latitude captured at creation.
    pub latitude: Option<f64>,
    /// Longitude captured at creation.
    pub longitude: Option<f64>,
    /// Magnitude captured at creation.
    pub magnitude: Option<f64>,
    /// Status as a string (cast from the `PostgreSQL` enum).
    pub status: String,
    /// When the row was inserted.
    pub created_at: DateTime<Utc>,
    /// When the row was last transitioned.
    pub updated_at: DateTime<Utc>,
}

impl EmergencyRow {
    /// Convert the row into its domain record.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Decode`] if `status` is not a known enum label.
    pub fn into_record(self) -> Result<EmergencyRecord, DbError> {
        let status = EmergencyStatus::from_db(&self.status).ok_or_else(|| {
            DbError::Decode(format!(
                "unknown emergency status `{}` for {}",
                self.status, self.emergency_id
            ))
        })?;
        Ok(EmergencyRecord {
            emergency_id: EmergencyId::new(self.emergency_id),
            name: self.name,
            latitude: self.latitude,
            longitude: self.longitude,
            magnitude: self.magnitude,
            status,
        })
    }
}

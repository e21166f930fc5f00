//! Append-only storage for dead-lettered messages.

use chrono::{DateTime, Utc};
use emergency_types::{DeadLetter, DeadLetterId, DeadLetterKind};
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::DbError;

/// Operations on the `dead_letters` table.
pub struct DeadLetterStore<'a> {
    pool: &'a PgPool,
}

impl<'a> DeadLetterStore<'a> {
    /// Create a new dead-letter store bound to a connection pool.
    pub const fn new(pool: &'a PgPool) -> Self {
        Self { pool }
    }

    /// Persist one dead letter.
    ///
    /// Repeating the insert of one [`DeadLetter`] value is a no-op. A
    /// redelivered message is dead-lettered under a new id, so it yields a
    /// second row.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Postgres`] if the insert fails.
    pub async fn insert(&self, letter: &DeadLetter) -> Result<(), DbError> {
        sqlx::query(
            r"INSERT INTO dead_letters (id, payload, kind, reason, attempts, received_at)
              VALUES ($1, $2, $3, $4, $5, $6)
              ON CONFLICT (id) DO NOTHING",
        )
        .bind(letter.id.into_inner())
        .bind(letter.payload.as_slice())
        .bind(letter.kind.as_str())
        .bind(&letter.reason)
        .bind(i32::try_from(letter.attempts).unwrap_or(i32::MAX))
        .bind(letter.received_at)
        .execute(self.pool)
        .await?;

        tracing::debug!(id = %letter.id, kind = letter.kind.as_str(), "Inserted dead letter");
        Ok(())
    }

    /// The most recent dead letters, newest first.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Postgres`] if the query fails, or
    /// [`DbError::Decode`] if a stored row is malformed.
    pub async fn recent(&self, limit: u32) -> Result<Vec<DeadLetter>, DbError> {
        let rows = sqlx::query_as::<_, DeadLetterRow>(
            r"SELECT id, payload, kind, reason, attempts, received_at
              FROM dead_letters
              ORDER BY received_at DESC
              LIMIT $1",
        )
        .bind(i64::from(limit))
        .fetch_all(self.pool)
        .await?;

        rows.into_iter().map(DeadLetterRow::into_dead_letter).collect()
    }
}

/// A row from the `dead_letters` table.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct DeadLetterRow {
    /// Dead letter ID.
    pub id: Uuid,
    /// Original payload bytes.
    pub payload: Vec<u8>,
    /// Failure category label.
    pub kind: String,
    /// Failure reason.
    pub reason: String,
    /// Delivery attempt on which the message was dead-lettered.
    pub attempts: i32,
    /// When the dead letter was recorded.
    pub received_at: DateTime<Utc>,
}

impl DeadLetterRow {
    /// Convert the row into its domain type.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Decode`] for an unknown `kind` or negative
    /// `attempts`.
    pub fn into_dead_letter(self) -> Result<DeadLetter, DbError> {
        let kind = DeadLetterKind::from_db(&self.kind)
            .ok_or_else(|| DbError::Decode(format!("unknown dead letter kind `{}`", self.kind)))?;
        let attempts = u32::try_from(self.attempts)
            .map_err(|e| DbError::Decode(format!("invalid attempts {}: {e}", self.attempts)))?;
        Ok(DeadLetter {
            id: DeadLetterId::from(self.id),
            payload: self.payload,
            kind,
            reason: self.reason,
            attempts,
            received_at: self.received_at,
        })
    }
}

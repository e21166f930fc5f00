//! `PostgreSQL` implementations of the core store traits.
//!
//! Thin adapters: each call borrows a store from the shared pool and maps
//! [`DbError`] onto the core's retryable [`StoreError`].

use async_trait::async_trait;
use emergency_core::{DeadLetterSink, PersistenceGateway, StoreError};
use emergency_db::{DbError, PostgresPool};
use emergency_types::{DeadLetter, EmergencyId, EmergencyRecord, EmergencyStatus};

/// Record store backed by the `emergencies` table.
#[derive(Debug, Clone)]
pub struct PgGateway {
    pool: PostgresPool,
}

impl PgGateway {
    /// Create a gateway over `pool`.
    pub const fn new(pool: PostgresPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PersistenceGateway for PgGateway {
    async fn create_if_absent(&self, record: &EmergencyRecord) -> Result<bool, StoreError> {
        self.pool
            .emergencies()
            .create_if_absent(record)
            .await
            .map_err(store_error)
    }

    async fn transition_if_match(
        &self,
        id: &EmergencyId,
        from: EmergencyStatus,
        to: EmergencyStatus,
    ) -> Result<u64, StoreError> {
        self.pool
            .emergencies()
            .transition_if_match(id, from, to)
            .await
            .map_err(store_error)
    }

    async fn find(&self, id: &EmergencyId) -> Result<Option<EmergencyRecord>, StoreError> {
        self.pool.emergencies().find(id).await.map_err(store_error)
    }
}

/// Dead-letter sink backed by the `dead_letters` table.
#[derive(Debug, Clone)]
pub struct PgDeadLetterSink {
    pool: PostgresPool,
}

impl PgDeadLetterSink {
    /// Create a sink over `pool`.
    pub const fn new(pool: PostgresPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl DeadLetterSink for PgDeadLetterSink {
    async fn record(&self, letter: &DeadLetter) -> Result<(), StoreError> {
        self.pool
            .dead_letters()
            .insert(letter)
            .await
            .map_err(store_error)
    }
}

// All data-layer failures are retryable; the attempt budget bounds them.
#[allow(clippy::needless_pass_by_value)]
fn store_error(err: DbError) -> StoreError {
    StoreError::unavailable(err)
}

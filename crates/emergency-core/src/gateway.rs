//! Store abstractions used by the reconciler and the consumer loop.
//!
//! The [`PersistenceGateway`] trait is where atomicity lives. The core holds
//! no locks of its own: correctness under concurrent or redelivered messages
//! relies on [`create_if_absent`] and [`transition_if_match`] being single
//! conditional operations at the store level, never a read followed by a
//! write.
//!
//! [`DeadLetterSink`] is the quarantine for messages that can never succeed,
//! and [`StatusNotifier`] is an optional, fire-and-forget change feed.
//!
//! [`create_if_absent`]: PersistenceGateway::create_if_absent
//! [`transition_if_match`]: PersistenceGateway::transition_if_match

use async_trait::async_trait;
use emergency_types::{DeadLetter, EmergencyId, EmergencyRecord, EmergencyStatus, StatusChange};

use crate::error::StoreError;

/// Conditional operations on the emergency record store.
///
/// Every operation is keyed by [`EmergencyId`]. Implementations must make
/// the two write operations atomic with respect to each other and to
/// themselves across processes.
#[async_trait]
pub trait PersistenceGateway: Send + Sync {
    /// Insert `record` only if no record with its identifier exists.
    ///
    /// Returns `true` if the record was inserted, `false` if one already
    /// existed (an idempotent no-op, not an error).
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the store cannot be reached.
    async fn create_if_absent(&self, record: &EmergencyRecord) -> Result<bool, StoreError>;

    /// Set the status of `id` to `to`, only if it is currently `from`.
    ///
    /// Returns the number of records modified, `0` or `1`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the store cannot be reached.
    async fn transition_if_match(
        &self,
        id: &EmergencyId,
        from: EmergencyStatus,
        to: EmergencyStatus,
    ) -> Result<u64, StoreError>;

    /// Fetch the current record for `id`, if any.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the store cannot be reached.
    async fn find(&self, id: &EmergencyId) -> Result<Option<EmergencyRecord>, StoreError>;
}

/// Durable destination for messages that cannot be processed.
#[async_trait]
pub trait DeadLetterSink: Send + Sync {
    /// Persist a dead letter, preserving its original payload.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the sink cannot be written. The caller must
    /// not acknowledge the message in that case.
    async fn record(&self, letter: &DeadLetter) -> Result<(), StoreError>;
}

/// Receives a notification after every applied state change.
///
/// Notification is fire-and-forget: implementations must not block and
/// must swallow (after logging) their own failures, since acknowledgment
/// never depends on the change feed.
///
/// The feed is at most once. A change is announced only by the call that
/// applied it, so a write that committed after its store call timed out is
/// never announced: the redelivery finds the record already in place.
pub trait StatusNotifier: Send + Sync {
    /// Publish a status change.
    fn notify(&self, change: &StatusChange);
}

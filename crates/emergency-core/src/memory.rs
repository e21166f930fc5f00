//! In-process implementations of the store and queue traits.
//!
//! A single async mutex guards each collection, which gives the conditional
//! operations the same atomicity a real store provides. Used by tests and by
//! local runs without `PostgreSQL` or NATS.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use async_trait::async_trait;
use emergency_types::{DeadLetter, EmergencyId, EmergencyRecord, EmergencyStatus, StatusChange};
use tokio::sync::Mutex;

use crate::consumer::Delivery;
use crate::error::{QueueError, StoreError};
use crate::gateway::{DeadLetterSink, PersistenceGateway, StatusNotifier};

/// Record store held in memory, keyed by [`EmergencyId`].
#[derive(Debug, Default)]
pub struct InMemoryGateway {
    records: Mutex<BTreeMap<EmergencyId, EmergencyRecord>>,
}

impl InMemoryGateway {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of records currently stored.
    pub async fn len(&self) -> usize {
        self.records.lock().await.len()
    }

    /// Whether the store holds no records.
    pub async fn is_empty(&self) -> bool {
        self.records.lock().await.is_empty()
    }

    /// Copy of every stored record, ordered by identifier.
    pub async fn records(&self) -> Vec<EmergencyRecord> {
        self.records.lock().await.values().cloned().collect()
    }
}

#[async_trait]
impl PersistenceGateway for InMemoryGateway {
    async fn create_if_absent(&self, record: &EmergencyRecord) -> Result<bool, StoreError> {
        let mut records = self.records.lock().await;
        if records.contains_key(&record.emergency_id) {
            return Ok(false);
        }
        records.insert(record.emergency_id.clone(), record.clone());
        Ok(true)
    }

    async fn transition_if_match(
        &self,
        id: &EmergencyId,
        from: EmergencyStatus,
        to: EmergencyStatus,
    ) -> Result<u64, StoreError> {
        let mut records = self.records.lock().await;
        match records.get_mut(id) {
            Some(record) if record.status == from => {
                record.status = to;
                Ok(1)
            }
            _ => Ok(0),
        }
    }

    async fn find(&self, id: &EmergencyId) -> Result<Option<EmergencyRecord>, StoreError> {
        Ok(self.records.lock().await.get(id).cloned())
    }
}

/// Dead-letter sink held in memory.
#[derive(Debug, Default)]
pub struct InMemoryDeadLetters {
    letters: Mutex<Vec<DeadLetter>>,
}

impl InMemoryDeadLetters {
    /// Create an empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of every recorded dead letter, oldest first.
    pub async fn letters(&self) -> Vec<DeadLetter> {
        self.letters.lock().await.clone()
    }
}

#[async_trait]
impl DeadLetterSink for InMemoryDeadLetters {
    async fn record(&self, letter: &DeadLetter) -> Result<(), StoreError> {
        self.letters.lock().await.push(letter.clone());
        Ok(())
    }
}

/// Notifier that keeps every change it receives.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    changes: StdMutex<Vec<StatusChange>>,
}

impl RecordingNotifier {
    /// Create an empty notifier.
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of every change received so far. Empty if the lock is poisoned.
    pub fn changes(&self) -> Vec<StatusChange> {
        self.changes
            .lock()
            .map(|changes| changes.clone())
            .unwrap_or_default()
    }
}

impl StatusNotifier for RecordingNotifier {
    fn notify(&self, change: &StatusChange) {
        if let Ok(mut changes) = self.changes.lock() {
            changes.push(change.clone());
        }
    }
}

/// How a [`MemoryDelivery`] was settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Settlement {
    /// Acknowledged.
    Acked,
    /// Requeued with the given delay.
    Requeued(Duration),
}

/// A queue delivery held in memory.
///
/// Clones share settlement state, so a test can keep a probe while the
/// original moves into the consumer.
#[derive(Debug, Clone)]
pub struct MemoryDelivery {
    payload: Arc<[u8]>,
    attempt: u32,
    settlement: Arc<StdMutex<Option<Settlement>>>,
}

impl MemoryDelivery {
    /// Create an unsettled delivery of `payload` on delivery `attempt`.
    pub fn new(payload: &[u8], attempt: u32) -> Self {
        Self {
            payload: Arc::from(payload),
            attempt,
            settlement: Arc::new(StdMutex::new(None)),
        }
    }

    /// How the delivery was settled, if it was.
    pub fn settlement(&self) -> Option<Settlement> {
        self.settlement.lock().ok().and_then(|settled| *settled)
    }

    fn settle(&self, settlement: Settlement) -> Result<(), String> {
        let mut settled = self
            .settlement
            .lock()
            .map_err(|e| format!("settlement lock poisoned: {e}"))?;
        if let Some(previous) = *settled {
            return Err(format!("delivery already settled as {previous:?}"));
        }
        *settled = Some(settlement);
        Ok(())
    }
}

#[async_trait]
impl Delivery for MemoryDelivery {
    fn payload(&self) -> &[u8] {
        &self.payload
    }

    fn attempt(&self) -> u32 {
        self.attempt
    }

    async fn ack(&self) -> Result<(), QueueError> {
        self.settle(Settlement::Acked).map_err(QueueError::Ack)
    }

    async fn requeue(&self, delay: Duration) -> Result<(), QueueError> {
        self.settle(Settlement::Requeued(delay))
            .map_err(QueueError::Requeue)
    }
}

//! End-to-end lifecycle tests for the reconciliation core.
//!
//! Drives raw payloads through [`EventConsumer::handle`] against the
//! in-memory store, covering redelivery, reordering, concurrent delivery,
//! and store timeouts.

#![allow(
    clippy::expect_used,
    clippy::unwrap_used,
    clippy::missing_panics_doc,
    clippy::float_cmp,
    clippy::arithmetic_side_effects
)]

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use emergency_core::{
    ConsumerConfig, DeadLetterSink, Disposition, EventConsumer, InMemoryDeadLetters,
    InMemoryGateway, MemoryDelivery, PersistenceGateway, ReconcileOutcome, Reconciler,
    RecordingNotifier, RetryPolicy, Settlement, StoreError,
};
use emergency_types::{DeadLetterKind, EmergencyId, EmergencyRecord, EmergencyStatus};

const E1_CREATED: &[u8] = br#"{"emergencyId":"E1","name":"Fire-Alpha","status":"InProgress","latitude":1.0,"longitude":2.0,"magnitude":5}"#;
const E1_RESOLVED: &[u8] = br#"{"emergencyId":"E1","name":"Fire-Alpha","status":"Extinguished"}"#;
const E2_RESOLVED: &[u8] = br#"{"emergencyId":"E2","status":"Extinguished"}"#;

const STORE_TIMEOUT: Duration = Duration::from_millis(100);

fn config() -> ConsumerConfig {
    ConsumerConfig {
        retry: RetryPolicy::default()
            .with_max_attempts(5)
            .with_delays(Duration::from_millis(10), Duration::from_millis(80))
            .with_jitter(false),
        max_in_flight: 16,
        receive_timeout: Duration::from_millis(50),
        store_timeout: STORE_TIMEOUT,
    }
}

struct Harness {
    consumer: EventConsumer,
    dead_letters: Arc<InMemoryDeadLetters>,
    notifier: Arc<RecordingNotifier>,
}

fn harness(gateway: Arc<dyn PersistenceGateway>) -> Harness {
    let dead_letters = Arc::new(InMemoryDeadLetters::new());
    let notifier = Arc::new(RecordingNotifier::new());
    let reconciler = Reconciler::new(gateway, STORE_TIMEOUT).with_notifier(notifier.clone());
    let sink: Arc<dyn DeadLetterSink> = dead_letters.clone();
    Harness {
        consumer: EventConsumer::new(reconciler, sink, config()),
        dead_letters,
        notifier,
    }
}

async fn deliver(consumer: &EventConsumer, payload: &[u8], attempt: u32) -> (Disposition, Option<Settlement>) {
    let delivery = MemoryDelivery::new(payload, attempt);
    let disposition = consumer.handle(&delivery).await;
    (disposition, delivery.settlement())
}

#[tokio::test]
async fn fire_alpha_scenario() {
    let gateway = Arc::new(InMemoryGateway::new());
    let h = harness(gateway.clone());

    // Creation.
    let (disposition, settled) = deliver(&h.consumer, E1_CREATED, 1).await;
    assert_eq!(disposition, Disposition::Acknowledged(ReconcileOutcome::Created));
    assert_eq!(settled, Some(Settlement::Acked));
    let created = gateway.records().await;
    assert_eq!(created.len(), 1);
    let e1 = created.first().expect("E1 stored");
    assert_eq!(e1.emergency_id.as_str(), "E1");
    assert_eq!(e1.status, EmergencyStatus::InProgress);
    assert_eq!(e1.magnitude, Some(5.0));

    // Identical redelivery leaves the record untouched.
    let (disposition, settled) = deliver(&h.consumer, E1_CREATED, 2).await;
    assert!(matches!(
        disposition,
        Disposition::Acknowledged(ReconcileOutcome::AlreadyRecorded { .. })
    ));
    assert_eq!(settled, Some(Settlement::Acked));
    assert_eq!(gateway.records().await, created);

    // Resolution.
    let (disposition, _) = deliver(&h.consumer, E1_RESOLVED, 1).await;
    assert_eq!(disposition, Disposition::Acknowledged(ReconcileOutcome::Extinguished));
    let resolved = gateway.find(&EmergencyId::from("E1")).await.unwrap().unwrap();
    assert_eq!(resolved.status, EmergencyStatus::Extinguished);

    // Resolution of an emergency never seen: warning, ack, no record.
    let (disposition, settled) = deliver(&h.consumer, E2_RESOLVED, 1).await;
    assert!(matches!(
        disposition,
        Disposition::Acknowledged(ReconcileOutcome::Warning(_))
    ));
    assert_eq!(settled, Some(Settlement::Acked));
    assert!(gateway.find(&EmergencyId::from("E2")).await.unwrap().is_none());
    assert_eq!(gateway.len().await, 1);
    assert!(h.dead_letters.letters().await.is_empty());
    assert_eq!(h.notifier.changes().len(), 2);
}

#[tokio::test]
async fn creation_without_name_is_dead_lettered() {
    let gateway = Arc::new(InMemoryGateway::new());
    let h = harness(gateway.clone());

    let (disposition, settled) =
        deliver(&h.consumer, br#"{"emergencyId":"E3","status":"InProgress"}"#, 1).await;

    assert_eq!(disposition, Disposition::DeadLettered(DeadLetterKind::Validation));
    assert_eq!(settled, Some(Settlement::Acked));
    assert!(gateway.is_empty().await);
    let letters = h.dead_letters.letters().await;
    assert!(letters.first().is_some_and(|l| l.reason.contains("name")));
}

#[tokio::test]
async fn redelivered_resolution_is_a_noop() {
    let gateway = Arc::new(InMemoryGateway::new());
    let h = harness(gateway.clone());
    deliver(&h.consumer, E1_CREATED, 1).await;
    deliver(&h.consumer, E1_RESOLVED, 1).await;

    for attempt in 1..=3 {
        let (disposition, settled) = deliver(&h.consumer, E1_RESOLVED, attempt).await;
        assert_eq!(
            disposition,
            Disposition::Acknowledged(ReconcileOutcome::AlreadyExtinguished)
        );
        assert_eq!(settled, Some(Settlement::Acked));
    }
    let stored = gateway.find(&EmergencyId::from("E1")).await.unwrap().unwrap();
    assert_eq!(stored.status, EmergencyStatus::Extinguished);
}

#[tokio::test]
async fn concurrent_duplicate_creations_store_one_record() {
    let gateway = Arc::new(InMemoryGateway::new());
    let h = harness(gateway.clone());

    let mut handles = Vec::new();
    for _ in 0..32 {
        let consumer = h.consumer.clone();
        handles.push(tokio::spawn(async move {
            deliver(&consumer, E1_CREATED, 1).await
        }));
    }

    let mut created = 0;
    for handle in handles {
        let (disposition, settled) = handle.await.unwrap();
        assert_eq!(settled, Some(Settlement::Acked));
        if disposition == Disposition::Acknowledged(ReconcileOutcome::Created) {
            created += 1;
        }
    }

    assert_eq!(created, 1);
    assert_eq!(gateway.len().await, 1);
    assert_eq!(h.notifier.changes().len(), 1);
}

#[tokio::test]
async fn malformed_payload_never_mutates() {
    let gateway = Arc::new(InMemoryGateway::new());
    let h = harness(gateway.clone());

    let payloads: [&[u8]; 4] = [b"{", b"null", b"\"InProgress\"", b"\xc3\x28"];
    for payload in payloads {
        let (disposition, settled) = deliver(&h.consumer, payload, 1).await;
        assert_eq!(
            disposition,
            Disposition::DeadLettered(DeadLetterKind::MalformedPayload)
        );
        assert_eq!(settled, Some(Settlement::Acked));
    }

    assert!(gateway.is_empty().await);
    assert_eq!(h.dead_letters.letters().await.len(), 4);
}

/// Wraps the in-memory store, stalling the first `stalls` writes past the
/// store timeout. A stalled create still lands, like a commit whose reply
/// was lost.
struct FlakyGateway {
    inner: InMemoryGateway,
    stalls: AtomicU32,
}

impl FlakyGateway {
    fn new(stalls: u32) -> Self {
        Self {
            inner: InMemoryGateway::new(),
            stalls: AtomicU32::new(stalls),
        }
    }

    async fn maybe_stall(&self) {
        let remaining = self
            .stalls
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if remaining.is_ok() {
            tokio::time::sleep(STORE_TIMEOUT * 10).await;
        }
    }
}

#[async_trait]
impl PersistenceGateway for FlakyGateway {
    async fn create_if_absent(&self, record: &EmergencyRecord) -> Result<bool, StoreError> {
        let inserted = self.inner.create_if_absent(record).await?;
        self.maybe_stall().await;
        Ok(inserted)
    }

    async fn transition_if_match(
        &self,
        id: &EmergencyId,
        from: EmergencyStatus,
        to: EmergencyStatus,
    ) -> Result<u64, StoreError> {
        self.maybe_stall().await;
        self.inner.transition_if_match(id, from, to).await
    }

    async fn find(&self, id: &EmergencyId) -> Result<Option<EmergencyRecord>, StoreError> {
        self.inner.find(id).await
    }
}

#[tokio::test(start_paused = true)]
async fn store_timeout_requeues_without_duplicating() {
    let gateway = Arc::new(FlakyGateway::new(2));
    let h = harness(gateway.clone());

    let (first, settled) = deliver(&h.consumer, E1_CREATED, 1).await;
    assert_eq!(first, Disposition::Requeued(Duration::from_millis(10)));
    assert_eq!(settled, Some(Settlement::Requeued(Duration::from_millis(10))));

    let (second, _) = deliver(&h.consumer, E1_CREATED, 2).await;
    assert_eq!(second, Disposition::Requeued(Duration::from_millis(20)));

    let (third, settled) = deliver(&h.consumer, E1_CREATED, 3).await;
    assert!(matches!(
        third,
        Disposition::Acknowledged(ReconcileOutcome::AlreadyRecorded { .. })
    ));
    assert_eq!(settled, Some(Settlement::Acked));

    assert_eq!(gateway.inner.len().await, 1);
    assert!(h.dead_letters.letters().await.is_empty());
}

#[tokio::test(start_paused = true)]
async fn persistent_timeouts_end_in_dead_letter() {
    let gateway = Arc::new(FlakyGateway::new(u32::MAX));
    let h = harness(gateway.clone());
    deliver(&h.consumer, E1_CREATED, 1).await;

    let mut last = None;
    for attempt in 1..=5 {
        last = Some(deliver(&h.consumer, E1_RESOLVED, attempt).await);
    }

    let (disposition, settled) = last.unwrap();
    assert_eq!(
        disposition,
        Disposition::DeadLettered(DeadLetterKind::RetriesExhausted)
    );
    assert_eq!(settled, Some(Settlement::Acked));
    let letters = h.dead_letters.letters().await;
    assert_eq!(letters.len(), 1);
    assert_eq!(letters.first().map(|l| l.payload.as_slice()), Some(E1_RESOLVED));
    assert!(letters.first().is_some_and(|l| l.reason.contains("timeout")));
}

//! The event consumer loop: queue deliveries in, acknowledgments out.
//!
//! Each delivery is validated, reconciled, and only then settled:
//!
//! ```text
//! delivery --> validate --(bad)--> dead-letter --> ack
//!                 |
//!                 +--> reconcile --(ok / warning)--> ack
//!                          |
//!                          +--(store error)--> requeue with backoff
//!                                              (dead-letter + ack once the
//!                                               attempt budget is spent)
//! ```
//!
//! A message is never acknowledged before its outcome is durable. If the
//! dead-letter write itself fails the message is requeued instead.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use emergency_types::{DeadLetter, DeadLetterKind};
use futures::{Stream, StreamExt as _};
use tokio::sync::{Semaphore, watch};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::error::{IntakeError, QueueError, StoreError};
use crate::gateway::DeadLetterSink;
use crate::reconciler::{ReconcileOutcome, Reconciler};
use crate::retry::{RetryDecision, RetryPolicy};
use crate::validate::validate_event;

/// Default number of messages handled concurrently per loop.
const DEFAULT_MAX_IN_FLIGHT: usize = 8;

/// Default wait for the next delivery before re-checking for shutdown.
const DEFAULT_RECEIVE_TIMEOUT_MS: u64 = 1_000;

/// Default deadline for a single store or sink call.
const DEFAULT_STORE_TIMEOUT_MS: u64 = 5_000;

/// One message handed out by the queue, settled exactly once.
#[async_trait]
pub trait Delivery: Send + Sync + 'static {
    /// The raw message body.
    fn payload(&self) -> &[u8];

    /// 1-based delivery count for this message.
    fn attempt(&self) -> u32;

    /// Acknowledge: the queue must not deliver this message again.
    async fn ack(&self) -> Result<(), QueueError>;

    /// Negatively acknowledge: redeliver after `delay`.
    async fn requeue(&self, delay: Duration) -> Result<(), QueueError>;
}

/// How a delivery was settled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disposition {
    /// Processed (possibly as a no-op or warning) and acknowledged.
    Acknowledged(ReconcileOutcome),
    /// Quarantined in the dead-letter sink and acknowledged.
    DeadLettered(DeadLetterKind),
    /// Handed back to the queue for redelivery.
    Requeued(Duration),
}

/// Tuning for [`EventConsumer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConsumerConfig {
    /// Backoff schedule for retryable failures.
    pub retry: RetryPolicy,
    /// Maximum deliveries handled concurrently.
    pub max_in_flight: usize,
    /// How long to wait for a delivery before re-checking for shutdown.
    pub receive_timeout: Duration,
    /// Deadline for each dead-letter write.
    pub store_timeout: Duration,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            max_in_flight: DEFAULT_MAX_IN_FLIGHT,
            receive_timeout: Duration::from_millis(DEFAULT_RECEIVE_TIMEOUT_MS),
            store_timeout: Duration::from_millis(DEFAULT_STORE_TIMEOUT_MS),
        }
    }
}

/// Counters reported when the loop exits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConsumerStats {
    /// Deliveries acknowledged after reconciliation.
    pub acknowledged: u64,
    /// Deliveries quarantined.
    pub dead_lettered: u64,
    /// Deliveries handed back for redelivery.
    pub requeued: u64,
    /// Receive failures reported by the queue.
    pub receive_errors: u64,
    /// Handler tasks that did not complete.
    pub aborted: u64,
}

impl ConsumerStats {
    fn record(&mut self, disposition: &Disposition) {
        let counter = match disposition {
            Disposition::Acknowledged(_) => &mut self.acknowledged,
            Disposition::DeadLettered(_) => &mut self.dead_lettered,
            Disposition::Requeued(_) => &mut self.requeued,
        };
        *counter = counter.saturating_add(1);
    }
}

/// Bridges queue deliveries to the validator and reconciler.
///
/// Cheap to clone; one clone moves into each handler task.
#[derive(Clone)]
pub struct EventConsumer {
    reconciler: Reconciler,
    dead_letters: Arc<dyn DeadLetterSink>,
    config: ConsumerConfig,
}

impl EventConsumer {
    /// Assemble a consumer from its collaborators.
    pub fn new(
        reconciler: Reconciler,
        dead_letters: Arc<dyn DeadLetterSink>,
        config: ConsumerConfig,
    ) -> Self {
        Self {
            reconciler,
            dead_letters,
            config,
        }
    }

    /// Pull deliveries until the stream ends or `shutdown` turns `true`.
    ///
    /// Shutdown stops intake immediately but lets every in-flight handler
    /// finish its acknowledge/requeue cycle before returning. Dropping the
    /// shutdown sender also counts as a shutdown request.
    pub async fn run<S, D>(&self, deliveries: S, mut shutdown: watch::Receiver<bool>) -> ConsumerStats
    where
        S: Stream<Item = Result<D, QueueError>>,
        D: Delivery,
    {
        let mut deliveries = std::pin::pin!(deliveries);
        let permits = Arc::new(Semaphore::new(self.config.max_in_flight.max(1)));
        let mut in_flight: JoinSet<Disposition> = JoinSet::new();
        let mut stats = ConsumerStats::default();

        info!(
            max_in_flight = self.config.max_in_flight,
            max_attempts = self.config.retry.max_attempts,
            "event consumer started"
        );

        loop {
            while let Some(joined) = in_flight.try_join_next() {
                settle_task(&mut stats, joined);
            }

            let permit = tokio::select! {
                biased;
                () = shutdown_requested(&mut shutdown) => break,
                permit = Arc::clone(&permits).acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_closed) => break,
                },
            };

            let next = tokio::select! {
                biased;
                () = shutdown_requested(&mut shutdown) => break,
                next = tokio::time::timeout(self.config.receive_timeout, deliveries.next()) => next,
            };

            match next {
                Err(_idle) => {}
                Ok(None) => {
                    info!("delivery stream ended");
                    break;
                }
                Ok(Some(Err(e))) => {
                    warn!(error = %e, "failed to receive delivery");
                    stats.receive_errors = stats.receive_errors.saturating_add(1);
                }
                Ok(Some(Ok(delivery))) => {
                    let consumer = self.clone();
                    in_flight.spawn(async move {
                        let _permit = permit;
                        consumer.handle(&delivery).await
                    });
                }
            }
        }

        info!(in_flight = in_flight.len(), "event consumer draining");
        while let Some(joined) = in_flight.join_next().await {
            settle_task(&mut stats, joined);
        }

        info!(
            acknowledged = stats.acknowledged,
            dead_lettered = stats.dead_lettered,
            requeued = stats.requeued,
            receive_errors = stats.receive_errors,
            aborted = stats.aborted,
            "event consumer stopped"
        );
        stats
    }

    /// Process and settle a single delivery.
    pub async fn handle<D: Delivery + ?Sized>(&self, delivery: &D) -> Disposition {
        let attempt = delivery.attempt().max(1);
        let payload = delivery.payload();

        let event = match validate_event(payload) {
            Ok(event) => event,
            Err(e) => {
                let kind = match e {
                    IntakeError::MalformedPayload { .. } => DeadLetterKind::MalformedPayload,
                    IntakeError::Validation(_) => DeadLetterKind::Validation,
                };
                return self.dead_letter(delivery, kind, &e.to_string(), attempt).await;
            }
        };

        match self.reconciler.apply(&event).await {
            Ok(outcome) => {
                acknowledge(delivery).await;
                Disposition::Acknowledged(outcome)
            }
            Err(e) => match self.config.retry.decide(attempt) {
                RetryDecision::Requeue(delay) => {
                    warn!(
                        emergency_id = %event.emergency_id,
                        attempt,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        error = %e,
                        "store failure, requeueing"
                    );
                    requeue(delivery, delay).await;
                    Disposition::Requeued(delay)
                }
                RetryDecision::GiveUp => {
                    let reason = format!("gave up after {attempt} attempts: {e}");
                    self.dead_letter(delivery, DeadLetterKind::RetriesExhausted, &reason, attempt)
                        .await
                }
            },
        }
    }

    /// Quarantine the payload, then acknowledge. Requeue if the sink fails.
    async fn dead_letter<D: Delivery + ?Sized>(
        &self,
        delivery: &D,
        kind: DeadLetterKind,
        reason: &str,
        attempt: u32,
    ) -> Disposition {
        let letter = DeadLetter::new(delivery.payload(), kind, reason, attempt);

        let written = tokio::time::timeout(self.config.store_timeout, self.dead_letters.record(&letter))
            .await
            .unwrap_or_else(|_elapsed| {
                Err(StoreError::Timeout {
                    operation: "record_dead_letter",
                    timeout_ms: u64::try_from(self.config.store_timeout.as_millis())
                        .unwrap_or(u64::MAX),
                })
            });

        match written {
            Ok(()) => {
                warn!(
                    dead_letter_id = %letter.id,
                    kind = %kind,
                    attempt,
                    reason,
                    payload = letter.payload_lossy(),
                    "message dead-lettered"
                );
                acknowledge(delivery).await;
                Disposition::DeadLettered(kind)
            }
            Err(e) => {
                let delay = self.config.retry.backoff(attempt);
                error!(
                    kind = %kind,
                    attempt,
                    reason,
                    error = %e,
                    "dead-letter write failed, requeueing instead of acknowledging"
                );
                requeue(delivery, delay).await;
                Disposition::Requeued(delay)
            }
        }
    }
}

impl core::fmt::Debug for EventConsumer {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("EventConsumer")
            .field("reconciler", &self.reconciler)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Resolve once `true` is observed or the sender is gone.
async fn shutdown_requested(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stop| *stop).await;
}

fn settle_task(stats: &mut ConsumerStats, joined: Result<Disposition, tokio::task::JoinError>) {
    match joined {
        Ok(disposition) => stats.record(&disposition),
        Err(e) => {
            error!(error = %e, "delivery handler did not complete");
            stats.aborted = stats.aborted.saturating_add(1);
        }
    }
}

// Settlement failures are logged only: an unacknowledged message is
// redelivered by the queue. Record writes are conditional, but a redelivered
// dead letter is stored again under a fresh id.

async fn acknowledge<D: Delivery + ?Sized>(delivery: &D) {
    match delivery.ack().await {
        Ok(()) => debug!(attempt = delivery.attempt(), "delivery acknowledged"),
        Err(e) => warn!(error = %e, "failed to acknowledge delivery"),
    }
}

async fn requeue<D: Delivery + ?Sized>(delivery: &D, delay: Duration) {
    if let Err(e) = delivery.requeue(delay).await {
        warn!(error = %e, "failed to requeue delivery");
    }
}

//! Lifecycle state machine applied through the persistence gateway.
//!
//! Per emergency the states are `Absent`, `InProgress`, and `Extinguished`:
//!
//! ```text
//! Absent --InProgress--> InProgress --Extinguished--> Extinguished (terminal)
//! ```
//!
//! Redelivered events are no-ops. An `Extinguished` event for an emergency
//! this registry never saw is a [`ReconciliationWarning`], not an error:
//! emergencies may be reported elsewhere before their first sighting here.
//! Only store I/O failures surface as errors, and those are retryable.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use emergency_types::{EmergencyEvent, EmergencyId, EmergencyStatus, StatusChange};
use tracing::{debug, info, warn};

use crate::error::StoreError;
use crate::gateway::{PersistenceGateway, StatusNotifier};

/// A logical anomaly that is logged and acknowledged, never retried.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconciliationWarning {
    /// A resolution arrived for an emergency with no stored record.
    NoMatchingRecord {
        /// The unknown emergency.
        emergency_id: EmergencyId,
    },
}

impl core::fmt::Display for ReconciliationWarning {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::NoMatchingRecord { emergency_id } => write!(
                f,
                "no in-progress record for emergency {emergency_id}"
            ),
        }
    }
}

/// Result of applying one event. Every variant acknowledges the message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// A new `InProgress` record was inserted.
    Created,
    /// A record already existed; nothing changed.
    AlreadyRecorded {
        /// Status of the existing record.
        current: EmergencyStatus,
    },
    /// The record moved from `InProgress` to `Extinguished`.
    Extinguished,
    /// The record was already `Extinguished`; nothing changed.
    AlreadyExtinguished,
    /// Nothing changed and the event did not fit the state machine.
    Warning(ReconciliationWarning),
}

impl ReconcileOutcome {
    /// Short label for structured logs.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::AlreadyRecorded { .. } => "already_recorded",
            Self::Extinguished => "extinguished",
            Self::AlreadyExtinguished => "already_extinguished",
            Self::Warning(_) => "warning",
        }
    }
}

/// Applies validated events to the store.
///
/// Cheap to clone; all collaborators are shared behind [`Arc`].
#[derive(Clone)]
pub struct Reconciler {
    gateway: Arc<dyn PersistenceGateway>,
    notifier: Option<Arc<dyn StatusNotifier>>,
    store_timeout: Duration,
}

impl Reconciler {
    /// Create a reconciler over `gateway`, bounding every store call by
    /// `store_timeout`.
    pub fn new(gateway: Arc<dyn PersistenceGateway>, store_timeout: Duration) -> Self {
        Self {
            gateway,
            notifier: None,
            store_timeout,
        }
    }

    /// Attach a change feed notified after every mutation.
    #[must_use]
    pub fn with_notifier(mut self, notifier: Arc<dyn StatusNotifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    /// Apply one event.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the store is unreachable or a call exceeds
    /// the store timeout. Both are retryable; redelivery is safe because
    /// every write is conditional.
    pub async fn apply(&self, event: &EmergencyEvent) -> Result<ReconcileOutcome, StoreError> {
        let outcome = match event.status {
            EmergencyStatus::InProgress => self.open(event).await?,
            EmergencyStatus::Extinguished => self.extinguish(event).await?,
        };

        match &outcome {
            ReconcileOutcome::Created | ReconcileOutcome::Extinguished => {
                info!(
                    emergency_id = %event.emergency_id,
                    name = event.name.as_deref(),
                    outcome = outcome.as_str(),
                    "emergency status applied"
                );
            }
            ReconcileOutcome::AlreadyRecorded { current } => {
                debug!(
                    emergency_id = %event.emergency_id,
                    current = %current,
                    "duplicate creation event, record unchanged"
                );
            }
            ReconcileOutcome::AlreadyExtinguished => {
                debug!(
                    emergency_id = %event.emergency_id,
                    "emergency already extinguished, record unchanged"
                );
            }
            ReconcileOutcome::Warning(warning) => {
                warn!(
                    emergency_id = %event.emergency_id,
                    name = event.name.as_deref(),
                    warning = %warning,
                    "reconciliation warning, acknowledging without change"
                );
            }
        }

        Ok(outcome)
    }

    /// `Absent -> InProgress`.
    async fn open(&self, event: &EmergencyEvent) -> Result<ReconcileOutcome, StoreError> {
        let record = event.to_record();
        let inserted = self
            .bounded("create_if_absent", self.gateway.create_if_absent(&record))
            .await?;

        if inserted {
            self.notify(event, None, EmergencyStatus::InProgress);
            return Ok(ReconcileOutcome::Created);
        }

        let current = self
            .bounded("find", self.gateway.find(&event.emergency_id))
            .await?
            .map_or(EmergencyStatus::InProgress, |existing| existing.status);
        Ok(ReconcileOutcome::AlreadyRecorded { current })
    }

    /// `InProgress -> Extinguished`.
    async fn extinguish(&self, event: &EmergencyEvent) -> Result<ReconcileOutcome, StoreError> {
        if self.compare_and_extinguish(&event.emergency_id).await? {
            self.notify(event, Some(EmergencyStatus::InProgress), EmergencyStatus::Extinguished);
            return Ok(ReconcileOutcome::Extinguished);
        }

        let existing = self
            .bounded("find", self.gateway.find(&event.emergency_id))
            .await?;

        match existing.map(|record| record.status) {
            None => Ok(ReconcileOutcome::Warning(
                ReconciliationWarning::NoMatchingRecord {
                    emergency_id: event.emergency_id.clone(),
                },
            )),
            Some(EmergencyStatus::Extinguished) => Ok(ReconcileOutcome::AlreadyExtinguished),
            // The record was created between the two calls. It can only move
            // forward, so one more compare-and-set settles it.
            Some(EmergencyStatus::InProgress) => {
                if self.compare_and_extinguish(&event.emergency_id).await? {
                    self.notify(
                        event,
                        Some(EmergencyStatus::InProgress),
                        EmergencyStatus::Extinguished,
                    );
                    Ok(ReconcileOutcome::Extinguished)
                } else {
                    Ok(ReconcileOutcome::AlreadyExtinguished)
                }
            }
        }
    }

    async fn compare_and_extinguish(&self, id: &EmergencyId) -> Result<bool, StoreError> {
        let modified = self
            .bounded(
                "transition_if_match",
                self.gateway.transition_if_match(
                    id,
                    EmergencyStatus::InProgress,
                    EmergencyStatus::Extinguished,
                ),
            )
            .await?;
        Ok(modified > 0)
    }

    /// Run a gateway call under the store timeout.
    async fn bounded<T>(
        &self,
        operation: &'static str,
        call: impl Future<Output = Result<T, StoreError>>,
    ) -> Result<T, StoreError> {
        tokio::time::timeout(self.store_timeout, call)
            .await
            .unwrap_or_else(|_elapsed| {
                Err(StoreError::Timeout {
                    operation,
                    timeout_ms: u64::try_from(self.store_timeout.as_millis()).unwrap_or(u64::MAX),
                })
            })
    }

    fn notify(
        &self,
        event: &EmergencyEvent,
        previous: Option<EmergencyStatus>,
        current: EmergencyStatus,
    ) {
        if let Some(notifier) = &self.notifier {
            notifier.notify(&StatusChange {
                emergency_id: event.emergency_id.clone(),
                name: event.name.clone(),
                previous,
                current,
                changed_at: Utc::now(),
            });
        }
    }
}

impl core::fmt::Debug for Reconciler {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Reconciler")
            .field("store_timeout_ms", &self.store_timeout.as_millis())
            .field("notifier", &self.notifier.is_some())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use async_trait::async_trait;
    use emergency_types::EmergencyRecord;

    use super::*;
    use crate::memory::{InMemoryGateway, RecordingNotifier};

    const TIMEOUT: Duration = Duration::from_secs(1);

    fn event(id: &str, status: EmergencyStatus) -> EmergencyEvent {
        EmergencyEvent {
            emergency_id: EmergencyId::from(id),
            name: Some(String::from("Fire-Alpha")),
            status,
            latitude: Some(1.0),
            longitude: Some(2.0),
            magnitude: Some(5.0),
        }
    }

    fn reconciler() -> (Reconciler, Arc<InMemoryGateway>, Arc<RecordingNotifier>) {
        let gateway = Arc::new(InMemoryGateway::new());
        let notifier = Arc::new(RecordingNotifier::new());
        let reconciler =
            Reconciler::new(gateway.clone(), TIMEOUT).with_notifier(notifier.clone());
        (reconciler, gateway, notifier)
    }

    #[tokio::test]
    async fn creation_then_duplicate() {
        let (reconciler, gateway, _) = reconciler();
        let created = event("E1", EmergencyStatus::InProgress);

        assert_eq!(reconciler.apply(&created).await.unwrap(), ReconcileOutcome::Created);
        assert_eq!(
            reconciler.apply(&created).await.unwrap(),
            ReconcileOutcome::AlreadyRecorded {
                current: EmergencyStatus::InProgress
            }
        );
        assert_eq!(gateway.len().await, 1);
    }

    #[tokio::test]
    async fn redelivered_creation_is_not_announced() {
        let (reconciler, gateway, notifier) = reconciler();
        let created = event("E1", EmergencyStatus::InProgress);
        // Committed by an earlier delivery whose reply never arrived.
        gateway.create_if_absent(&created.to_record()).await.unwrap();

        assert_eq!(
            reconciler.apply(&created).await.unwrap(),
            ReconcileOutcome::AlreadyRecorded {
                current: EmergencyStatus::InProgress
            }
        );
        assert!(notifier.changes().is_empty());
    }

    #[tokio::test]
    async fn extinguish_is_terminal() {
        let (reconciler, gateway, _) = reconciler();
        reconciler
            .apply(&event("E1", EmergencyStatus::InProgress))
            .await
            .unwrap();

        let resolved = event("E1", EmergencyStatus::Extinguished);
        assert_eq!(
            reconciler.apply(&resolved).await.unwrap(),
            ReconcileOutcome::Extinguished
        );
        assert_eq!(
            reconciler.apply(&resolved).await.unwrap(),
            ReconcileOutcome::AlreadyExtinguished
        );

        // A late creation event must not regress the record.
        assert_eq!(
            reconciler
                .apply(&event("E1", EmergencyStatus::InProgress))
                .await
                .unwrap(),
            ReconcileOutcome::AlreadyRecorded {
                current: EmergencyStatus::Extinguished
            }
        );
        let stored = gateway.find(&EmergencyId::from("E1")).await.unwrap().unwrap();
        assert_eq!(stored.status, EmergencyStatus::Extinguished);
    }

    #[tokio::test]
    async fn unknown_resolution_is_a_warning() {
        let (reconciler, gateway, notifier) = reconciler();
        let outcome = reconciler
            .apply(&event("E2", EmergencyStatus::Extinguished))
            .await
            .unwrap();

        assert_eq!(
            outcome,
            ReconcileOutcome::Warning(ReconciliationWarning::NoMatchingRecord {
                emergency_id: EmergencyId::from("E2"),
            })
        );
        assert!(gateway.is_empty().await);
        assert!(notifier.changes().is_empty());
    }

    #[tokio::test]
    async fn notifier_sees_only_mutations() {
        let (reconciler, _, notifier) = reconciler();
        let created = event("E1", EmergencyStatus::InProgress);
        let resolved = event("E1", EmergencyStatus::Extinguished);
        for e in [&created, &created, &resolved, &resolved] {
            reconciler.apply(e).await.unwrap();
        }

        let changes = notifier.changes();
        assert_eq!(changes.len(), 2);
        assert_eq!(changes.first().map(|c| c.previous), Some(None));
        assert_eq!(
            changes.get(1).map(|c| (c.previous, c.current)),
            Some((
                Some(EmergencyStatus::InProgress),
                EmergencyStatus::Extinguished
            ))
        );
    }

    /// Gateway whose calls never complete.
    struct StalledGateway;

    #[async_trait]
    impl PersistenceGateway for StalledGateway {
        async fn create_if_absent(&self, _record: &EmergencyRecord) -> Result<bool, StoreError> {
            std::future::pending().await
        }

        async fn transition_if_match(
            &self,
            _id: &EmergencyId,
            _from: EmergencyStatus,
            _to: EmergencyStatus,
        ) -> Result<u64, StoreError> {
            std::future::pending().await
        }

        async fn find(&self, _id: &EmergencyId) -> Result<Option<EmergencyRecord>, StoreError> {
            std::future::pending().await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_store_times_out_as_retryable() {
        let reconciler = Reconciler::new(Arc::new(StalledGateway), Duration::from_millis(50));
        let err = reconciler
            .apply(&event("E1", EmergencyStatus::InProgress))
            .await
            .unwrap_err();

        assert_eq!(
            err,
            StoreError::Timeout {
                operation: "create_if_absent",
                timeout_ms: 50,
            }
        );
        assert!(err.is_retryable());
    }
}

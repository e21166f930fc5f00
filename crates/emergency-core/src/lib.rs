//! Event reconciliation core for the emergency registry.
//!
//! Consumes emergency lifecycle events one at a time, validates them, and
//! applies them to the record store with at-least-once safety: redelivered,
//! reordered, or concurrently delivered events never produce duplicate or
//! regressed records, and no message is acknowledged before its outcome is
//! durable.
//!
//! # Pipeline
//!
//! ```text
//! Queue --> EventConsumer --> validate_event --> Reconciler --> PersistenceGateway
//!                 |                 |
//!                 +-- ack/requeue   +-- DeadLetterSink (malformed / invalid)
//! ```
//!
//! # Modules
//!
//! - [`validate`] -- Raw payload decoding and field validation
//! - [`gateway`] -- Store, dead-letter, and change-feed traits
//! - [`reconciler`] -- Lifecycle state machine over the gateway
//! - [`retry`] -- Bounded exponential backoff
//! - [`consumer`] -- Delivery handling and the cooperative consume loop
//! - [`memory`] -- In-process implementations of the traits
//! - [`error`] -- Error taxonomy

pub mod consumer;
pub mod error;
pub mod gateway;
pub mod memory;
pub mod reconciler;
pub mod retry;
pub mod validate;

pub use consumer::{ConsumerConfig, ConsumerStats, Delivery, Disposition, EventConsumer};
pub use error::{IntakeError, QueueError, StoreError, ValidationError};
pub use gateway::{DeadLetterSink, PersistenceGateway, StatusNotifier};
pub use memory::{InMemoryDeadLetters, InMemoryGateway, MemoryDelivery, RecordingNotifier, Settlement};
pub use reconciler::{ReconcileOutcome, ReconciliationWarning, Reconciler};
pub use retry::{RetryDecision, RetryPolicy};
pub use validate::validate_event;

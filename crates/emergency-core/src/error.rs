//! Error taxonomy for the reconciliation core.
//!
//! Errors split along one axis: whether retrying the same message can ever
//! succeed. Intake errors ([`IntakeError`]) are terminal per message and end
//! in the dead-letter sink. Store errors ([`StoreError`]) are retryable and
//! trigger a bounded requeue. Logical no-ops are not errors at all; they are
//! reported as [`ReconcileOutcome`](crate::reconciler::ReconcileOutcome)
//! variants.

/// A required or typed field failed validation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    /// A required field is absent or `null`.
    #[error("missing required field `{field}`")]
    MissingField {
        /// Wire name of the field.
        field: &'static str,
    },

    /// A field is present but its value is not acceptable.
    #[error("invalid field `{field}`: {reason}")]
    InvalidField {
        /// Wire name of the field.
        field: &'static str,
        /// What is wrong with the value.
        reason: String,
    },
}

impl ValidationError {
    /// Wire name of the offending field.
    pub const fn field(&self) -> &'static str {
        match self {
            Self::MissingField { field } | Self::InvalidField { field, .. } => field,
        }
    }
}

/// Failure to turn a raw payload into an event. Never retryable.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IntakeError {
    /// The payload is not a JSON object.
    #[error("malformed payload: {reason}")]
    MalformedPayload {
        /// Decoder error text.
        reason: String,
    },

    /// The payload decoded but a field was missing or invalid.
    #[error("validation failed: {0}")]
    Validation(#[from] ValidationError),
}

/// Failure talking to the record store or dead-letter sink. Always retryable.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// The store could not be reached or rejected the operation.
    #[error("store unavailable: {reason}")]
    Unavailable {
        /// Underlying driver error text.
        reason: String,
    },

    /// The operation did not complete within its deadline.
    #[error("store timeout: {operation} exceeded {timeout_ms}ms")]
    Timeout {
        /// Name of the gateway operation.
        operation: &'static str,
        /// The deadline in milliseconds.
        timeout_ms: u64,
    },
}

impl StoreError {
    /// Build an [`StoreError::Unavailable`] from any displayable error.
    pub fn unavailable(err: impl core::fmt::Display) -> Self {
        Self::Unavailable {
            reason: err.to_string(),
        }
    }

    /// Whether redelivering the message may succeed.
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Unavailable { .. } | Self::Timeout { .. })
    }
}

/// Failure talking to the message queue itself.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QueueError {
    /// Receiving the next delivery failed.
    #[error("queue receive error: {0}")]
    Receive(String),

    /// Acknowledging a delivery failed.
    #[error("queue ack error: {0}")]
    Ack(String),

    /// Negatively acknowledging (requeueing) a delivery failed.
    #[error("queue requeue error: {0}")]
    Requeue(String),
}

//! Enumeration types for the emergency registry.

use serde::{Deserialize, Serialize};

/// Lifecycle status of an emergency.
///
/// The only legal transition is `InProgress -> Extinguished`. The wire
/// representation matches the variant names exactly; anything else is
/// rejected at validation time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum EmergencyStatus {
    /// The emergency is active.
    InProgress,
    /// The emergency has been resolved. Terminal.
    Extinguished,
}

impl EmergencyStatus {
    /// The exact string used on the queue.
    pub const fn as_wire(self) -> &'static str {
        match self {
            Self::InProgress => "InProgress",
            Self::Extinguished => "Extinguished",
        }
    }

    /// Parse the exact wire string. No case folding, no aliases.
    pub fn from_wire(value: &str) -> Option<Self> {
        match value {
            "InProgress" => Some(Self::InProgress),
            "Extinguished" => Some(Self::Extinguished),
            _ => None,
        }
    }

    /// The `PostgreSQL` `emergency_status` enum label.
    pub const fn as_db(self) -> &'static str {
        match self {
            Self::InProgress => "in_progress",
            Self::Extinguished => "extinguished",
        }
    }

    /// Parse a `PostgreSQL` `emergency_status` enum label.
    pub fn from_db(value: &str) -> Option<Self> {
        match value {
            "in_progress" => Some(Self::InProgress),
            "extinguished" => Some(Self::Extinguished),
            _ => None,
        }
    }
}

impl core::fmt::Display for EmergencyStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_wire())
    }
}

/// Why a message ended up in the dead-letter sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeadLetterKind {
    /// The payload could not be decoded at all.
    MalformedPayload,
    /// The payload decoded but a field was missing or invalid.
    Validation,
    /// A retryable store failure persisted past the attempt limit.
    RetriesExhausted,
}

impl DeadLetterKind {
    /// Label stored in the `dead_letters.kind` column.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::MalformedPayload => "malformed_payload",
            Self::Validation => "validation",
            Self::RetriesExhausted => "retries_exhausted",
        }
    }

    /// Parse a `dead_letters.kind` column value.
    pub fn from_db(value: &str) -> Option<Self> {
        match value {
            "malformed_payload" => Some(Self::MalformedPayload),
            "validation" => Some(Self::Validation),
            "retries_exhausted" => Some(Self::RetriesExhausted),
            _ => None,
        }
    }
}

impl core::fmt::Display for DeadLetterKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

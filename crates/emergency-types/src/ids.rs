//! Type-safe identifier wrappers.
//!
//! Emergencies are keyed by an opaque string assigned upstream, so
//! [`EmergencyId`] wraps a [`String`] rather than a UUID. Dead letters are
//! generated locally and use UUID v7 (time-ordered) for efficient indexing.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Stable identifier of an emergency, as assigned by the upstream producer.
///
/// Every store operation is keyed by this value, never by the display name.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EmergencyId(String);

impl EmergencyId {
    /// Wrap an identifier string.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl core::fmt::Display for EmergencyId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for EmergencyId {
    fn from(id: &str) -> Self {
        Self(id.to_owned())
    }
}

impl From<String> for EmergencyId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Unique identifier for a dead-letter record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DeadLetterId(pub Uuid);

impl DeadLetterId {
    /// Create a new identifier using UUID v7 (time-ordered).
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Return the inner [`Uuid`] value.
    pub const fn into_inner(self) -> Uuid {
        self.0
    }
}

impl Default for DeadLetterId {
    fn default() -> Self {
        Self::new()
    }
}

impl core::fmt::Display for DeadLetterId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for DeadLetterId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn emergency_id_serializes_as_plain_string() {
        let id = EmergencyId::from("E1");
        let json = serde_json::to_string(&id).unwrap_or_default();
        assert_eq!(json, "\"E1\"");
    }

    #[test]
    fn dead_letter_ids_are_time_ordered() {
        let first = DeadLetterId::new();
        let second = DeadLetterId::new();
        assert!(first <= second);
    }
}

//! Core entity structs: events, records, dead letters, and status changes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::enums::{DeadLetterKind, EmergencyStatus};
use crate::ids::{DeadLetterId, EmergencyId};

/// A single validated lifecycle notification about one emergency.
///
/// Transient: one per queue message. Coordinates and magnitude are only
/// meaningful on creation (`InProgress`) events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmergencyEvent {
    /// Stable key of the emergency.
    pub emergency_id: EmergencyId,
    /// Human-readable display name. Not a key. Always present on
    /// `InProgress` events; resolutions may omit it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Lifecycle status carried by this event.
    pub status: EmergencyStatus,
    /// Latitude of the emergency, if reported.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latitude: Option<f64>,
    /// Longitude of the emergency, if reported.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub longitude: Option<f64>,
    /// Magnitude of the emergency, if reported.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub magnitude: Option<f64>,
}

impl EmergencyEvent {
    /// Build the durable record created by this event.
    ///
    /// The record always starts `InProgress`, whatever the event status;
    /// callers only create records from `InProgress` events, which always
    /// carry a name.
    pub fn to_record(&self) -> EmergencyRecord {
        EmergencyRecord {
            emergency_id: self.emergency_id.clone(),
            name: self.name.clone().unwrap_or_default(),
            latitude: self.latitude,
            longitude: self.longitude,
            magnitude: self.magnitude,
            status: EmergencyStatus::InProgress,
        }
    }
}

/// Durable representation of an emergency's current state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmergencyRecord {
    /// Stable key. At most one record exists per identifier.
    pub emergency_id: EmergencyId,
    /// Display name captured at creation.
    pub name: String,
    /// Latitude captured at creation.
    pub latitude: Option<f64>,
    /// Longitude captured at creation.
    pub longitude: Option<f64>,
    /// Magnitude captured at creation.
    pub magnitude: Option<f64>,
    /// Current lifecycle status.
    pub status: EmergencyStatus,
}

/// A message that could not be processed, preserved for manual inspection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeadLetter {
    /// Unique identifier of this dead letter.
    pub id: DeadLetterId,
    /// The original payload, byte for byte.
    pub payload: Vec<u8>,
    /// Failure category.
    pub kind: DeadLetterKind,
    /// Human-readable failure reason.
    pub reason: String,
    /// Delivery attempt on which the message was dead-lettered.
    pub attempts: u32,
    /// When the dead letter was recorded.
    pub received_at: DateTime<Utc>,
}

impl DeadLetter {
    /// Create a dead letter stamped with a fresh id and the current time.
    pub fn new(payload: &[u8], kind: DeadLetterKind, reason: impl Into<String>, attempts: u32) -> Self {
        Self {
            id: DeadLetterId::new(),
            payload: payload.to_vec(),
            kind,
            reason: reason.into(),
            attempts,
            received_at: Utc::now(),
        }
    }

    /// The payload as UTF-8 text, lossily decoded for log output.
    pub fn payload_lossy(&self) -> String {
        String::from_utf8_lossy(&self.payload).into_owned()
    }
}

/// Notification emitted after a record is created or transitioned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusChange {
    /// The emergency whose status changed.
    pub emergency_id: EmergencyId,
    /// Display name of the emergency, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Status before the change. `None` when the record was just created.
    pub previous: Option<EmergencyStatus>,
    /// Status after the change.
    pub current: EmergencyStatus,
    /// When the change was applied.
    pub changed_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_from_event_starts_in_progress() {
        let event = EmergencyEvent {
            emergency_id: EmergencyId::from("E1"),
            name: Some(String::from("Fire-Alpha")),
            status: EmergencyStatus::InProgress,
            latitude: Some(1.0),
            longitude: Some(2.0),
            magnitude: Some(5.0),
        };
        let record = event.to_record();
        assert_eq!(record.emergency_id.as_str(), "E1");
        assert_eq!(record.status, EmergencyStatus::InProgress);
        assert_eq!(record.magnitude, Some(5.0));
    }

    #[test]
    fn event_serializes_with_camel_case_keys() {
        let event = EmergencyEvent {
            emergency_id: EmergencyId::from("E2"),
            name: None,
            status: EmergencyStatus::Extinguished,
            latitude: None,
            longitude: None,
            magnitude: None,
        };
        let value = serde_json::to_value(&event).unwrap_or_default();
        assert_eq!(value["emergencyId"], "E2");
        assert_eq!(value["status"], "Extinguished");
        assert!(value.get("latitude").is_none());
        assert!(value.get("name").is_none());
    }

    #[test]
    fn dead_letter_preserves_payload_bytes() {
        let letter = DeadLetter::new(b"{not json", DeadLetterKind::MalformedPayload, "eof", 1);
        assert_eq!(letter.payload, b"{not json".to_vec());
        assert_eq!(letter.payload_lossy(), "{not json");
        assert_eq!(letter.attempts, 1);
    }
}

//! Raw payload validation into typed [`EmergencyEvent`]s.
//!
//! The queue carries JSON objects. Decoding happens in two stages so that
//! the two failure classes stay distinct: anything that is not a JSON object
//! is an [`IntakeError::MalformedPayload`]; a well-formed object with a
//! missing or mistyped field is an [`IntakeError::Validation`] naming that
//! field. Neither is ever silently ignored.
//!
//! The upstream producer publishes `emergency_id` as an integer timestamp,
//! so both the `emergencyId` and `emergency_id` keys are accepted, and a
//! non-negative integer identifier is normalised to its decimal string.

use emergency_types::{EmergencyEvent, EmergencyId, EmergencyStatus};
use serde_json::{Map, Value};

use crate::error::{IntakeError, ValidationError};

/// Wire name of the identifier field.
const FIELD_ID: &str = "emergencyId";

/// Legacy snake-case spelling of the identifier field.
const FIELD_ID_LEGACY: &str = "emergency_id";

/// Decode and validate a raw queue payload.
///
/// Pure: no logging, no side effects.
///
/// # Errors
///
/// Returns [`IntakeError::MalformedPayload`] if the payload is not a JSON
/// object, or [`IntakeError::Validation`] if a required field is missing or
/// any field has the wrong type or value.
pub fn validate_event(payload: &[u8]) -> Result<EmergencyEvent, IntakeError> {
    let value: Value = serde_json::from_slice(payload).map_err(|e| IntakeError::MalformedPayload {
        reason: e.to_string(),
    })?;

    let fields = match value {
        Value::Object(fields) => fields,
        other => {
            return Err(IntakeError::MalformedPayload {
                reason: format!("expected a JSON object, found {}", json_type_name(&other)),
            });
        }
    };

    let emergency_id = parse_emergency_id(&fields)?;
    let status = parse_status(&fields)?;

    // A resolution is keyed by id alone; name, coordinates and magnitude
    // only describe a new emergency.
    let (name, latitude, longitude, magnitude) = match status {
        EmergencyStatus::InProgress => (
            Some(required_string(&fields, "name")?),
            optional_number(&fields, "latitude")?,
            optional_number(&fields, "longitude")?,
            optional_number(&fields, "magnitude")?,
        ),
        EmergencyStatus::Extinguished => (optional_string(&fields, "name")?, None, None, None),
    };

    Ok(EmergencyEvent {
        emergency_id,
        name,
        status,
        latitude,
        longitude,
        magnitude,
    })
}

/// Look up a field, treating JSON `null` as absent.
fn field<'a>(fields: &'a Map<String, Value>, key: &str) -> Option<&'a Value> {
    fields.get(key).filter(|v| !v.is_null())
}

fn parse_emergency_id(fields: &Map<String, Value>) -> Result<EmergencyId, ValidationError> {
    let raw = field(fields, FIELD_ID)
        .or_else(|| field(fields, FIELD_ID_LEGACY))
        .ok_or(ValidationError::MissingField { field: FIELD_ID })?;

    let id = match raw {
        Value::String(s) => s.trim().to_owned(),
        Value::Number(n) => n.as_u64().map(|n| n.to_string()).ok_or_else(|| {
            ValidationError::InvalidField {
                field: FIELD_ID,
                reason: format!("numeric identifier must be a non-negative integer, got {n}"),
            }
        })?,
        other => {
            return Err(ValidationError::InvalidField {
                field: FIELD_ID,
                reason: format!("expected string, found {}", json_type_name(other)),
            });
        }
    };

    if id.is_empty() {
        return Err(ValidationError::InvalidField {
            field: FIELD_ID,
            reason: String::from("must not be blank"),
        });
    }
    Ok(EmergencyId::new(id))
}

fn required_string(fields: &Map<String, Value>, key: &'static str) -> Result<String, ValidationError> {
    match field(fields, key) {
        None => Err(ValidationError::MissingField { field: key }),
        Some(Value::String(s)) if s.trim().is_empty() => Err(ValidationError::InvalidField {
            field: key,
            reason: String::from("must not be blank"),
        }),
        Some(Value::String(s)) => Ok(s.clone()),
        Some(other) => Err(ValidationError::InvalidField {
            field: key,
            reason: format!("expected string, found {}", json_type_name(other)),
        }),
    }
}

fn optional_string(fields: &Map<String, Value>, key: &'static str) -> Result<Option<String>, ValidationError> {
    match field(fields, key) {
        None => Ok(None),
        Some(_) => required_string(fields, key).map(Some),
    }
}

fn parse_status(fields: &Map<String, Value>) -> Result<EmergencyStatus, ValidationError> {
    let raw = required_string(fields, "status")?;
    EmergencyStatus::from_wire(&raw).ok_or_else(|| ValidationError::InvalidField {
        field: "status",
        reason: format!("unknown status `{raw}`, expected `InProgress` or `Extinguished`"),
    })
}

fn optional_number(fields: &Map<String, Value>, key: &'static str) -> Result<Option<f64>, ValidationError> {
    match field(fields, key) {
        None => Ok(None),
        Some(Value::Number(n)) => n.as_f64().map(Some).ok_or_else(|| ValidationError::InvalidField {
            field: key,
            reason: format!("number {n} is not representable as f64"),
        }),
        Some(other) => Err(ValidationError::InvalidField {
            field: key,
            reason: format!("expected number, found {}", json_type_name(other)),
        }),
    }
}

const fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

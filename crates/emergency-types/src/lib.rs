//! Shared type definitions for the emergency registry.
//!
//! This crate is the single source of truth for the domain types that flow
//! between the queue, the reconciliation core, and the data layer.
//!
//! # Modules
//!
//! - [`ids`] -- Identifier wrappers for emergencies and dead letters
//! - [`enums`] -- Lifecycle status and dead-letter categories
//! - [`structs`] -- Events, durable records, dead letters, status changes

pub mod enums;
pub mod ids;
pub mod structs;

// Re-export all public types at crate root for convenience.
pub use enums::{DeadLetterKind, EmergencyStatus};
pub use ids::{DeadLetterId, EmergencyId};
pub use structs::{DeadLetter, EmergencyEvent, EmergencyRecord, StatusChange};

//! `PostgreSQL` data layer for the emergency registry.
//!
//! Holds the durable record of every emergency and the dead-letter store.
//! The operations here are the atomic primitives the reconciler is built
//! on; they never read-then-write.
//!
//! ```text
//! PostgresPool
//!     |-- EmergencyStore   (create_if_absent, transition_if_match, find)
//!     +-- DeadLetterStore  (insert, recent)
//! ```
//!
//! # Modules
//!
//! - [`postgres`] -- Connection pool, configuration, and migrations
//! - [`emergency_store`] -- Conditional writes on `emergencies`
//! - [`dead_letter_store`] -- Append-only `dead_letters`
//! - [`error`] -- Shared error types

pub mod dead_letter_store;
pub mod emergency_store;
pub mod error;
pub mod postgres;

pub use dead_letter_store::{DeadLetterRow, DeadLetterStore};
pub use emergency_store::{EmergencyRow, EmergencyStore};
pub use error::DbError;
pub use postgres::{PostgresConfig, PostgresPool};

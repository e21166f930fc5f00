//! Error types for the registry service.
//!
//! Startup failures only: configuration and NATS connectivity. Data-layer
//! failures surface as `DbError` with `anyhow` context in `main`, and
//! per-message failures are settled inside the consumer.

/// Errors that can occur while starting the registry service.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    /// Configuration is invalid or missing.
    #[error("config error: {0}")]
    Config(String),

    /// Failed to connect to or communicate with the NATS server.
    #[error("NATS error: {0}")]
    Nats(String),
}

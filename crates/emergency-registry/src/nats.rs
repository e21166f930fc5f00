//! NATS `JetStream` integration for event intake and the status feed.
//!
//! The producer publishes emergency events on a plain subject; a `JetStream`
//! stream captures that subject so events survive restarts, and a durable
//! pull consumer with explicit acknowledgment hands them to the registry.
//! The stream's delivery counter is the attempt number the retry policy
//! sees, and a requeue is a `NAK` with a redelivery delay.
//!
//! Applied status changes are published, fire-and-forget, on
//! `<prefix>.<emergency_id>`.

use std::time::Duration;

use async_nats::jetstream::consumer::{AckPolicy, PullConsumer};
use async_nats::jetstream::{self, AckKind};
use async_trait::async_trait;
use emergency_core::{Delivery, QueueError, StatusNotifier};
use emergency_types::{EmergencyId, StatusChange};
use futures::{Stream, StreamExt as _};
use tracing::{debug, info, warn};

use crate::error::RegistryError;

/// Connect to a NATS server.
///
/// # Errors
///
/// Returns [`RegistryError::Nats`] if the connection cannot be established.
pub async fn connect(url: &str) -> Result<async_nats::Client, RegistryError> {
    info!(url = url, "connecting to NATS server");
    let client = async_nats::connect(url)
        .await
        .map_err(|e| RegistryError::Nats(format!("failed to connect to {url}: {e}")))?;
    info!("NATS connection established");
    Ok(client)
}

/// Durable `JetStream` pull consumer bound to the emergency event stream.
pub struct JetStreamQueue {
    consumer: PullConsumer,
    stream: String,
    consumer_name: String,
}

impl JetStreamQueue {
    /// Ensure the stream and durable consumer exist, then bind to them.
    ///
    /// Both are created on first start and reused afterwards, so a restart
    /// resumes from the last acknowledged message.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::Nats`] if the stream or consumer cannot be
    /// created or fetched.
    pub async fn bind(
        client: async_nats::Client,
        stream: &str,
        subject: &str,
        consumer_name: &str,
    ) -> Result<Self, RegistryError> {
        let context = jetstream::new(client);

        let stream_handle = context
            .get_or_create_stream(jetstream::stream::Config {
                name: stream.to_owned(),
                subjects: vec![subject.to_owned()],
                ..Default::default()
            })
            .await
            .map_err(|e| RegistryError::Nats(format!("failed to open stream {stream}: {e}")))?;

        let consumer = stream_handle
            .get_or_create_consumer(
                consumer_name,
                jetstream::consumer::pull::Config {
                    durable_name: Some(consumer_name.to_owned()),
                    ack_policy: AckPolicy::Explicit,
                    ..Default::default()
                },
            )
            .await
            .map_err(|e| {
                RegistryError::Nats(format!(
                    "failed to open consumer {consumer_name} on {stream}: {e}"
                ))
            })?;

        info!(
            stream = stream,
            subject = subject,
            consumer = consumer_name,
            "bound to JetStream durable consumer"
        );

        Ok(Self {
            consumer,
            stream: stream.to_owned(),
            consumer_name: consumer_name.to_owned(),
        })
    }

    /// Open the continuous delivery stream.
    ///
    /// Each pull requests at most `max_in_flight` messages. The ack wait of
    /// a pulled message runs while it sits in the client buffer, so a larger
    /// batch would let the server redeliver messages no handler has seen
    /// and raise their attempt count.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::Nats`] if the pull subscription cannot be
    /// started.
    pub async fn deliveries(
        &self,
        max_in_flight: usize,
    ) -> Result<impl Stream<Item = Result<JetStreamDelivery, QueueError>>, RegistryError> {
        let batch = pull_batch_size(max_in_flight);
        let messages = self
            .consumer
            .stream()
            .max_messages_per_batch(batch)
            .messages()
            .await
            .map_err(|e| {
                RegistryError::Nats(format!(
                    "failed to pull from {}/{}: {e}",
                    self.stream, self.consumer_name
                ))
            })?;
        debug!(
            stream = self.stream,
            consumer = self.consumer_name,
            batch,
            "pull stream opened"
        );

        Ok(messages.map(|message| {
            message
                .map(JetStreamDelivery::new)
                .map_err(|e| QueueError::Receive(e.to_string()))
        }))
    }
}

impl std::fmt::Debug for JetStreamQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JetStreamQueue")
            .field("stream", &self.stream)
            .field("consumer", &self.consumer_name)
            .finish_non_exhaustive()
    }
}

/// One `JetStream` message awaiting acknowledgment.
pub struct JetStreamDelivery {
    message: jetstream::Message,
    attempt: u32,
}

impl JetStreamDelivery {
    fn new(message: jetstream::Message) -> Self {
        let attempt = match message.info() {
            Ok(info) => attempt_from_delivered(info.delivered),
            Err(e) => {
                warn!(
                    subject = %message.message.subject,
                    error = %e,
                    "message carries no JetStream metadata, treating as first delivery"
                );
                1
            }
        };
        Self { message, attempt }
    }
}

#[async_trait]
impl Delivery for JetStreamDelivery {
    fn payload(&self) -> &[u8] {
        self.message.message.payload.as_ref()
    }

    fn attempt(&self) -> u32 {
        self.attempt
    }

    async fn ack(&self) -> Result<(), QueueError> {
        self.message
            .ack()
            .await
            .map_err(|e| QueueError::Ack(e.to_string()))
    }

    async fn requeue(&self, delay: Duration) -> Result<(), QueueError> {
        self.message
            .ack_with(AckKind::Nak(Some(delay)))
            .await
            .map_err(|e| QueueError::Requeue(e.to_string()))
    }
}

impl std::fmt::Debug for JetStreamDelivery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JetStreamDelivery")
            .field("subject", &self.message.message.subject.as_str())
            .field("attempt", &self.attempt)
            .finish_non_exhaustive()
    }
}

/// Messages requested per pull: one per handler slot.
const fn pull_batch_size(max_in_flight: usize) -> usize {
    if max_in_flight == 0 {
        1
    } else {
        max_in_flight
    }
}

/// Clamp `JetStream`'s signed delivery counter to a 1-based attempt number.
fn attempt_from_delivered(delivered: i64) -> u32 {
    u32::try_from(delivered.max(1)).unwrap_or(u32::MAX)
}

/// Publishes applied status changes to NATS.
pub struct NatsStatusNotifier {
    client: async_nats::Client,
    prefix: String,
}

impl NatsStatusNotifier {
    /// Create a notifier publishing under `prefix`.
    pub fn new(client: async_nats::Client, prefix: &str) -> Self {
        Self {
            client,
            prefix: prefix.trim_end_matches('.').to_owned(),
        }
    }
}

impl StatusNotifier for NatsStatusNotifier {
    /// Serialization or publish failures are logged and never propagate.
    fn notify(&self, change: &StatusChange) {
        let subject = status_subject(&self.prefix, &change.emergency_id);
        match serde_json::to_vec(change) {
            Ok(payload) => {
                let client = self.client.clone();
                tokio::spawn(async move {
                    if let Err(e) = client.publish(subject.clone(), payload.into()).await {
                        warn!(
                            subject = subject,
                            error = %e,
                            "failed to publish status change"
                        );
                    }
                });
            }
            Err(e) => {
                warn!(
                    subject = subject,
                    error = %e,
                    "failed to serialize status change"
                );
            }
        }
    }
}

impl std::fmt::Debug for NatsStatusNotifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NatsStatusNotifier")
            .field("prefix", &self.prefix)
            .finish_non_exhaustive()
    }
}

/// Subject for changes to `id`: `<prefix>.<id>`.
///
/// Characters NATS treats as separators or wildcards are replaced with `_`
/// so an identifier always maps to exactly one subject token.
fn status_subject(prefix: &str, id: &EmergencyId) -> String {
    let token: String = id
        .as_str()
        .chars()
        .map(|c| match c {
            '.' | '*' | '>' => '_',
            c if c.is_whitespace() => '_',
            c => c,
        })
        .collect();
    format!("{prefix}.{token}")
}

//! NATS JetStream adapter.
//!
//! - [`connect`]: open a client and JetStream context
//! - [`provision`]: create or update the three streams and the durable pull consumer
//! - [`NatsMessageSource`] / [`NatsMessage`]: pull deliveries with ack
//! - [`JetStreamPublisher`]: publish and wait for the stream ack

use async_nats::jetstream::{
    self,
    consumer::{AckPolicy, PullConsumer},
    stream::{DiscardPolicy, RetentionPolicy},
};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::stream::{BoxStream, StreamExt};
use std::fmt;

use crate::broker::{DeliveryMetadata, InboundMessage, MessageSource, SubjectPublisher};
use crate::types::{Error, Result, StreamConfig};

/// Connect to the server and open a JetStream context.
pub async fn connect(url: &str) -> Result<jetstream::Context> {
    let client = async_nats::connect(url)
        .await
        .map_err(|e| Error::broker(format!("failed to connect to {url}: {e}")))?;
    tracing::info!(url, "connected to NATS");
    Ok(jetstream::new(client))
}

/// Stream definitions in provisioning order: output, invalid-message, webhook.
fn stream_configs(streams: &StreamConfig) -> [jetstream::stream::Config; 3] {
    [
        jetstream::stream::Config {
            name: streams.event_stream_name.clone(),
            subjects: vec![format!("{}.>", streams.event_subject_base)],
            description: Some("Output stream for canonical events".to_string()),
            retention: RetentionPolicy::Limits,
            max_age: streams.event_stream_max_age,
            discard: DiscardPolicy::Old,
            ..Default::default()
        },
        jetstream::stream::Config {
            name: streams.invalid_stream_name.clone(),
            subjects: vec![format!("{}.>", streams.invalid_subject_base)],
            description: Some("Invalid message channel".to_string()),
            retention: RetentionPolicy::Limits,
            max_age: streams.invalid_stream_max_age,
            discard: DiscardPolicy::Old,
            ..Default::default()
        },
        jetstream::stream::Config {
            name: streams.webhook_stream_name.clone(),
            subjects: vec![format!("{}.>", streams.webhook_subject_base)],
            description: Some("Work queue stream for incoming webhooks".to_string()),
            retention: RetentionPolicy::WorkQueue,
            ..Default::default()
        },
    ]
}

/// Durable explicit-ack pull consumer on the webhook stream.
fn consumer_config(streams: &StreamConfig) -> jetstream::consumer::pull::Config {
    jetstream::consumer::pull::Config {
        durable_name: Some(streams.webhook_consumer_name.clone()),
        ack_policy: AckPolicy::Explicit,
        ..Default::default()
    }
}

/// Create or update the output, invalid-message and webhook streams, then
/// create or update the durable consumer on the webhook stream.
///
/// An existing stream is updated to the configured subjects, retention and
/// max age, so a changed setting takes effect on restart.
pub async fn provision(context: &jetstream::Context, streams: &StreamConfig) -> Result<PullConsumer> {
    for config in stream_configs(streams) {
        let name = config.name.clone();
        tracing::debug!(stream = %name, subjects = ?config.subjects, "provisioning stream");
        if context.get_stream(&name).await.is_ok() {
            context
                .update_stream(&config)
                .await
                .map_err(|e| Error::broker(format!("failed to update stream '{name}': {e}")))?;
            tracing::info!(stream = %name, "stream updated");
        } else {
            context
                .create_stream(config)
                .await
                .map_err(|e| Error::broker(format!("failed to create stream '{name}': {e}")))?;
            tracing::info!(stream = %name, "stream created");
        }
    }

    let stream_name = &streams.webhook_stream_name;
    let webhook_stream = context
        .get_stream(stream_name)
        .await
        .map_err(|e| Error::broker(format!("failed to look up stream '{stream_name}': {e}")))?;
    let consumer_name = &streams.webhook_consumer_name;
    let consumer: PullConsumer = webhook_stream
        .create_consumer(consumer_config(streams))
        .await
        .map_err(|e| Error::broker(format!("failed to create or update consumer '{consumer_name}': {e}")))?;

    tracing::info!(
        stream = %stream_name,
        consumer = %consumer_name,
        "JetStream consumer ready"
    );
    Ok(consumer)
}

// =============================================================================
// Inbound
// =============================================================================

/// Continuous pull from a durable consumer.
pub struct NatsMessageSource {
    messages: BoxStream<'static, Result<jetstream::Message>>,
}

impl NatsMessageSource {
    pub async fn new(consumer: &PullConsumer) -> Result<Self> {
        let messages = consumer
            .messages()
            .await
            .map_err(|e| Error::broker(format!("failed to start pull: {e}")))?
            .map(|next| next.map_err(|e| Error::broker(format!("pull failed: {e}"))))
            .boxed();
        Ok(Self { messages })
    }
}

impl fmt::Debug for NatsMessageSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NatsMessageSource").finish_non_exhaustive()
    }
}

#[async_trait]
impl MessageSource for NatsMessageSource {
    type Message = NatsMessage;

    async fn next(&mut self) -> Option<Result<NatsMessage>> {
        let next = self.messages.next().await?;
        Some(next.map(|inner| NatsMessage { inner }))
    }
}

/// One JetStream delivery.
#[derive(Debug)]
pub struct NatsMessage {
    inner: jetstream::Message,
}

#[async_trait]
impl InboundMessage for NatsMessage {
    fn subject(&self) -> &str {
        self.inner.subject.as_str()
    }

    fn payload(&self) -> &[u8] {
        &self.inner.payload
    }

    fn metadata(&self) -> Result<DeliveryMetadata> {
        let info = self.inner.info().map_err(|e| Error::metadata(e.to_string()))?;
        let published = info.published;
        let timestamp = DateTime::<Utc>::from_timestamp(published.unix_timestamp(), published.nanosecond())
            .ok_or_else(|| Error::metadata("message timestamp out of range"))?;
        let delivered = u64::try_from(info.delivered)
            .map_err(|_| Error::metadata(format!("invalid delivery count {}", info.delivered)))?;

        Ok(DeliveryMetadata {
            stream: info.stream.to_string(),
            consumer: info.consumer.to_string(),
            stream_sequence: info.stream_sequence,
            delivered,
            timestamp,
        })
    }

    async fn ack(&self) -> Result<()> {
        self.inner
            .ack()
            .await
            .map_err(|e| Error::broker(format!("ack failed: {e}")))
    }
}

// =============================================================================
// Outbound
// =============================================================================

/// Publishes through JetStream and waits for the stream to store the message.
#[derive(Debug, Clone)]
pub struct JetStreamPublisher {
    context: jetstream::Context,
}

impl JetStreamPublisher {
    pub fn new(context: jetstream::Context) -> Self {
        Self { context }
    }
}

#[async_trait]
impl SubjectPublisher for JetStreamPublisher {
    async fn publish(&self, subject: String, payload: Bytes) -> Result<()> {
        let ack = self
            .context
            .publish(subject.clone(), payload)
            .await
            .map_err(|e| Error::broker(format!("publish to '{subject}' failed: {e}")))?;
        ack.await
            .map_err(|e| Error::broker(format!("publish to '{subject}' not acknowledged: {e}")))?;
        Ok(())
    }
}

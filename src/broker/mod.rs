//! Broker seams for the durable work queue and subject-addressed publishing.
//!
//! The pipeline only sees these traits:
//!   - [`InboundMessage`]: one delivery pulled from the work queue
//!   - [`MessageSource`]: pull-based delivery, one message at a time
//!   - [`SubjectPublisher`]: publish raw bytes to a subject
//!
//! [`nats`] implements them over NATS JetStream; [`memory`] is an in-process
//! work queue with the same redelivery semantics.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::Result;

pub mod memory;
pub mod nats;

/// Per-delivery metadata assigned by the broker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryMetadata {
    /// Stream the message was stored in.
    pub stream: String,
    /// Durable consumer that delivered it.
    pub consumer: String,
    /// Monotonic per-stream sequence.
    pub stream_sequence: u64,
    /// Delivery attempt, starting at 1.
    pub delivered: u64,
    /// When the message was enqueued.
    pub timestamp: DateTime<Utc>,
}

/// A message pulled from the inbound work queue.
///
/// Must be resolved by exactly one [`InboundMessage::ack`], or left
/// unacknowledged for the broker to redeliver.
#[async_trait]
pub trait InboundMessage: Send + Sync {
    fn subject(&self) -> &str;

    fn payload(&self) -> &[u8];

    fn metadata(&self) -> Result<DeliveryMetadata>;

    async fn ack(&self) -> Result<()>;
}

/// Pull-based delivery from a durable consumer.
#[async_trait]
pub trait MessageSource: Send {
    type Message: InboundMessage + 'static;

    /// Next delivery. `None` once the source is closed.
    async fn next(&mut self) -> Option<Result<Self::Message>>;
}

/// Publish raw bytes to a subject.
#[async_trait]
pub trait SubjectPublisher: Send + Sync {
    async fn publish(&self, subject: String, payload: Bytes) -> Result<()>;
}

//! In-memory durable work queue.
//!
//! Mirrors the JetStream semantics the pipeline relies on, inside a single
//! process:
//!   - Enqueue assigns a monotonic stream sequence and timestamp
//!   - Pull delivery of one message at a time, counting delivery attempts
//!   - Explicit acknowledgment; unacknowledged messages can be redelivered
//!   - Subject publishing with recorded output and injectable failures

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex, RwLock};

use crate::broker::{DeliveryMetadata, InboundMessage, MessageSource, SubjectPublisher};
use crate::types::{Error, Result};

// =============================================================================
// Message Types
// =============================================================================

/// A message published through [`InMemoryBroker`].
#[derive(Debug, Clone)]
pub struct PublishedMessage {
    pub subject: String,
    pub payload: Bytes,
}

impl PublishedMessage {
    /// Decode the payload as JSON.
    pub fn json(&self) -> Result<serde_json::Value> {
        Ok(serde_json::from_slice(&self.payload)?)
    }
}

/// Statistics about broker usage.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrokerStats {
    pub enqueued: u64,
    pub delivered: u64,
    pub redelivered: u64,
    pub acknowledged: u64,
    pub published: u64,
    pub publish_failures: u64,
}

#[derive(Debug, Clone)]
struct StoredMessage {
    subject: String,
    payload: Bytes,
    stream_sequence: u64,
    timestamp: DateTime<Utc>,
    delivered: u64,
}

#[derive(Debug)]
struct Shared {
    stream: String,
    consumer: String,
    next_sequence: AtomicU64,
    queue_tx: Mutex<Option<mpsc::UnboundedSender<StoredMessage>>>,
    queue_rx: Mutex<mpsc::UnboundedReceiver<StoredMessage>>,
    /// Delivered but not yet acknowledged, by stream sequence.
    pending: RwLock<BTreeMap<u64, StoredMessage>>,
    published: RwLock<Vec<PublishedMessage>>,
    failing_prefixes: RwLock<Vec<String>>,
    stats: RwLock<BrokerStats>,
}

// =============================================================================
// InMemoryBroker
// =============================================================================

/// In-process work queue and publisher.
///
/// Cloning shares the same queue, so one clone can feed a [`MemorySource`]
/// while another acts as the [`SubjectPublisher`] for the pipeline.
#[derive(Debug, Clone)]
pub struct InMemoryBroker {
    shared: Arc<Shared>,
}

impl InMemoryBroker {
    /// Create a broker whose deliveries report the given stream and consumer names.
    pub fn new(stream: impl Into<String>, consumer: impl Into<String>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            shared: Arc::new(Shared {
                stream: stream.into(),
                consumer: consumer.into(),
                next_sequence: AtomicU64::new(1),
                queue_tx: Mutex::new(Some(tx)),
                queue_rx: Mutex::new(rx),
                pending: RwLock::new(BTreeMap::new()),
                published: RwLock::new(Vec::new()),
                failing_prefixes: RwLock::new(Vec::new()),
                stats: RwLock::new(BrokerStats::default()),
            }),
        }
    }

    // =========================================================================
    // Work queue
    // =========================================================================

    /// Enqueue a message once. Returns its stream sequence.
    pub async fn enqueue(&self, subject: impl Into<String>, payload: impl Into<Bytes>) -> Result<u64> {
        let stream_sequence = self.shared.next_sequence.fetch_add(1, Ordering::SeqCst);
        let message = StoredMessage {
            subject: subject.into(),
            payload: payload.into(),
            stream_sequence,
            timestamp: Utc::now(),
            delivered: 0,
        };

        self.send(message).await?;
        self.shared.stats.write().await.enqueued += 1;

        tracing::debug!(stream_seq = stream_sequence, "enqueued message");
        Ok(stream_sequence)
    }

    /// Pull handle over the work queue. All sources share one queue.
    pub fn source(&self) -> MemorySource {
        MemorySource {
            shared: self.shared.clone(),
        }
    }

    /// Stop accepting new messages. Sources end once the queue is drained.
    pub async fn close(&self) {
        self.shared.queue_tx.lock().await.take();
    }

    /// Requeue every delivered-but-unacknowledged message, as a broker does
    /// once the ack wait expires. Returns how many were requeued.
    pub async fn redeliver_pending(&self) -> Result<usize> {
        let pending: Vec<StoredMessage> = {
            let mut pending = self.shared.pending.write().await;
            std::mem::take(&mut *pending).into_values().collect()
        };

        let count = pending.len();
        for message in pending {
            self.send(message).await?;
        }
        self.shared.stats.write().await.redelivered += count as u64;

        tracing::debug!(count, "redelivering unacknowledged messages");
        Ok(count)
    }

    /// Stream sequences delivered but not yet acknowledged.
    pub async fn pending(&self) -> Vec<u64> {
        self.shared.pending.read().await.keys().copied().collect()
    }

    async fn send(&self, message: StoredMessage) -> Result<()> {
        let guard = self.shared.queue_tx.lock().await;
        let tx = guard
            .as_ref()
            .ok_or_else(|| Error::broker("work queue is closed"))?;
        tx.send(message)
            .map_err(|_| Error::broker("work queue receiver dropped"))
    }

    // =========================================================================
    // Published output
    // =========================================================================

    /// Make every publish to a subject starting with `prefix` fail.
    pub async fn fail_publishes_to(&self, prefix: impl Into<String>) {
        self.shared.failing_prefixes.write().await.push(prefix.into());
    }

    pub async fn clear_publish_failures(&self) {
        self.shared.failing_prefixes.write().await.clear();
    }

    /// Everything published so far, in publish order.
    pub async fn published(&self) -> Vec<PublishedMessage> {
        self.shared.published.read().await.clone()
    }

    /// Published messages whose subject starts with `prefix`.
    pub async fn published_to(&self, prefix: &str) -> Vec<PublishedMessage> {
        self.shared
            .published
            .read()
            .await
            .iter()
            .filter(|m| m.subject.starts_with(prefix))
            .cloned()
            .collect()
    }

    pub async fn stats(&self) -> BrokerStats {
        self.shared.stats.read().await.clone()
    }
}

#[async_trait]
impl SubjectPublisher for InMemoryBroker {
    async fn publish(&self, subject: String, payload: Bytes) -> Result<()> {
        let failing = self
            .shared
            .failing_prefixes
            .read()
            .await
            .iter()
            .any(|prefix| subject.starts_with(prefix.as_str()));

        if failing {
            self.shared.stats.write().await.publish_failures += 1;
            return Err(Error::broker(format!("publish to '{subject}' rejected")));
        }

        tracing::debug!(subject = %subject, bytes = payload.len(), "published message");
        self.shared
            .published
            .write()
            .await
            .push(PublishedMessage { subject, payload });
        self.shared.stats.write().await.published += 1;
        Ok(())
    }
}

// =============================================================================
// Delivery
// =============================================================================

/// Pull side of the in-memory work queue.
#[derive(Debug)]
pub struct MemorySource {
    shared: Arc<Shared>,
}

#[async_trait]
impl MessageSource for MemorySource {
    type Message = MemoryMessage;

    async fn next(&mut self) -> Option<Result<MemoryMessage>> {
        let mut message = self.shared.queue_rx.lock().await.recv().await?;
        message.delivered += 1;

        self.shared
            .pending
            .write()
            .await
            .insert(message.stream_sequence, message.clone());
        self.shared.stats.write().await.delivered += 1;

        Some(Ok(MemoryMessage {
            message,
            shared: self.shared.clone(),
            acked: AtomicBool::new(false),
        }))
    }
}

/// One delivery from [`MemorySource`].
#[derive(Debug)]
pub struct MemoryMessage {
    message: StoredMessage,
    shared: Arc<Shared>,
    acked: AtomicBool,
}

#[async_trait]
impl InboundMessage for MemoryMessage {
    fn subject(&self) -> &str {
        &self.message.subject
    }

    fn payload(&self) -> &[u8] {
        &self.message.payload
    }

    fn metadata(&self) -> Result<DeliveryMetadata> {
        Ok(DeliveryMetadata {
            stream: self.shared.stream.clone(),
            consumer: self.shared.consumer.clone(),
            stream_sequence: self.message.stream_sequence,
            delivered: self.message.delivered,
            timestamp: self.message.timestamp,
        })
    }

    async fn ack(&self) -> Result<()> {
        if self.acked.swap(true, Ordering::SeqCst) {
            return Err(Error::broker(format!(
                "message {} already acknowledged",
                self.message.stream_sequence
            )));
        }

        self.shared
            .pending
            .write()
            .await
            .remove(&self.message.stream_sequence);
        self.shared.stats.write().await.acknowledged += 1;
        Ok(())
    }
}

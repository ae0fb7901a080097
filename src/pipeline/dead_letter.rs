//! Dead-letter escalation.
//!
//! A classified failure is recorded as a [`DeadLetterRecord`] on
//! `<dead-letter-base>.<original-subject>`, carrying the original payload and
//! its delivery metadata so the message can be inspected or replayed.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::broker::{InboundMessage, SubjectPublisher};
use crate::pipeline::FailureKind;
use crate::types::{Error, Result};

/// Record published for an escalated message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeadLetterRecord {
    /// Original inbound subject.
    pub subject: String,
    /// When the original message was enqueued.
    pub timestamp: DateTime<Utc>,
    pub stream_seq: u64,
    pub num_delivered: u64,
    /// Failure classification text.
    pub error: String,
    /// Original payload, decoded.
    pub content: Value,
}

impl DeadLetterRecord {
    pub fn from_message(message: &dyn InboundMessage, kind: FailureKind) -> Result<Self> {
        let metadata = message.metadata()?;
        let content = serde_json::from_slice(message.payload())?;

        Ok(Self {
            subject: message.subject().to_string(),
            timestamp: metadata.timestamp,
            stream_seq: metadata.stream_sequence,
            num_delivered: metadata.delivered,
            error: kind.to_string(),
            content,
        })
    }
}

/// Records a classified failure for an inbound message.
#[async_trait]
pub trait Escalator: Send + Sync {
    async fn escalate(&self, message: &dyn InboundMessage, kind: FailureKind) -> Result<()>;
}

/// [`Escalator`] that publishes [`DeadLetterRecord`]s under a subject base.
#[derive(Clone)]
pub struct DeadLetterEscalator {
    publisher: Arc<dyn SubjectPublisher>,
    subject_base: String,
    timeout: Duration,
}

impl fmt::Debug for DeadLetterEscalator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeadLetterEscalator")
            .field("subject_base", &self.subject_base)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl DeadLetterEscalator {
    pub fn new(publisher: Arc<dyn SubjectPublisher>, subject_base: impl Into<String>, timeout: Duration) -> Self {
        Self {
            publisher,
            subject_base: subject_base.into(),
            timeout,
        }
    }

    pub fn subject_for(&self, original_subject: &str) -> String {
        format!("{}.{}", self.subject_base, original_subject)
    }
}

#[async_trait]
impl Escalator for DeadLetterEscalator {
    async fn escalate(&self, message: &dyn InboundMessage, kind: FailureKind) -> Result<()> {
        let record = DeadLetterRecord::from_message(message, kind)?;
        let subject = self.subject_for(&record.subject);
        let payload = Bytes::from(serde_json::to_vec(&record)?);

        tracing::debug!(
            subject = %subject,
            stream_seq = record.stream_seq,
            num_delivered = record.num_delivered,
            kind = %kind,
            "publishing dead-letter record"
        );

        tokio::time::timeout(self.timeout, self.publisher.publish(subject.clone(), payload))
            .await
            .map_err(|_| {
                Error::timeout(format!(
                    "dead-letter publish to '{subject}' did not complete within {}",
                    humantime::format_duration(self.timeout)
                ))
            })?
    }
}

//! Canonical event publishing.
//!
//! Events are wrapped in a structured-mode CloudEvents 1.0 JSON envelope and
//! published to the subject named by their event type, e.g.
//! `dev.cdevents.change.merged.0.2.0`.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::broker::SubjectPublisher;
use crate::events::{CanonicalEvent, CanonicalEventType};
use crate::types::{Error, Result};

pub const CLOUDEVENTS_SPEC_VERSION: &str = "1.0";
const JSON_CONTENT_TYPE: &str = "application/json";

/// Publishes canonical events to the output stream.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, event: &CanonicalEvent) -> Result<()>;
}

#[derive(Debug, Serialize)]
struct CloudEvent<'a> {
    specversion: &'static str,
    id: &'a str,
    source: &'a str,
    #[serde(rename = "type")]
    event_type: CanonicalEventType,
    time: DateTime<Utc>,
    datacontenttype: &'static str,
    data: &'a CanonicalEvent,
}

impl<'a> CloudEvent<'a> {
    fn wrap(event: &'a CanonicalEvent) -> Self {
        Self {
            specversion: CLOUDEVENTS_SPEC_VERSION,
            id: event.id().as_str(),
            source: event.source(),
            event_type: event.event_type(),
            time: event.timestamp(),
            datacontenttype: JSON_CONTENT_TYPE,
            data: event,
        }
    }
}

/// [`EventPublisher`] that sends CloudEvents envelopes through a
/// [`SubjectPublisher`] with a bounded wait.
#[derive(Clone)]
pub struct CloudEventPublisher {
    publisher: Arc<dyn SubjectPublisher>,
    timeout: Duration,
}

impl fmt::Debug for CloudEventPublisher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CloudEventPublisher")
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl CloudEventPublisher {
    pub fn new(publisher: Arc<dyn SubjectPublisher>, timeout: Duration) -> Self {
        Self { publisher, timeout }
    }
}

#[async_trait]
impl EventPublisher for CloudEventPublisher {
    async fn publish(&self, event: &CanonicalEvent) -> Result<()> {
        event.validate()?;

        let subject = event.event_type().as_str().to_string();
        let payload = Bytes::from(serde_json::to_vec(&CloudEvent::wrap(event))?);

        tokio::time::timeout(self.timeout, self.publisher.publish(subject.clone(), payload))
            .await
            .map_err(|_| {
                Error::timeout(format!(
                    "publish to '{subject}' did not complete within {}",
                    humantime::format_duration(self.timeout)
                ))
            })?
    }
}

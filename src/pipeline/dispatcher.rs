//! Per-message dispatch.
//!
//! Each inbound message is resolved to exactly one [`Outcome`]:
//!
//! ```text
//! metadata ──✗──▶ Dropped(MetadataUnavailable)
//! object   ──✗──▶ Dropped(MalformedPayload)
//! route    ──✗──▶ escalate InvalidRoutingKey
//! lookup   ──✗──▶ escalate NoTranslator
//! translate──✗──▶ escalate TranslationFailed
//! publish  ──✗──▶ escalate PublishFailed
//!          ──✓──▶ Published(event type)
//! ```
//!
//! The message is acknowledged last, unless escalation itself failed. In that
//! case the outcome is [`Outcome::Unresolved`] and the broker redelivers.

use std::fmt;
use std::sync::Arc;

use crate::broker::InboundMessage;
use crate::events::{CanonicalEventType, TranslatorRegistry};
use crate::pipeline::{Escalator, EventPublisher};
use crate::types::{Result, RoutingKey};

// =============================================================================
// Outcomes
// =============================================================================

/// Classified failures. Each is escalated to the dead-letter channel once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    InvalidRoutingKey,
    NoTranslator,
    TranslationFailed,
    PublishFailed,
}

impl FailureKind {
    /// Text recorded in the dead-letter `error` field.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::InvalidRoutingKey => "Message subject is invalid",
            Self::NoTranslator => "No translator found",
            Self::TranslationFailed => "Could not translate event",
            Self::PublishFailed => "Failed to publish event",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failures that are logged and acknowledged without escalation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DropReason {
    MetadataUnavailable,
    MalformedPayload,
}

impl fmt::Display for DropReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MetadataUnavailable => f.write_str("delivery metadata unavailable"),
            Self::MalformedPayload => f.write_str("payload is not a JSON object"),
        }
    }
}

/// How one delivery was resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// A canonical event of this type was published.
    Published(CanonicalEventType),
    /// The failure was recorded on the dead-letter channel.
    Escalated(FailureKind),
    /// Logged and acknowledged.
    Dropped(DropReason),
    /// Escalation failed. The message was not acknowledged.
    Unresolved(FailureKind),
}

impl Outcome {
    /// Whether the message is acknowledged for this outcome.
    pub fn acknowledges(&self) -> bool {
        !matches!(self, Self::Unresolved(_))
    }
}

// =============================================================================
// Dispatcher
// =============================================================================

/// Routes inbound messages to translators and publishes the results.
///
/// Holds no mutable state; one instance is shared by every consumer loop.
#[derive(Clone)]
pub struct Dispatcher {
    registry: Arc<TranslatorRegistry>,
    publisher: Arc<dyn EventPublisher>,
    escalator: Arc<dyn Escalator>,
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher")
            .field("routing_keys", &self.registry.routing_keys())
            .finish_non_exhaustive()
    }
}

impl Dispatcher {
    pub fn new(
        registry: Arc<TranslatorRegistry>,
        publisher: Arc<dyn EventPublisher>,
        escalator: Arc<dyn Escalator>,
    ) -> Self {
        Self {
            registry,
            publisher,
            escalator,
        }
    }

    /// Resolve one delivery and acknowledge it.
    ///
    /// Returns `Err` only when the acknowledgment itself fails.
    pub async fn process<M: InboundMessage>(&self, message: &M) -> Result<Outcome> {
        let outcome = self.resolve(message).await;

        if outcome.acknowledges() {
            message.ack().await?;
        } else {
            tracing::warn!(
                subject = message.subject(),
                outcome = ?outcome,
                "message left unacknowledged for redelivery"
            );
        }
        Ok(outcome)
    }

    async fn resolve<M: InboundMessage>(&self, message: &M) -> Outcome {
        let subject = message.subject();

        let metadata = match message.metadata() {
            Ok(metadata) => metadata,
            Err(e) => {
                tracing::error!(subject, error = %e, "could not read delivery metadata");
                return Outcome::Dropped(DropReason::MetadataUnavailable);
            }
        };

        if let Err(e) = serde_json::from_slice::<serde_json::Map<String, serde_json::Value>>(message.payload()) {
            tracing::error!(
                subject,
                stream_seq = metadata.stream_sequence,
                error = %e,
                "could not decode message payload"
            );
            return Outcome::Dropped(DropReason::MalformedPayload);
        }

        tracing::debug!(
            subject,
            stream_seq = metadata.stream_sequence,
            num_delivered = metadata.delivered,
            "processing message"
        );

        let kind = match self.translate_and_publish(message).await {
            Ok(event_type) => {
                tracing::info!(
                    subject,
                    stream_seq = metadata.stream_sequence,
                    event_type = %event_type,
                    "published canonical event"
                );
                return Outcome::Published(event_type);
            }
            Err(kind) => kind,
        };

        match self.escalator.escalate(message, kind).await {
            Ok(()) => {
                tracing::info!(
                    subject,
                    stream_seq = metadata.stream_sequence,
                    kind = %kind,
                    "escalated message to dead-letter channel"
                );
                Outcome::Escalated(kind)
            }
            Err(e) => {
                tracing::error!(
                    subject,
                    stream_seq = metadata.stream_sequence,
                    kind = %kind,
                    error = %e,
                    "dead-letter escalation failed"
                );
                Outcome::Unresolved(kind)
            }
        }
    }

    async fn translate_and_publish<M: InboundMessage>(
        &self,
        message: &M,
    ) -> std::result::Result<CanonicalEventType, FailureKind> {
        let subject = message.subject();

        let Some(routing_key) = RoutingKey::from_subject(subject) else {
            tracing::warn!(subject, "subject carries no routing key");
            return Err(FailureKind::InvalidRoutingKey);
        };

        let Some(translator) = self.registry.get(routing_key.as_str()) else {
            tracing::warn!(subject, routing_key = %routing_key, "no translator registered");
            return Err(FailureKind::NoTranslator);
        };

        let event = translator.translate(message.payload()).map_err(|e| {
            tracing::warn!(subject, routing_key = %routing_key, error = %e, "translation failed");
            FailureKind::TranslationFailed
        })?;

        self.publisher.publish(&event).await.map_err(|e| {
            tracing::error!(
                subject,
                event_type = %event.event_type(),
                error = %e,
                "canonical event publish failed"
            );
            FailureKind::PublishFailed
        })?;

        Ok(event.event_type())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::DeliveryMetadata;
    use crate::events::translation::MockTranslator;
    use crate::events::{CanonicalEvent, TranslationError};
    use crate::pipeline::publisher::MockEventPublisher;
    use crate::types::Error;
    use async_trait::async_trait;
    use chrono::Utc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    // =========================================================================
    // Fakes
    // =========================================================================

    struct FakeMessage {
        subject: String,
        payload: Vec<u8>,
        metadata_fails: bool,
        ack_fails: bool,
        acks: AtomicUsize,
    }

    impl FakeMessage {
        fn new(subject: &str, payload: &str) -> Self {
            Self {
                subject: subject.to_string(),
                payload: payload.as_bytes().to_vec(),
                metadata_fails: false,
                ack_fails: false,
                acks: AtomicUsize::new(0),
            }
        }

        fn acks(&self) -> usize {
            self.acks.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl InboundMessage for FakeMessage {
        fn subject(&self) -> &str {
            &self.subject
        }

        fn payload(&self) -> &[u8] {
            &self.payload
        }

        fn metadata(&self) -> Result<DeliveryMetadata> {
            if self.metadata_fails {
                return Err(Error::metadata("not a JetStream message"));
            }
            Ok(DeliveryMetadata {
                stream: "webhook-adapter-queue".to_string(),
                consumer: "webhook-adapter".to_string(),
                stream_sequence: 7,
                delivered: 1,
                timestamp: Utc::now(),
            })
        }

        async fn ack(&self) -> Result<()> {
            self.acks.fetch_add(1, Ordering::SeqCst);
            if self.ack_fails {
                return Err(Error::broker("connection closed"));
            }
            Ok(())
        }
    }

    #[derive(Default)]
    struct RecordingEscalator {
        fail: bool,
        calls: Mutex<Vec<(String, FailureKind)>>,
    }

    impl RecordingEscalator {
        fn failing() -> Self {
            Self {
                fail: true,
                ..Default::default()
            }
        }

        fn calls(&self) -> Vec<(String, FailureKind)> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Escalator for RecordingEscalator {
        async fn escalate(&self, message: &dyn InboundMessage, kind: FailureKind) -> Result<()> {
            self.calls
                .lock()
                .unwrap()
                .push((message.subject().to_string(), kind));
            if self.fail {
                return Err(Error::broker("dead-letter stream unavailable"));
            }
            Ok(())
        }
    }

    fn merged_event() -> CanonicalEvent {
        let mut event = CanonicalEvent::new(CanonicalEventType::ChangeMerged);
        event.set_source("gitea.example.com");
        event.set_subject_id("abc123");
        event.set_subject_source("gitea.example.com/org/repo");
        event
    }

    fn translating_to(event: CanonicalEvent) -> MockTranslator {
        let mut translator = MockTranslator::new();
        translator
            .expect_translate()
            .times(1)
            .return_once(move |_| Ok(event));
        translator
    }

    fn publisher_ok(times: usize) -> MockEventPublisher {
        let mut publisher = MockEventPublisher::new();
        publisher.expect_publish().times(times).returning(|_| Ok(()));
        publisher
    }

    fn dispatcher(
        registry: TranslatorRegistry,
        publisher: MockEventPublisher,
        escalator: Arc<RecordingEscalator>,
    ) -> Dispatcher {
        Dispatcher::new(Arc::new(registry), Arc::new(publisher), escalator)
    }

    // =========================================================================
    // Tests
    // =========================================================================

    #[test]
    fn test_failure_kind_texts() {
        assert_eq!(FailureKind::InvalidRoutingKey.to_string(), "Message subject is invalid");
        assert_eq!(FailureKind::NoTranslator.to_string(), "No translator found");
        assert_eq!(FailureKind::TranslationFailed.to_string(), "Could not translate event");
        assert_eq!(FailureKind::PublishFailed.to_string(), "Failed to publish event");
    }

    #[tokio::test]
    async fn test_happy_path_publishes_and_acks() {
        let escalator = Arc::new(RecordingEscalator::default());
        let registry = TranslatorRegistry::new().with("gitea.push", translating_to(merged_event()));
        let dispatcher = dispatcher(registry, publisher_ok(1), escalator.clone());
        let message = FakeMessage::new("webhooks.gitea.push", "{}");

        let outcome = dispatcher.process(&message).await.unwrap();

        assert_eq!(outcome, Outcome::Published(CanonicalEventType::ChangeMerged));
        assert_eq!(message.acks(), 1);
        assert!(escalator.calls().is_empty());
    }

    #[tokio::test]
    async fn test_single_segment_subject_escalates_invalid_routing_key() {
        let escalator = Arc::new(RecordingEscalator::default());
        let dispatcher = dispatcher(TranslatorRegistry::new(), publisher_ok(0), escalator.clone());
        let message = FakeMessage::new("webhooks", "{}");

        let outcome = dispatcher.process(&message).await.unwrap();

        assert_eq!(outcome, Outcome::Escalated(FailureKind::InvalidRoutingKey));
        assert_eq!(
            escalator.calls(),
            vec![("webhooks".to_string(), FailureKind::InvalidRoutingKey)]
        );
        assert_eq!(message.acks(), 1);
    }

    #[tokio::test]
    async fn test_unknown_routing_key_escalates_no_translator() {
        let escalator = Arc::new(RecordingEscalator::default());
        let registry = TranslatorRegistry::new().with("gitea.push", MockTranslator::new());
        let dispatcher = dispatcher(registry, publisher_ok(0), escalator.clone());
        let message = FakeMessage::new("webhooks.unknown.thing", "{}");

        let outcome = dispatcher.process(&message).await.unwrap();

        assert_eq!(outcome, Outcome::Escalated(FailureKind::NoTranslator));
        assert_eq!(escalator.calls().len(), 1);
        assert_eq!(message.acks(), 1);
    }

    #[tokio::test]
    async fn test_empty_routing_key_is_a_lookup_miss() {
        let escalator = Arc::new(RecordingEscalator::default());
        let dispatcher = dispatcher(TranslatorRegistry::new(), publisher_ok(0), escalator.clone());
        let message = FakeMessage::new("webhooks.", "{}");

        let outcome = dispatcher.process(&message).await.unwrap();

        assert_eq!(outcome, Outcome::Escalated(FailureKind::NoTranslator));
    }

    #[tokio::test]
    async fn test_translation_error_escalates() {
        let escalator = Arc::new(RecordingEscalator::default());
        let mut translator = MockTranslator::new();
        translator
            .expect_translate()
            .times(1)
            .returning(|_| Err(TranslationError::NoCommits));
        let registry = TranslatorRegistry::new().with("gitea.push", translator);
        let dispatcher = dispatcher(registry, publisher_ok(0), escalator.clone());
        let message = FakeMessage::new("webhooks.gitea.push", r#"{"total_commits":0}"#);

        let outcome = dispatcher.process(&message).await.unwrap();

        assert_eq!(outcome, Outcome::Escalated(FailureKind::TranslationFailed));
        assert_eq!(
            escalator.calls(),
            vec![("webhooks.gitea.push".to_string(), FailureKind::TranslationFailed)]
        );
        assert_eq!(message.acks(), 1);
    }

    #[tokio::test]
    async fn test_publish_error_escalates() {
        let escalator = Arc::new(RecordingEscalator::default());
        let registry = TranslatorRegistry::new().with("gitea.push", translating_to(merged_event()));
        let mut publisher = MockEventPublisher::new();
        publisher
            .expect_publish()
            .times(1)
            .returning(|_| Err(Error::timeout("publish")));
        let dispatcher = dispatcher(registry, publisher, escalator.clone());
        let message = FakeMessage::new("webhooks.gitea.push", "{}");

        let outcome = dispatcher.process(&message).await.unwrap();

        assert_eq!(outcome, Outcome::Escalated(FailureKind::PublishFailed));
        assert_eq!(escalator.calls().len(), 1);
        assert_eq!(message.acks(), 1);
    }

    #[tokio::test]
    async fn test_metadata_failure_drops_and_acks() {
        let escalator = Arc::new(RecordingEscalator::default());
        let registry = TranslatorRegistry::new().with("gitea.push", MockTranslator::new());
        let dispatcher = dispatcher(registry, publisher_ok(0), escalator.clone());
        let mut message = FakeMessage::new("webhooks.gitea.push", "{}");
        message.metadata_fails = true;

        let outcome = dispatcher.process(&message).await.unwrap();

        assert_eq!(outcome, Outcome::Dropped(DropReason::MetadataUnavailable));
        assert!(escalator.calls().is_empty());
        assert_eq!(message.acks(), 1);
    }

    #[tokio::test]
    async fn test_malformed_payload_drops_without_translating() {
        let escalator = Arc::new(RecordingEscalator::default());
        let registry = TranslatorRegistry::new().with("gitea.push", MockTranslator::new());
        let dispatcher = dispatcher(registry, publisher_ok(0), escalator.clone());
        let message = FakeMessage::new("webhooks.gitea.push", "not json {");

        let outcome = dispatcher.process(&message).await.unwrap();

        assert_eq!(outcome, Outcome::Dropped(DropReason::MalformedPayload));
        assert!(escalator.calls().is_empty());
        assert_eq!(message.acks(), 1);
    }

    #[tokio::test]
    async fn test_non_object_json_drops_without_translating() {
        for payload in ["[1, 2]", "\"push\"", "42", "null"] {
            let escalator = Arc::new(RecordingEscalator::default());
            let registry = TranslatorRegistry::new().with("gitea.push", MockTranslator::new());
            let dispatcher = dispatcher(registry, publisher_ok(0), escalator.clone());
            let message = FakeMessage::new("webhooks.gitea.push", payload);

            let outcome = dispatcher.process(&message).await.unwrap();

            assert_eq!(outcome, Outcome::Dropped(DropReason::MalformedPayload), "payload {payload}");
            assert!(escalator.calls().is_empty());
            assert_eq!(message.acks(), 1);
        }
    }

    #[tokio::test]
    async fn test_translator_receives_raw_payload_bytes() {
        const RAW: &str = "{ \"total_commits\" : 1e0,\n  \"after\":\"abc123\" }";
        let escalator = Arc::new(RecordingEscalator::default());
        let mut translator = MockTranslator::new();
        translator
            .expect_translate()
            .withf(|payload| payload.to_vec() == RAW.as_bytes().to_vec())
            .times(1)
            .returning(|_| Ok(merged_event()));
        let registry = TranslatorRegistry::new().with("gitea.push", translator);
        let dispatcher = dispatcher(registry, publisher_ok(1), escalator.clone());
        let message = FakeMessage::new("webhooks.gitea.push", RAW);

        let outcome = dispatcher.process(&message).await.unwrap();

        assert_eq!(outcome, Outcome::Published(CanonicalEventType::ChangeMerged));
        assert!(escalator.calls().is_empty());
        assert_eq!(message.acks(), 1);
    }

    #[tokio::test]
    async fn test_failed_escalation_withholds_ack() {
        let escalator = Arc::new(RecordingEscalator::failing());
        let dispatcher = dispatcher(TranslatorRegistry::new(), publisher_ok(0), escalator.clone());
        let message = FakeMessage::new("webhooks.gitea.push", "{}");

        let outcome = dispatcher.process(&message).await.unwrap();

        assert_eq!(outcome, Outcome::Unresolved(FailureKind::NoTranslator));
        assert!(!outcome.acknowledges());
        assert_eq!(escalator.calls().len(), 1);
        assert_eq!(message.acks(), 0);
    }

    #[tokio::test]
    async fn test_ack_failure_is_returned() {
        let escalator = Arc::new(RecordingEscalator::default());
        let registry = TranslatorRegistry::new().with("gitea.push", translating_to(merged_event()));
        let dispatcher = dispatcher(registry, publisher_ok(1), escalator);
        let mut message = FakeMessage::new("webhooks.gitea.push", "{}");
        message.ack_fails = true;

        let err = dispatcher.process(&message).await.unwrap_err();

        assert!(matches!(err, Error::Broker(_)));
        assert_eq!(message.acks(), 1);
    }
}

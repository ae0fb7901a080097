//! Pipeline integration tests: work queue → consumer loop → dispatcher →
//! canonical event / dead-letter streams, over the in-memory broker.

use cdevents_sink::broker::memory::{InMemoryBroker, PublishedMessage};
use cdevents_sink::broker::{MessageSource, SubjectPublisher};
use cdevents_sink::events::gitea;
use cdevents_sink::pipeline::{
    drain, CloudEventPublisher, ConsumerLoop, ConsumerStats, DeadLetterEscalator, DeadLetterRecord, Dispatcher,
    DropReason, FailureKind, Outcome,
};
use pretty_assertions::assert_eq;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio_test::{assert_err, assert_ok};
use tokio_util::sync::CancellationToken;

const SHA: &str = "9d7b2d18bf7f315c666a4b3607f47bd452e7c8d2";
const PUBLISH_TIMEOUT: Duration = Duration::from_secs(10);

/// Helper: memory broker plus a dispatcher wired with the Gitea translators.
fn pipeline() -> (InMemoryBroker, Arc<Dispatcher>) {
    let broker = InMemoryBroker::new("webhook-adapter-queue", "webhook-adapter");
    let publisher: Arc<dyn SubjectPublisher> = Arc::new(broker.clone());

    let dispatcher = Dispatcher::new(
        Arc::new(gitea::default_registry()),
        Arc::new(CloudEventPublisher::new(publisher.clone(), PUBLISH_TIMEOUT)),
        Arc::new(DeadLetterEscalator::new(publisher, "invalid", PUBLISH_TIMEOUT)),
    );
    (broker, Arc::new(dispatcher))
}

/// Helper: enqueue, pull and dispatch a single message.
async fn dispatch_one(
    broker: &InMemoryBroker,
    dispatcher: &Dispatcher,
    subject: &str,
    payload: serde_json::Value,
) -> Outcome {
    broker
        .enqueue(subject, serde_json::to_vec(&payload).unwrap())
        .await
        .unwrap();
    let message = broker.source().next().await.unwrap().unwrap();
    dispatcher.process(&message).await.unwrap()
}

fn dead_letters(published: &[PublishedMessage]) -> Vec<DeadLetterRecord> {
    published
        .iter()
        .map(|m| serde_json::from_slice(&m.payload).unwrap())
        .collect()
}

fn push_payload() -> serde_json::Value {
    json!({
        "ref": "refs/heads/main",
        "after": SHA,
        "total_commits": 1,
        "repository": {
            "full_name": "yoloco/project1",
            "html_url": "http://git.example.com/yoloco/project1"
        }
    })
}

// =============================================================================
// Scenarios
// =============================================================================

#[tokio::test]
async fn test_push_publishes_change_merged_cloudevent() {
    let (broker, dispatcher) = pipeline();

    let outcome = dispatch_one(&broker, &dispatcher, "webhooks.gitea.push", push_payload()).await;

    assert!(matches!(outcome, Outcome::Published(_)));
    let published = broker.published_to("dev.cdevents.").await;
    assert_eq!(published.len(), 1);
    assert_eq!(published[0].subject, "dev.cdevents.change.merged.0.2.0");

    let envelope = published[0].json().unwrap();
    assert_eq!(envelope["type"], "dev.cdevents.change.merged.0.2.0");
    assert_eq!(envelope["source"], "git.example.com");
    let data = &envelope["data"];
    assert_eq!(data["context"]["source"], "git.example.com");
    assert_eq!(data["subject"]["id"], SHA);
    assert_eq!(data["subject"]["source"], "git.example.com/yoloco/project1");
    assert_eq!(data["subject"]["content"]["repository"]["id"], "yoloco/project1");
    assert_eq!(data["customData"]["Kind"], "structs.GiteaPushEvent");
    assert_eq!(data["customData"]["Content"]["after"], SHA);

    assert!(broker.published_to("invalid.").await.is_empty());
    assert!(broker.pending().await.is_empty());
}

#[tokio::test]
async fn test_pull_request_without_title_is_dead_lettered() {
    let (broker, dispatcher) = pipeline();
    let payload = json!({
        "action": "opened",
        "pull_request": {"id": 42, "title": ""},
        "repository": {
            "full_name": "yoloco/project1",
            "html_url": "http://git.example.com/yoloco/project1"
        }
    });

    let outcome = dispatch_one(&broker, &dispatcher, "webhooks.gitea.pull_request", payload.clone()).await;

    assert_eq!(outcome, Outcome::Escalated(FailureKind::TranslationFailed));
    let records = dead_letters(&broker.published_to("invalid.").await);
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].subject, "webhooks.gitea.pull_request");
    assert_eq!(records[0].error, "Could not translate event");
    assert_eq!(records[0].content, payload);
    assert_eq!(records[0].stream_seq, 1);
    assert_eq!(records[0].num_delivered, 1);
    assert!(broker.published_to("dev.cdevents.").await.is_empty());
}

#[tokio::test]
async fn test_create_with_unknown_ref_type_is_dead_lettered() {
    let (broker, dispatcher) = pipeline();
    let payload = json!({
        "ref": "v1.0.0",
        "ref_type": "unknown",
        "repository": {"full_name": "yoloco/project1", "html_url": "http://git.example.com/yoloco/project1"}
    });

    let outcome = dispatch_one(&broker, &dispatcher, "webhooks.gitea.create", payload).await;

    assert_eq!(outcome, Outcome::Escalated(FailureKind::TranslationFailed));
    let published = broker.published_to("invalid.").await;
    assert_eq!(published.len(), 1);
    assert_eq!(published[0].subject, "invalid.webhooks.gitea.create");
}

#[tokio::test]
async fn test_subject_without_routing_key_is_acked_exactly_once() {
    let (broker, dispatcher) = pipeline();

    let outcome = dispatch_one(&broker, &dispatcher, "invalid", json!({"hello": "world"})).await;

    assert_eq!(outcome, Outcome::Escalated(FailureKind::InvalidRoutingKey));
    let records = dead_letters(&broker.published_to("invalid.").await);
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].subject, "invalid");
    assert_eq!(records[0].error, "Message subject is invalid");

    let stats = broker.stats().await;
    assert_eq!(stats.acknowledged, 1);
    assert_eq!(stats.delivered, 1);
    assert!(broker.pending().await.is_empty());
    assert_eq!(assert_ok!(broker.redeliver_pending().await), 0);
}

#[tokio::test]
async fn test_unregistered_provider_is_dead_lettered() {
    let (broker, dispatcher) = pipeline();

    let outcome = dispatch_one(&broker, &dispatcher, "webhooks.github.push", push_payload()).await;

    assert_eq!(outcome, Outcome::Escalated(FailureKind::NoTranslator));
    let records = dead_letters(&broker.published_to("invalid.").await);
    assert_eq!(records[0].error, "No translator found");
}

#[tokio::test]
async fn test_rejected_canonical_publish_is_dead_lettered() {
    let (broker, dispatcher) = pipeline();
    broker.fail_publishes_to("dev.cdevents").await;

    let outcome = dispatch_one(&broker, &dispatcher, "webhooks.gitea.push", push_payload()).await;

    assert_eq!(outcome, Outcome::Escalated(FailureKind::PublishFailed));
    let records = dead_letters(&broker.published_to("invalid.").await);
    assert_eq!(records[0].error, "Failed to publish event");
    assert!(broker.pending().await.is_empty());
}

#[tokio::test]
async fn test_branch_event_without_source_fails_at_publish() {
    let (broker, dispatcher) = pipeline();
    let payload = json!({
        "ref": "feature/x",
        "ref_type": "branch",
        "repository": {"full_name": "yoloco/project1"}
    });

    let outcome = dispatch_one(&broker, &dispatcher, "webhooks.gitea.delete", payload).await;

    assert_eq!(outcome, Outcome::Escalated(FailureKind::PublishFailed));
}

#[tokio::test]
async fn test_non_json_payload_is_dropped_and_acked() {
    let (broker, dispatcher) = pipeline();
    broker.enqueue("webhooks.gitea.push", "<html>").await.unwrap();
    let message = broker.source().next().await.unwrap().unwrap();

    let outcome = assert_ok!(dispatcher.process(&message).await);

    assert!(matches!(outcome, Outcome::Dropped(_)));
    assert!(broker.published().await.is_empty());
    assert_eq!(broker.stats().await.acknowledged, 1);
}

#[tokio::test]
async fn test_json_array_payload_is_dropped_and_acked() {
    let (broker, dispatcher) = pipeline();

    let outcome = dispatch_one(&broker, &dispatcher, "webhooks.gitea.push", json!([push_payload()])).await;

    assert_eq!(outcome, Outcome::Dropped(DropReason::MalformedPayload));
    assert!(broker.published().await.is_empty());
    assert_eq!(broker.stats().await.acknowledged, 1);
}

// =============================================================================
// Redelivery
// =============================================================================

#[tokio::test]
async fn test_failed_escalation_is_redelivered_then_resolved() {
    let (broker, dispatcher) = pipeline();
    broker.fail_publishes_to("invalid").await;

    let outcome = dispatch_one(&broker, &dispatcher, "webhooks.gitea.unknown", json!({})).await;
    assert_eq!(outcome, Outcome::Unresolved(FailureKind::NoTranslator));
    assert_eq!(broker.pending().await, vec![1]);
    assert_eq!(broker.stats().await.acknowledged, 0);

    broker.clear_publish_failures().await;
    assert_eq!(broker.redeliver_pending().await.unwrap(), 1);

    let message = broker.source().next().await.unwrap().unwrap();
    let outcome = dispatcher.process(&message).await.unwrap();

    assert_eq!(outcome, Outcome::Escalated(FailureKind::NoTranslator));
    let records = dead_letters(&broker.published_to("invalid.").await);
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].stream_seq, 1);
    assert_eq!(records[0].num_delivered, 2);
    assert!(broker.pending().await.is_empty());
}

#[tokio::test]
async fn test_second_ack_is_rejected() {
    let (broker, dispatcher) = pipeline();
    broker.enqueue("webhooks.gitea.push", "{}").await.unwrap();
    let message = broker.source().next().await.unwrap().unwrap();

    assert_ok!(dispatcher.process(&message).await);
    assert_err!(dispatcher.process(&message).await);
    assert_eq!(broker.stats().await.acknowledged, 1);
}

// =============================================================================
// Consumer loops
// =============================================================================

#[tokio::test]
async fn test_consumer_loops_drain_mixed_traffic() {
    let (broker, dispatcher) = pipeline();
    broker
        .enqueue("webhooks.gitea.push", serde_json::to_vec(&push_payload()).unwrap())
        .await
        .unwrap();
    broker
        .enqueue(
            "webhooks.gitea.create",
            serde_json::to_vec(&json!({
                "ref": "feature/x",
                "ref_type": "branch",
                "repository": {"full_name": "yoloco/project1", "html_url": "http://git.example.com/yoloco/project1"}
            }))
            .unwrap(),
        )
        .await
        .unwrap();
    broker.enqueue("invalid", "{}").await.unwrap();
    broker.enqueue("webhooks.gitea.push", "not json").await.unwrap();
    broker.close().await;

    let cancel = CancellationToken::new();
    let handles = (0..2)
        .map(|i| ConsumerLoop::new(format!("loop-{i}"), broker.source(), dispatcher.clone(), cancel.clone()).spawn())
        .collect();

    let stats = drain(handles, Duration::from_secs(30)).await.unwrap();
    let total = stats
        .iter()
        .fold(ConsumerStats::default(), |acc, s| acc.merge(s));

    assert_eq!(
        total,
        ConsumerStats {
            received: 4,
            published: 2,
            escalated: 1,
            dropped: 1,
            ..Default::default()
        }
    );

    let mut subjects: Vec<String> = broker
        .published_to("dev.cdevents.")
        .await
        .into_iter()
        .map(|m| m.subject)
        .collect();
    subjects.sort();
    assert_eq!(
        subjects,
        vec![
            "dev.cdevents.branch.created.0.2.0".to_string(),
            "dev.cdevents.change.merged.0.2.0".to_string(),
        ]
    );
    assert!(broker.pending().await.is_empty());
}

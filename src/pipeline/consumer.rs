//! Consumer loops and shutdown draining.

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::broker::MessageSource;
use crate::pipeline::{Dispatcher, Outcome};
use crate::types::{Error, Result};

/// Counters for one consumer loop.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsumerStats {
    pub received: u64,
    pub published: u64,
    pub escalated: u64,
    pub dropped: u64,
    /// Escalation failed and the message was left for redelivery.
    pub unresolved: u64,
    pub pull_errors: u64,
    pub ack_errors: u64,
}

impl ConsumerStats {
    fn record(&mut self, outcome: Outcome) {
        match outcome {
            Outcome::Published(_) => self.published += 1,
            Outcome::Escalated(_) => self.escalated += 1,
            Outcome::Dropped(_) => self.dropped += 1,
            Outcome::Unresolved(_) => self.unresolved += 1,
        }
    }

    /// Sum counters across loops.
    pub fn merge(mut self, other: &ConsumerStats) -> Self {
        self.received += other.received;
        self.published += other.published;
        self.escalated += other.escalated;
        self.dropped += other.dropped;
        self.unresolved += other.unresolved;
        self.pull_errors += other.pull_errors;
        self.ack_errors += other.ack_errors;
        self
    }
}

/// Pulls one message at a time and drives it through the [`Dispatcher`].
#[derive(Debug)]
pub struct ConsumerLoop<S> {
    name: String,
    source: S,
    dispatcher: Arc<Dispatcher>,
    cancel: CancellationToken,
}

impl<S> ConsumerLoop<S>
where
    S: MessageSource + 'static,
{
    pub fn new(name: impl Into<String>, source: S, dispatcher: Arc<Dispatcher>, cancel: CancellationToken) -> Self {
        Self {
            name: name.into(),
            source,
            dispatcher,
            cancel,
        }
    }

    /// Run until cancelled or the source closes.
    ///
    /// Cancellation only interrupts the wait for the next message; a message
    /// already pulled is always processed to completion.
    pub async fn run(mut self) -> ConsumerStats {
        let mut stats = ConsumerStats::default();
        tracing::info!(consumer_loop = %self.name, "consumer loop started");

        loop {
            let next = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    tracing::info!(consumer_loop = %self.name, "consumer loop cancelled");
                    break;
                }
                next = self.source.next() => next,
            };

            let message = match next {
                Some(Ok(message)) => message,
                Some(Err(e)) => {
                    stats.pull_errors += 1;
                    tracing::warn!(consumer_loop = %self.name, error = %e, "failed to pull message");
                    continue;
                }
                None => {
                    tracing::info!(consumer_loop = %self.name, "message source closed");
                    break;
                }
            };

            stats.received += 1;
            match self.dispatcher.process(&message).await {
                Ok(outcome) => stats.record(outcome),
                Err(e) => {
                    stats.ack_errors += 1;
                    tracing::error!(consumer_loop = %self.name, error = %e, "failed to acknowledge message");
                }
            }
        }

        tracing::info!(consumer_loop = %self.name, stats = ?stats, "consumer loop stopped");
        stats
    }

    /// Spawn [`ConsumerLoop::run`] onto the runtime.
    pub fn spawn(self) -> JoinHandle<ConsumerStats> {
        tokio::spawn(self.run())
    }
}

/// Wait for every loop to finish within `timeout`.
pub async fn drain(handles: Vec<JoinHandle<ConsumerStats>>, timeout: Duration) -> Result<Vec<ConsumerStats>> {
    let joined = tokio::time::timeout(timeout, join_all(handles))
        .await
        .map_err(|_| {
            Error::timeout(format!(
                "consumer loops did not drain within {}",
                humantime::format_duration(timeout)
            ))
        })?;

    joined
        .into_iter()
        .map(|result| result.map_err(|e| Error::internal(format!("consumer loop failed: {e}"))))
        .collect()
}

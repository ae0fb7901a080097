//! cdevents-sink - main entry point.
//!
//! Provisions the JetStream streams, then runs consumer loops over the
//! webhook work queue until SIGINT/SIGTERM.

use clap::Parser;
use std::process::ExitCode;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use cdevents_sink::broker::nats::{self, JetStreamPublisher, NatsMessageSource};
use cdevents_sink::broker::SubjectPublisher;
use cdevents_sink::events::gitea;
use cdevents_sink::pipeline::{self, CloudEventPublisher, ConsumerLoop, DeadLetterEscalator, Dispatcher};
use cdevents_sink::{Config, Error, Result};

#[tokio::main]
async fn main() -> ExitCode {
    let config = Config::parse();
    cdevents_sink::observability::init_tracing(&config.observability);

    match run(config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "cdevents-sink exiting");
            ExitCode::FAILURE
        }
    }
}

async fn run(config: Config) -> Result<()> {
    config.validate()?;
    tracing::info!(
        config = %serde_json::to_string(&config)?,
        "cdevents-sink starting"
    );

    let startup_timeout = config.pipeline.startup_timeout;
    let (context, consumer) = tokio::time::timeout(startup_timeout, async {
        let context = nats::connect(&config.nats.url).await?;
        let consumer = nats::provision(&context, &config.streams).await?;
        Ok::<_, Error>((context, consumer))
    })
    .await
    .map_err(|_| {
        Error::timeout(format!(
            "startup did not complete within {}",
            humantime::format_duration(startup_timeout)
        ))
    })??;

    let registry = Arc::new(gitea::default_registry());
    tracing::info!(routing_keys = ?registry.routing_keys(), "translators registered");

    let publisher: Arc<dyn SubjectPublisher> = Arc::new(JetStreamPublisher::new(context));
    let dispatcher = Arc::new(Dispatcher::new(
        registry,
        Arc::new(CloudEventPublisher::new(publisher.clone(), config.pipeline.publish_timeout)),
        Arc::new(DeadLetterEscalator::new(
            publisher,
            config.streams.invalid_subject_base.clone(),
            config.pipeline.publish_timeout,
        )),
    ));

    let cancel = CancellationToken::new();
    let mut handles = Vec::with_capacity(config.pipeline.consumer_loops);
    for i in 0..config.pipeline.consumer_loops {
        let source = NatsMessageSource::new(&consumer).await?;
        let consumer_loop = ConsumerLoop::new(format!("consumer-{i}"), source, dispatcher.clone(), cancel.clone());
        handles.push(consumer_loop.spawn());
    }
    tracing::info!(
        consumer_loops = handles.len(),
        stream = %config.streams.webhook_stream_name,
        "cdevents-sink running"
    );

    shutdown_signal().await?;
    tracing::info!("shutdown requested, draining consumer loops");
    cancel.cancel();

    let stats = pipeline::drain(handles, config.pipeline.drain_timeout).await?;
    let total = stats
        .iter()
        .fold(pipeline::ConsumerStats::default(), |acc, s| acc.merge(s));
    tracing::info!(stats = ?total, "cdevents-sink stopped");
    Ok(())
}

#[cfg(unix)]
async fn shutdown_signal() -> Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut terminate = signal(SignalKind::terminate())?;
    tokio::select! {
        result = tokio::signal::ctrl_c() => result?,
        _ = terminate.recv() => {}
    }
    Ok(())
}

#[cfg(not(unix))]
async fn shutdown_signal() -> Result<()> {
    tokio::signal::ctrl_c().await?;
    Ok(())
}

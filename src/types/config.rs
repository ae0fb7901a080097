//! Configuration structures.
//!
//! Configuration is loaded from command-line flags and environment variables.
//! Every flag has an environment fallback (`NATS_URL`, `WEBHOOK_STREAM_NAME`, ...).

use clap::{Args, Parser, ValueEnum};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::events::CanonicalEventType;
use crate::types::{Error, Result};

/// Global sink configuration.
#[derive(Debug, Clone, Default, Parser, Serialize, Deserialize)]
#[command(
    name = "cdevents-sink",
    version,
    about = "Translate queued webhooks into CDEvents over NATS JetStream"
)]
pub struct Config {
    /// Broker connection.
    #[command(flatten)]
    #[serde(default)]
    pub nats: NatsConfig,

    /// Stream names and subject bases.
    #[command(flatten)]
    #[serde(default)]
    pub streams: StreamConfig,

    /// Pipeline timeouts and loop count.
    #[command(flatten)]
    #[serde(default)]
    pub pipeline: PipelineConfig,

    /// Observability configuration.
    #[command(flatten)]
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

/// Broker connection configuration.
#[derive(Debug, Clone, Args, Serialize, Deserialize)]
pub struct NatsConfig {
    /// NATS server URL.
    #[arg(long = "nats-url", env = "NATS_URL", default_value = "nats://localhost:4222")]
    pub url: String,
}

impl Default for NatsConfig {
    fn default() -> Self {
        Self {
            url: "nats://localhost:4222".to_string(),
        }
    }
}

/// Durable stream layout.
#[derive(Debug, Clone, Args, Serialize, Deserialize)]
pub struct StreamConfig {
    /// Work-queue stream receiving inbound webhooks.
    #[arg(long, env = "WEBHOOK_STREAM_NAME", default_value = "webhook-adapter-queue")]
    pub webhook_stream_name: String,

    /// Base segment of inbound subjects (`<base>.<routing-key>`).
    #[arg(long, env = "WEBHOOK_SUBJECT_BASE", default_value = "webhooks")]
    pub webhook_subject_base: String,

    /// Durable consumer pulling from the webhook stream.
    #[arg(long, env = "WEBHOOK_CONSUMER_NAME", default_value = "webhook-adapter")]
    pub webhook_consumer_name: String,

    /// Stream retaining dead-letter records.
    #[arg(long = "invalid-stream-name", env = "INVALID_MESSAGES_STREAM_NAME", default_value = "invalid-messages-channel")]
    pub invalid_stream_name: String,

    /// Base segment of dead-letter subjects (`<base>.<original-subject>`).
    #[arg(long = "invalid-subject-base", env = "INVALID_MESSAGES_SUBJECT_BASE", default_value = "invalid")]
    pub invalid_subject_base: String,

    /// Retention of dead-letter records.
    #[arg(long = "invalid-stream-max-age", env = "INVALID_MESSAGES_STREAM_MAX_AGE", default_value = "48h", value_parser = humantime::parse_duration)]
    #[serde(with = "humantime_serde")]
    pub invalid_stream_max_age: Duration,

    /// Output stream for canonical events.
    #[arg(long, env = "EVENT_STREAM_NAME", default_value = "cdevents")]
    pub event_stream_name: String,

    /// Subject base covering every canonical event type.
    #[arg(long, env = "EVENT_SUBJECT_BASE", default_value = "dev.cdevents")]
    pub event_subject_base: String,

    /// Retention of canonical events.
    #[arg(long, env = "EVENT_STREAM_MAX_AGE", default_value = "8808h", value_parser = humantime::parse_duration)]
    #[serde(with = "humantime_serde")]
    pub event_stream_max_age: Duration,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            webhook_stream_name: "webhook-adapter-queue".to_string(),
            webhook_subject_base: "webhooks".to_string(),
            webhook_consumer_name: "webhook-adapter".to_string(),
            invalid_stream_name: "invalid-messages-channel".to_string(),
            invalid_subject_base: "invalid".to_string(),
            invalid_stream_max_age: Duration::from_secs(48 * 3600),
            event_stream_name: "cdevents".to_string(),
            event_subject_base: "dev.cdevents".to_string(),
            event_stream_max_age: Duration::from_secs(8808 * 3600),
        }
    }
}

/// Pipeline timing configuration.
#[derive(Debug, Clone, Args, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Bound on each canonical-event and dead-letter publish.
    #[arg(long, env = "PUBLISH_TIMEOUT", default_value = "10s", value_parser = humantime::parse_duration)]
    #[serde(with = "humantime_serde")]
    pub publish_timeout: Duration,

    /// Bound on connecting and provisioning streams at startup.
    #[arg(long, env = "STARTUP_TIMEOUT", default_value = "30s", value_parser = humantime::parse_duration)]
    #[serde(with = "humantime_serde")]
    pub startup_timeout: Duration,

    /// Bound on draining consumer loops at shutdown.
    #[arg(long, env = "DRAIN_TIMEOUT", default_value = "30s", value_parser = humantime::parse_duration)]
    #[serde(with = "humantime_serde")]
    pub drain_timeout: Duration,

    /// Number of sequential consumer loops sharing the durable consumer.
    #[arg(long, env = "CONSUMER_LOOPS", default_value_t = 1)]
    pub consumer_loops: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            publish_timeout: Duration::from_secs(10),
            startup_timeout: Duration::from_secs(30),
            drain_timeout: Duration::from_secs(30),
            consumer_loops: 1,
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Json,
    Text,
}

/// Observability configuration.
#[derive(Debug, Clone, Args, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// Tracing log level (trace, debug, info, warn, error). `RUST_LOG` wins when set.
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Log line format.
    #[arg(long, env = "LOG_FORMAT", value_enum, default_value = "json")]
    pub log_format: LogFormat,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Json,
        }
    }
}

impl Config {
    /// Reject configurations the pipeline cannot run with.
    pub fn validate(&self) -> Result<()> {
        let streams = &self.streams;
        for (name, base) in [
            ("webhook subject base", &streams.webhook_subject_base),
            ("invalid-message subject base", &streams.invalid_subject_base),
            ("event subject base", &streams.event_subject_base),
        ] {
            validate_subject_base(name, base)?;
        }

        if streams.webhook_subject_base == streams.invalid_subject_base {
            return Err(Error::config(
                "webhook and invalid-message subject bases must differ",
            ));
        }

        let event_prefix = format!("{}.", streams.event_subject_base);
        if let Some(event_type) = CanonicalEventType::ALL
            .iter()
            .find(|t| !t.as_str().starts_with(&event_prefix))
        {
            return Err(Error::config(format!(
                "event subject base '{}' does not cover event type '{}'",
                streams.event_subject_base,
                event_type.as_str()
            )));
        }

        for (name, value) in [
            ("publish timeout", self.pipeline.publish_timeout),
            ("startup timeout", self.pipeline.startup_timeout),
            ("drain timeout", self.pipeline.drain_timeout),
        ] {
            if value.is_zero() {
                return Err(Error::config(format!("{name} must be greater than zero")));
            }
        }

        if self.pipeline.consumer_loops == 0 {
            return Err(Error::config("at least one consumer loop is required"));
        }

        Ok(())
    }
}

fn validate_subject_base(name: &str, base: &str) -> Result<()> {
    if base.is_empty() {
        return Err(Error::config(format!("{name} cannot be empty")));
    }
    if base.starts_with('.') || base.ends_with('.') || base.contains("..") {
        return Err(Error::config(format!("{name} '{base}' has an empty segment")));
    }
    if base.chars().any(|c| c == '*' || c == '>' || c.is_whitespace()) {
        return Err(Error::config(format!(
            "{name} '{base}' contains wildcard or whitespace characters"
        )));
    }
    Ok(())
}

//! Core types for the sink.
//!
//! This module provides foundational types used throughout the system:
//! - **IDs**: Strongly-typed identifiers (EventId, RoutingKey)
//! - **Errors**: Application error types with thiserror derives
//! - **Config**: Configuration structures for broker, streams, and pipeline

mod config;
mod errors;
mod ids;

pub use config::{
    Config, LogFormat, NatsConfig, ObservabilityConfig, PipelineConfig, StreamConfig,
};
pub use errors::{Error, Result};
pub use ids::{EventId, RoutingKey};

//! # cdevents-sink - webhook to CDEvents adapter
//!
//! Consumes provider webhook payloads from a durable work queue, translates
//! them into CDEvents-shaped canonical events and publishes those as
//! CloudEvents. Anything that cannot be translated or published is recorded
//! on a dead-letter channel.
//!
//! ## Architecture
//!
//! ```text
//!   webhooks.<provider>.<kind>
//!            │
//!            ▼
//!   ┌──────────────────┐     ┌────────────────────┐
//!   │  ConsumerLoop(s) │ ──▶ │     Dispatcher     │
//!   └──────────────────┘     │  ┌──────────────┐  │
//!                            │  │  Translator  │  │ ──▶ dev.cdevents.<type>
//!                            │  │   Registry   │  │
//!                            │  └──────────────┘  │ ──▶ invalid.<subject>
//!                            └────────────────────┘
//! ```

// Enforce strict safety at compile time
#![deny(unsafe_code)]
#![warn(missing_debug_implementations)]
#![warn(rust_2018_idioms)]

pub mod broker;
pub mod events;
pub mod pipeline;
pub mod types;

// Internal utilities
pub mod observability;

pub use types::{Config, Error, Result};

//! Webhook processing pipeline.
//!
//! ```text
//! MessageSource ─▶ ConsumerLoop ─▶ Dispatcher ─┬─▶ EventPublisher (canonical events)
//!                                              └─▶ Escalator (dead letters)
//! ```

pub mod consumer;
pub mod dead_letter;
pub mod dispatcher;
pub mod publisher;

pub use consumer::{drain, ConsumerLoop, ConsumerStats};
pub use dead_letter::{DeadLetterEscalator, DeadLetterRecord, Escalator};
pub use dispatcher::{Dispatcher, DropReason, FailureKind, Outcome};
pub use publisher::{CloudEventPublisher, EventPublisher};

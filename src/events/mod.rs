//! Canonical events and provider translation.
//!
//! Provider webhook payloads are translated into CDEvents-shaped
//! [`CanonicalEvent`]s by [`Translator`]s looked up in a [`TranslatorRegistry`].

pub mod canonical;
pub mod gitea;
pub mod translation;

pub use canonical::{CanonicalEvent, CanonicalEventType, Reference};
pub use translation::{TranslationError, Translator, TranslatorRegistry};

//! Translation of provider webhook payloads into canonical events.
//!
//! A [`Translator`] turns the raw bytes of one provider event kind into a
//! [`CanonicalEvent`]. The [`TranslatorRegistry`] maps routing keys to
//! translators; it is assembled once at startup and shared read-only.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use thiserror::Error;

use crate::events::CanonicalEvent;

/// Reasons a payload could not be translated.
#[derive(Error, Debug)]
pub enum TranslationError {
    #[error("Event payload is missing required fields, cannot convert to a CD Event")]
    MissingFields,

    #[error("Push event contains no new commits, will not convert to a CD Event")]
    NoCommits,

    #[error("Unsupported pull request action '{0}', cannot convert to a CD Event")]
    UnsupportedAction(String),

    #[error("Unsupported ref type '{0}', cannot convert to a CD Event")]
    UnsupportedRefType(String),

    #[error("Event payload does not match the provider schema: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Converts one provider event kind into a canonical event.
#[cfg_attr(test, mockall::automock)]
pub trait Translator: Send + Sync {
    fn translate(&self, payload: &[u8]) -> Result<CanonicalEvent, TranslationError>;
}

/// Routing key → translator table.
#[derive(Clone, Default)]
pub struct TranslatorRegistry {
    translators: HashMap<String, Arc<dyn Translator>>,
}

impl TranslatorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `translator` under `routing_key`, replacing any previous entry.
    pub fn with(mut self, routing_key: impl Into<String>, translator: impl Translator + 'static) -> Self {
        self.translators.insert(routing_key.into(), Arc::new(translator));
        self
    }

    /// Exact, case-sensitive lookup.
    pub fn get(&self, routing_key: &str) -> Option<&dyn Translator> {
        self.translators.get(routing_key).map(|t| t.as_ref())
    }

    /// Registered routing keys, sorted.
    pub fn routing_keys(&self) -> Vec<&str> {
        let mut keys: Vec<&str> = self.translators.keys().map(String::as_str).collect();
        keys.sort_unstable();
        keys
    }

    pub fn len(&self) -> usize {
        self.translators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.translators.is_empty()
    }
}

impl fmt::Debug for TranslatorRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TranslatorRegistry")
            .field("routing_keys", &self.routing_keys())
            .finish()
    }
}

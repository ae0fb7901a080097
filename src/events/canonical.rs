//! Canonical event model.
//!
//! Every provider payload is translated into a [`CanonicalEvent`], a CDEvents
//! (spec 0.4.1) document. The JSON layout follows the CDEvents wire format so
//! downstream consumers can decode it with any CDEvents SDK.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

use crate::types::{Error, EventId, Result};

/// CDEvents specification version stamped on every event.
pub const CDEVENTS_SPEC_VERSION: &str = "0.4.1";

/// Declared type of a canonical event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CanonicalEventType {
    #[serde(rename = "dev.cdevents.change.created.0.3.0")]
    ChangeCreated,
    #[serde(rename = "dev.cdevents.change.merged.0.2.0")]
    ChangeMerged,
    #[serde(rename = "dev.cdevents.branch.created.0.2.0")]
    BranchCreated,
    #[serde(rename = "dev.cdevents.branch.deleted.0.2.0")]
    BranchDeleted,
}

impl CanonicalEventType {
    pub const ALL: [Self; 4] = [
        Self::ChangeCreated,
        Self::ChangeMerged,
        Self::BranchCreated,
        Self::BranchDeleted,
    ];

    /// Full CDEvents type string. Also the transport subject of the event.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ChangeCreated => "dev.cdevents.change.created.0.3.0",
            Self::ChangeMerged => "dev.cdevents.change.merged.0.2.0",
            Self::BranchCreated => "dev.cdevents.branch.created.0.2.0",
            Self::BranchDeleted => "dev.cdevents.branch.deleted.0.2.0",
        }
    }

    /// CDEvents subject type (`subject.type`).
    pub fn subject_type(self) -> &'static str {
        match self {
            Self::ChangeCreated | Self::ChangeMerged => "change",
            Self::BranchCreated | Self::BranchDeleted => "branch",
        }
    }
}

impl fmt::Display for CanonicalEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reference to another CDEvents subject (e.g. the repository of a change).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reference {
    pub id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub source: String,
}

impl Reference {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            source: String::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventContext {
    pub version: String,
    pub id: EventId,
    pub source: String,
    #[serde(rename = "type")]
    pub event_type: CanonicalEventType,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SubjectContent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repository: Option<Reference>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventSubject {
    pub id: String,
    pub source: String,
    #[serde(rename = "type")]
    pub subject_type: String,
    pub content: SubjectContent,
}

/// A translated event ready for publishing.
///
/// Subject id, source and subject source start empty; [`CanonicalEvent::validate`]
/// refuses the event until all three are set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CanonicalEvent {
    pub context: EventContext,
    pub subject: EventSubject,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_data_content_type: Option<String>,
}

impl CanonicalEvent {
    /// Create an empty event of the given type with a fresh id and timestamp.
    pub fn new(event_type: CanonicalEventType) -> Self {
        Self {
            context: EventContext {
                version: CDEVENTS_SPEC_VERSION.to_string(),
                id: EventId::new(),
                source: String::new(),
                event_type,
                timestamp: Utc::now(),
            },
            subject: EventSubject {
                id: String::new(),
                source: String::new(),
                subject_type: event_type.subject_type().to_string(),
                content: SubjectContent::default(),
            },
            custom_data: None,
            custom_data_content_type: None,
        }
    }

    pub fn event_type(&self) -> CanonicalEventType {
        self.context.event_type
    }

    pub fn id(&self) -> &EventId {
        &self.context.id
    }

    pub fn source(&self) -> &str {
        &self.context.source
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.context.timestamp
    }

    pub fn subject_id(&self) -> &str {
        &self.subject.id
    }

    pub fn subject_source(&self) -> &str {
        &self.subject.source
    }

    pub fn repository(&self) -> Option<&Reference> {
        self.subject.content.repository.as_ref()
    }

    pub fn description(&self) -> Option<&str> {
        self.subject.content.description.as_deref()
    }

    pub fn custom_data(&self) -> Option<&Value> {
        self.custom_data.as_ref()
    }

    pub fn set_source(&mut self, source: impl Into<String>) {
        self.context.source = source.into();
    }

    pub fn set_subject_id(&mut self, id: impl Into<String>) {
        self.subject.id = id.into();
    }

    pub fn set_subject_source(&mut self, source: impl Into<String>) {
        self.subject.source = source.into();
    }

    pub fn set_subject_repository(&mut self, repository: Reference) {
        self.subject.content.repository = Some(repository);
    }

    pub fn set_subject_description(&mut self, description: impl Into<String>) {
        self.subject.content.description = Some(description.into());
    }

    pub fn set_custom_data(&mut self, content_type: impl Into<String>, data: Value) {
        self.custom_data_content_type = Some(content_type.into());
        self.custom_data = Some(data);
    }

    /// Check that the fields required for publishing are present.
    pub fn validate(&self) -> Result<()> {
        let missing: Vec<&str> = [
            ("context.source", self.context.source.is_empty()),
            ("subject.id", self.subject.id.is_empty()),
            ("subject.source", self.subject.source.is_empty()),
        ]
        .into_iter()
        .filter_map(|(field, empty)| empty.then_some(field))
        .collect();

        if missing.is_empty() {
            Ok(())
        } else {
            Err(Error::invalid_event(format!(
                "{} event missing {}",
                self.context.event_type,
                missing.join(", ")
            )))
        }
    }
}

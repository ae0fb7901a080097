//! Strongly-typed identifiers.
//!
//! `EventId` is minted as a UUID v4; `RoutingKey` is derived from a subject.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Macro to define a strongly-typed ID newtype wrapper.
///
/// Generates: struct, `as_str()`, Display, Serialize, Deserialize.
/// Optionally generates `new()` (UUID v4) and `Default` if `uuid` flag is passed.
macro_rules! define_id {
    ($name:ident, uuid) => {
        define_id!($name);

        impl $name {
            pub fn new() -> Self {
                Self(uuid::Uuid::new_v4().to_string())
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }
    };
    ($name:ident) => {
        #[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub struct $name(String);

        impl $name {
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

define_id!(EventId, uuid);
define_id!(RoutingKey);

impl RoutingKey {
    /// Derive the routing key from an inbound subject by dropping its first
    /// dot-separated segment.
    ///
    /// `webhooks.gitea.push` → `gitea.push`. Subjects with fewer than two
    /// segments carry no routing key.
    pub fn from_subject(subject: &str) -> Option<Self> {
        let (_base, rest) = subject.split_once('.')?;
        Some(Self(rest.to_string()))
    }
}

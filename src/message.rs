//! The immutable message envelope passed between agents.
//!
//! The payload is an opaque string so that agents agree on their own schema
//! (typically JSON); the framework never parses it except where an
//! orchestration pattern is explicitly told to read a routing label.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Immutable envelope carrying a message between agents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Globally unique identifier, assigned at construction.
    pub id: Uuid,
    /// Application-defined type tag (e.g. `"request"`, `"vote"`, `"result"`).
    pub message_type: String,
    /// Opaque payload; interpretation is owned by the agents exchanging it.
    pub payload: String,
    /// Creation timestamp.
    pub timestamp: DateTime<Utc>,
    /// Free-form metadata (trace ids, routing labels, provenance).
    pub metadata: HashMap<String, String>,
}

impl Message {
    /// Builds a new message with a fresh id and the current time.
    #[must_use]
    pub fn new(message_type: impl Into<String>, payload: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            message_type: message_type.into(),
            payload: payload.into(),
            timestamp: Utc::now(),
            metadata: HashMap::new(),
        }
    }

    /// Builds a message carrying the given metadata map.
    #[must_use]
    pub fn with_metadata(
        message_type: impl Into<String>,
        payload: impl Into<String>,
        metadata: HashMap<String, String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            message_type: message_type.into(),
            payload: payload.into(),
            timestamp: Utc::now(),
            metadata,
        }
    }

    /// Reads a metadata value, used by `Router` to pull a classification
    /// label out of a classifier agent's response by agreement with it.
    #[must_use]
    pub fn metadata_value(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_assigns_unique_ids() {
        let a = Message::new("request", "{}");
        let b = Message::new("request", "{}");
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn clone_is_deep() {
        let mut original = Message::new("request", "payload");
        original
            .metadata
            .insert("trace".to_string(), "abc".to_string());
        let cloned = original.clone();
        assert_eq!(original, cloned);
    }

    #[test]
    fn metadata_value_reads_label() {
        let mut metadata = HashMap::new();
        metadata.insert("label".to_string(), "billing".to_string());
        let msg = Message::with_metadata("classification", "{}", metadata);
        assert_eq!(msg.metadata_value("label"), Some("billing"));
        assert_eq!(msg.metadata_value("missing"), None);
    }
}

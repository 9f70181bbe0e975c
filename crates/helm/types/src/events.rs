//! Lifecycle events
//!
//! One event is emitted per terminal outcome of a pass.

use crate::ReleaseIdentity;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Metadata key carrying the artifact revision
pub const REVISION_METADATA_KEY: &str = "revision";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventSeverity {
    Info,
    Error,
}

/// A lifecycle event about a release
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReleaseEvent {
    /// Unique event ID
    pub id: Uuid,

    /// Event timestamp
    pub timestamp: chrono::DateTime<chrono::Utc>,

    /// Release the event is about
    pub subject: ReleaseIdentity,

    pub severity: EventSeverity,

    /// Human-readable message
    pub message: String,

    /// Extra metadata, e.g. the artifact revision
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

impl ReleaseEvent {
    pub fn new(
        subject: ReleaseIdentity,
        severity: EventSeverity,
        message: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: chrono::Utc::now(),
            subject,
            severity,
            message: message.into(),
            metadata: BTreeMap::new(),
        }
    }

    /// Tag the event with an artifact revision; empty revisions are ignored
    pub fn with_revision(mut self, revision: Option<&str>) -> Self {
        if let Some(revision) = revision.filter(|r| !r.is_empty()) {
            self.metadata
                .insert(REVISION_METADATA_KEY.to_string(), revision.to_string());
        }
        self
    }

    pub fn revision(&self) -> Option<&str> {
        self.metadata.get(REVISION_METADATA_KEY).map(String::as_str)
    }
}

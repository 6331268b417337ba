//! Long-running ingestion operations.

use serde::{Deserialize, Serialize};

/// Snapshot of a remote long-running operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestionOperation {
    /// Operation resource name
    pub name: String,

    /// True once the operation reached a terminal state
    pub done: bool,

    /// Terminal failure reported by the service
    pub error: Option<OperationStatus>,

    /// Per-object results (populated once done, possibly partially before)
    pub entries: Vec<IngestEntry>,
}

impl IngestionOperation {
    /// A freshly submitted, still running operation
    pub fn pending(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            done: false,
            error: None,
            entries: Vec::new(),
        }
    }

    /// Look up the reported result for an audio URI
    pub fn entry_for(&self, audio_uri: &str) -> Option<&IngestEntry> {
        self.entries.iter().find(|e| e.audio_uri == audio_uri)
    }
}

/// google.rpc.Status subset
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationStatus {
    #[serde(default)]
    pub code: i32,

    #[serde(default)]
    pub message: String,
}

/// Result the service reported for one audio object
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestEntry {
    pub audio_uri: String,
    pub status: EntryStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "status")]
pub enum EntryStatus {
    /// A new conversation was created
    Ingested { conversation: Option<String> },

    /// The service already had a conversation for this audio
    Duplicate,

    /// The service failed to ingest this object
    Failed { reason: String },
}

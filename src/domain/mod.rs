//! Domain types for the ingestion pipeline.
//!
//! This module contains the core data structures:
//! - AudioReference: an audio object discovered in storage
//! - Transcript / RedactionResult: outputs of the speech and PII stages
//! - ConversationRecord: the analytics service's conversation schema
//! - IngestionOperation: a polled long-running ingestion operation
//! - FileProgress / RunSummary: per-file state machine and run totals

pub mod audio;
pub mod conversation;
pub mod duration;
pub mod file;
pub mod operation;
pub mod redaction;
pub mod summary;
pub mod transcript;

// Re-export commonly used types
pub use audio::AudioReference;
pub use conversation::{
    CallMetadata, ConversationRecord, ConversationTranscript, DataSource, Medium,
    ParticipantRole, SegmentParticipant, SegmentWord, TranscriptSegment,
};
pub use file::{FileOutcome, FileProgress, FileReport, FileState, TransitionError};
pub use operation::{EntryStatus, IngestEntry, IngestionOperation, OperationStatus};
pub use redaction::{Finding, RedactionOutcome, RedactionResult, RedactionTemplates};
pub use summary::{FileError, IngestionMode, RunSummary};
pub use transcript::{Transcript, Utterance, WordInfo};

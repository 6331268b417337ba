//! Per-file state machine.
//!
//! Formatted upload: Discovered → Transcribing → Redacting → Formatting → Uploading → terminal
//! Direct ingestion: Discovered → BatchSubmitted → Polling → terminal
//!
//! Transitions only move forward and terminal states are final.

use std::time::Instant;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::audio::AudioReference;

/// Where a file is in its pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileState {
    Discovered,
    Transcribing,
    Redacting,
    Formatting,
    Uploading,
    BatchSubmitted,
    Polling,
    Succeeded,
    SkippedDuplicate,
    Failed,
    Incomplete,
}

impl FileState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Succeeded | Self::SkippedDuplicate | Self::Failed | Self::Incomplete
        )
    }

    /// Whether `next` is a legal successor of this state
    pub fn can_transition_to(&self, next: FileState) -> bool {
        use FileState::*;

        match self {
            Discovered => matches!(next, Transcribing | BatchSubmitted | Failed),
            Transcribing => matches!(next, Redacting | Failed),
            Redacting => matches!(next, Formatting | Failed),
            Formatting => matches!(next, Uploading | Failed),
            Uploading => matches!(next, Succeeded | SkippedDuplicate | Failed),
            BatchSubmitted => matches!(next, Polling | Failed),
            Polling => matches!(next, Succeeded | SkippedDuplicate | Failed | Incomplete),
            Succeeded | SkippedDuplicate | Failed | Incomplete => false,
        }
    }
}

#[derive(Debug, Clone, Error)]
#[error("Invalid state transition for {audio_uri}: {from:?} → {to:?}")]
pub struct TransitionError {
    pub audio_uri: String,
    pub from: FileState,
    pub to: FileState,
}

/// Terminal result of one file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "outcome")]
pub enum FileOutcome {
    /// Conversation created (name if the service returned one)
    Succeeded { conversation: Option<String> },

    /// The service already held a conversation for this audio
    SkippedDuplicate,

    /// Processing stopped at `stage`
    Failed { stage: FileState, error: String },

    /// The ingestion operation was still running when polling gave up
    Incomplete { operation: String },
}

impl FileOutcome {
    pub fn terminal_state(&self) -> FileState {
        match self {
            Self::Succeeded { .. } => FileState::Succeeded,
            Self::SkippedDuplicate => FileState::SkippedDuplicate,
            Self::Failed { .. } => FileState::Failed,
            Self::Incomplete { .. } => FileState::Incomplete,
        }
    }
}

/// Tracks one file through its states
#[derive(Debug)]
pub struct FileProgress {
    audio_uri: String,
    state: FileState,
    history: Vec<FileState>,
    warnings: Vec<String>,
    attempts: u32,
    started: Instant,
}

impl FileProgress {
    pub fn new(audio: &AudioReference) -> Self {
        Self {
            audio_uri: audio.uri(),
            state: FileState::Discovered,
            history: vec![FileState::Discovered],
            warnings: Vec::new(),
            attempts: 0,
            started: Instant::now(),
        }
    }

    pub fn state(&self) -> FileState {
        self.state
    }

    pub fn audio_uri(&self) -> &str {
        &self.audio_uri
    }

    /// Move to a non-terminal state
    pub fn advance(&mut self, next: FileState) -> Result<(), TransitionError> {
        if !self.state.can_transition_to(next) {
            return Err(TransitionError {
                audio_uri: self.audio_uri.clone(),
                from: self.state,
                to: next,
            });
        }
        self.state = next;
        self.history.push(next);
        Ok(())
    }

    pub fn warn(&mut self, warning: impl Into<String>) {
        self.warnings.push(warning.into());
    }

    /// Add service calls made for this file (including retries)
    pub fn add_attempts(&mut self, attempts: u32) {
        self.attempts += attempts;
    }

    /// Record the terminal outcome and produce the report
    pub fn finish(mut self, outcome: FileOutcome) -> FileReport {
        let terminal = outcome.terminal_state();
        if !self.state.can_transition_to(terminal) {
            tracing::warn!(
                audio_uri = %self.audio_uri,
                from = ?self.state,
                to = ?terminal,
                "Unexpected terminal transition"
            );
        }
        self.history.push(terminal);

        FileReport {
            audio_uri: self.audio_uri,
            outcome,
            states: self.history,
            warnings: self.warnings,
            attempts: self.attempts,
            duration_ms: self.started.elapsed().as_millis() as u64,
        }
    }
}

/// What happened to one file, as recorded in the run summary
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileReport {
    pub audio_uri: String,
    pub outcome: FileOutcome,
    /// States visited, in order, ending with the terminal state
    pub states: Vec<FileState>,
    pub warnings: Vec<String>,
    pub attempts: u32,
    pub duration_ms: u64,
}

impl FileReport {
    /// Report for a file that never got past discovery (e.g. its task panicked)
    pub fn failed(audio_uri: impl Into<String>, stage: FileState, error: impl Into<String>) -> Self {
        Self {
            audio_uri: audio_uri.into(),
            outcome: FileOutcome::Failed {
                stage,
                error: error.into(),
            },
            states: vec![FileState::Discovered, FileState::Failed],
            warnings: Vec::new(),
            attempts: 0,
            duration_ms: 0,
        }
    }
}

//! Error taxonomy for the pipeline.
//!
//! Configuration and storage-access errors are fatal and abort the run
//! before any file task starts. Everything else is scoped to a single file
//! (or a single direct-ingestion batch) and ends up in the run summary.

use std::time::Duration;

use thiserror::Error;

use crate::domain::TransitionError;

/// Errors raised by pipeline components
#[derive(Debug, Clone, Error)]
pub enum PipelineError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Cannot access bucket '{bucket}': {reason}")]
    StorageAccess { bucket: String, reason: String },

    #[error("Transcription failed: {reason}")]
    Transcription { reason: String },

    #[error("Redaction failed: {reason}")]
    Redaction { reason: String },

    #[error("Ingestion failed: {reason}")]
    Ingestion { reason: String },

    #[error("Operation {operation} failed: {reason}")]
    OperationFailed { operation: String, reason: String },

    #[error("Operation {operation} did not finish within {waited:?}")]
    OperationTimeout { operation: String, waited: Duration },

    #[error(transparent)]
    State(#[from] TransitionError),
}

impl PipelineError {
    pub fn configuration(reason: impl Into<String>) -> Self {
        Self::Configuration(reason.into())
    }

    pub fn storage(bucket: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::StorageAccess {
            bucket: bucket.into(),
            reason: reason.into(),
        }
    }

    pub fn transcription(reason: impl Into<String>) -> Self {
        Self::Transcription {
            reason: reason.into(),
        }
    }

    pub fn redaction(reason: impl Into<String>) -> Self {
        Self::Redaction {
            reason: reason.into(),
        }
    }

    pub fn ingestion(reason: impl Into<String>) -> Self {
        Self::Ingestion {
            reason: reason.into(),
        }
    }

    /// Fatal errors stop the whole run
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Configuration(_) | Self::StorageAccess { .. })
    }

    /// Per-file errors that the orchestrator may retry
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Transcription { .. } | Self::Redaction { .. } | Self::Ingestion { .. }
        )
    }
}

pub type Result<T, E = PipelineError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        assert!(PipelineError::configuration("bad").is_fatal());
        assert!(PipelineError::storage("b", "denied").is_fatal());
        assert!(!PipelineError::transcription("quota").is_fatal());

        assert!(PipelineError::ingestion("503").is_retryable());
        assert!(PipelineError::redaction("500").is_retryable());
        assert!(!PipelineError::OperationFailed {
            operation: "op".into(),
            reason: "boom".into()
        }
        .is_retryable());
    }

    #[test]
    fn test_display_includes_context() {
        let err = PipelineError::storage("calls", "404 Not Found");
        assert_eq!(err.to_string(), "Cannot access bucket 'calls': 404 Not Found");
    }
}

//! Ingestion client.
//!
//! The mode is fixed when the configuration is loaded:
//! - `FormattedUpload`: one create-conversation call per formatted record
//! - `DirectIngestion`: one bulk ingestion per batch of audio URIs, then
//!   bounded polling of the returned operation

use std::sync::Arc;

use tracing::{info, instrument, warn};

use super::formatter::ConversationFormatter;
use super::poll::{poll_until, PollOutcome, PollSettings};
use super::retry::{with_retry, Attempted, RetryPolicy};
use crate::adapters::{CreateOutcome, IngestRequest, InsightsService};
use crate::config::Settings;
use crate::domain::{
    AudioReference, CallMetadata, ConversationRecord, EntryStatus, FileOutcome, FileProgress,
    FileReport, FileState, IngestionMode, IngestionOperation,
};
use crate::error::PipelineError;

/// Ingestion strategy chosen at configuration-load time
pub enum IngestionClient {
    FormattedUpload(FormattedUploader),
    DirectIngestion(DirectIngestor),
}

impl IngestionClient {
    pub fn from_settings(settings: &Settings, service: Arc<dyn InsightsService>) -> Self {
        let insights = &settings.insights;
        let parent = insights.parent(&settings.project_id);
        let retry = settings.processing.retry.clone();

        match insights.mode {
            IngestionMode::FormattedUpload => Self::FormattedUpload(FormattedUploader {
                service,
                parent,
                retry,
            }),
            IngestionMode::DirectIngestion => Self::DirectIngestion(DirectIngestor {
                service,
                formatter: ConversationFormatter::new(insights),
                parent,
                recognizer: insights.recognizer.clone(),
                channels: insights.channels,
                agent_id: insights.agent_id.clone(),
                poll: insights.poll,
                retry,
            }),
        }
    }

    pub fn mode(&self) -> IngestionMode {
        match self {
            Self::FormattedUpload(_) => IngestionMode::FormattedUpload,
            Self::DirectIngestion(_) => IngestionMode::DirectIngestion,
        }
    }
}

// ============================================================================
// Formatted upload
// ============================================================================

/// Creates one conversation per formatted record
#[derive(Clone)]
pub struct FormattedUploader {
    service: Arc<dyn InsightsService>,
    parent: String,
    retry: RetryPolicy,
}

impl FormattedUploader {
    /// Create the conversation, retrying transient failures.
    ///
    /// An existing conversation with the same id comes back as
    /// `CreateOutcome::AlreadyExists`, never as an error.
    pub async fn upload(&self, record: &ConversationRecord) -> Attempted<CreateOutcome> {
        with_retry(&self.retry, "create conversation", |_| {
            self.service.create_conversation(&self.parent, record)
        })
        .await
    }
}

// ============================================================================
// Direct ingestion
// ============================================================================

/// Submits batches of raw audio to bulk ingestion
pub struct DirectIngestor {
    service: Arc<dyn InsightsService>,
    formatter: ConversationFormatter,
    parent: String,
    recognizer: String,
    channels: CallMetadata,
    agent_id: Option<String>,
    poll: PollSettings,
    retry: RetryPolicy,
}

impl DirectIngestor {
    fn request(&self, files: &[AudioReference]) -> IngestRequest {
        IngestRequest {
            parent: self.parent.clone(),
            conversations: files.iter().map(|a| self.formatter.audio_only(a)).collect(),
            recognizer: self.recognizer.clone(),
            channels: self.channels,
            agent_id: self.agent_id.clone(),
        }
    }

    /// Ingest one batch and unpack the operation result into one report per file
    #[instrument(skip(self, files), fields(files = files.len()))]
    pub async fn ingest_batch(&self, files: &[AudioReference]) -> Vec<FileReport> {
        let mut progress: Vec<FileProgress> = files.iter().map(FileProgress::new).collect();
        advance_all(&mut progress, FileState::BatchSubmitted);

        let request = self.request(files);
        let submitted = with_retry(&self.retry, "ingest conversations", |_| {
            self.service.ingest_conversations(&request)
        })
        .await;

        for p in &mut progress {
            p.add_attempts(submitted.attempts);
        }

        let operation = match submitted.result {
            Ok(operation) => operation,
            Err(e) => {
                return finish_all(progress, |_| FileOutcome::Failed {
                    stage: FileState::BatchSubmitted,
                    error: e.to_string(),
                })
            }
        };

        advance_all(&mut progress, FileState::Polling);
        let name = operation.name.clone();

        let outcome = if operation.done {
            PollOutcome::Done(operation)
        } else {
            poll_until(
                &self.poll,
                &name,
                || self.service.get_operation(&name),
                |op: &IngestionOperation| op.done,
            )
            .await
        };

        match outcome {
            PollOutcome::TimedOut { .. } => {
                let timeout = PipelineError::OperationTimeout {
                    operation: name.clone(),
                    waited: self.poll.max_wait,
                };
                warn!(operation = %name, "{}", timeout);
                for p in &mut progress {
                    p.warn(timeout.to_string());
                }
                finish_all(progress, |_| FileOutcome::Incomplete {
                    operation: name.clone(),
                })
            }
            PollOutcome::Done(op) => match &op.error {
                Some(status) => {
                    let failure = PipelineError::OperationFailed {
                        operation: name.clone(),
                        reason: format!("{} (code {})", status.message, status.code),
                    };
                    warn!(operation = %name, error = %failure, "Ingestion operation failed");
                    finish_all(progress, |_| FileOutcome::Failed {
                        stage: FileState::Polling,
                        error: failure.to_string(),
                    })
                }
                None => {
                    info!(
                        operation = %name,
                        reported = op.entries.len(),
                        "Ingestion operation finished"
                    );
                    finish_all(progress, |uri| outcome_for(&op, uri))
                }
            },
        }
    }
}

/// Per-file outcome from a finished operation
fn outcome_for(operation: &IngestionOperation, audio_uri: &str) -> FileOutcome {
    match operation.entry_for(audio_uri).map(|e| &e.status) {
        Some(EntryStatus::Ingested { conversation }) => FileOutcome::Succeeded {
            conversation: conversation.clone(),
        },
        Some(EntryStatus::Duplicate) => FileOutcome::SkippedDuplicate,
        Some(EntryStatus::Failed { reason }) => FileOutcome::Failed {
            stage: FileState::Polling,
            error: PipelineError::OperationFailed {
                operation: operation.name.clone(),
                reason: reason.clone(),
            }
            .to_string(),
        },
        None => FileOutcome::Failed {
            stage: FileState::Polling,
            error: format!("operation {} did not report this file", operation.name),
        },
    }
}

fn advance_all(progress: &mut [FileProgress], next: FileState) {
    for p in progress {
        if let Err(e) = p.advance(next) {
            warn!(error = %e, "Skipped invalid state transition");
        }
    }
}

fn finish_all<F>(progress: Vec<FileProgress>, outcome: F) -> Vec<FileReport>
where
    F: Fn(&str) -> FileOutcome,
{
    progress
        .into_iter()
        .map(|p| {
            let result = outcome(p.audio_uri());
            p.finish(result)
        })
        .collect()
}

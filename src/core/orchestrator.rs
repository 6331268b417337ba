//! Main orchestrator for a pipeline run.
//!
//! Lists the input files, drives each one through its state machine
//! (formatted upload) or hands them to bulk ingestion in batches (direct
//! ingestion), and folds the per-file reports into a run summary.

use std::sync::Arc;

use tokio::sync::Semaphore;
use tracing::{debug, error, info, instrument, warn};

use super::context::PipelineContext;
use super::formatter::ConversationFormatter;
use super::ingestion::{DirectIngestor, FormattedUploader, IngestionClient};
use super::lister::AudioLister;
use super::retry::with_retry;
use crate::adapters::CreateOutcome;
use crate::domain::{
    AudioReference, ConversationRecord, FileOutcome, FileProgress, FileReport, FileState,
    RedactionOutcome, RedactionResult, RunSummary, Transcript,
};
use crate::error::{PipelineError, Result};

/// Main pipeline orchestrator
pub struct Orchestrator {
    ctx: Arc<PipelineContext>,
    formatter: Arc<ConversationFormatter>,
    ingestion: IngestionClient,
}

impl Orchestrator {
    pub fn new(ctx: PipelineContext) -> Self {
        let formatter = ConversationFormatter::new(&ctx.settings.insights);
        let ingestion = IngestionClient::from_settings(&ctx.settings, ctx.services.insights.clone());

        Self {
            ctx: Arc::new(ctx),
            formatter: Arc::new(formatter),
            ingestion,
        }
    }

    pub fn context(&self) -> &PipelineContext {
        &self.ctx
    }

    /// Run the pipeline over at most `file_limit` files.
    ///
    /// Returns `Err` only for fatal errors (configuration, storage access),
    /// which happen before any file task starts. Per-file failures end up
    /// in the summary.
    #[instrument(skip(self), fields(run_id = %self.ctx.run_id, mode = %self.ingestion.mode()))]
    pub async fn run(&self, file_limit: Option<usize>) -> Result<RunSummary> {
        let storage = &self.ctx.settings.storage;
        info!(bucket = %storage.input_bucket, folder = %storage.input_folder, "Starting run");

        self.ctx
            .services
            .storage
            .check_bucket(&storage.input_bucket)
            .await?;

        let mut lister = AudioLister::new(self.ctx.services.storage.clone(), storage, file_limit)?;
        let files = lister.collect_all().await?;

        let mut summary = RunSummary::new(self.ctx.run_id, self.ingestion.mode());
        summary.discovered = files.len();
        info!(discovered = files.len(), "Listed input files");

        let reports = match &self.ingestion {
            IngestionClient::FormattedUpload(uploader) => {
                self.run_formatted(files, uploader.clone()).await
            }
            IngestionClient::DirectIngestion(ingestor) => self.run_direct(&files, ingestor).await,
        };

        for report in reports {
            summary.record(report);
        }
        summary.finish();

        if !summary.is_consistent() {
            error!(
                discovered = summary.discovered,
                accounted = summary.accounted(),
                "Run summary does not account for every file"
            );
        }

        info!(
            discovered = summary.discovered,
            succeeded = summary.succeeded,
            skipped_duplicate = summary.skipped_duplicate,
            failed = summary.failed,
            incomplete = summary.incomplete,
            success_rate = summary.success_rate(),
            "Run finished"
        );
        Ok(summary)
    }

    /// At most `max_concurrent_files` file tasks in flight
    async fn run_formatted(
        &self,
        files: Vec<AudioReference>,
        uploader: FormattedUploader,
    ) -> Vec<FileReport> {
        let limit = self.ctx.settings.processing.max_concurrent_files;
        let semaphore = Arc::new(Semaphore::new(limit));
        let mut handles = Vec::with_capacity(files.len());

        for audio in files {
            let uri = audio.uri();
            let ctx = self.ctx.clone();
            let formatter = self.formatter.clone();
            let uploader = uploader.clone();
            let semaphore = semaphore.clone();

            let handle = tokio::spawn(async move {
                let _permit = semaphore.acquire_owned().await;
                process_file(&ctx, &formatter, &uploader, audio).await
            });
            handles.push((uri, handle));
        }

        let mut reports = Vec::with_capacity(handles.len());
        for (uri, handle) in handles {
            match handle.await {
                Ok(report) => reports.push(report),
                Err(e) => {
                    error!(audio_uri = %uri, error = %e, "File task aborted");
                    reports.push(FileReport::failed(
                        uri,
                        FileState::Discovered,
                        format!("file task aborted: {}", e),
                    ));
                }
            }
        }
        reports
    }

    /// Batches of `batch_size`, one after another
    async fn run_direct(
        &self,
        files: &[AudioReference],
        ingestor: &DirectIngestor,
    ) -> Vec<FileReport> {
        let batch_size = self.ctx.settings.insights.batch_size;
        let mut reports = Vec::with_capacity(files.len());

        for (index, batch) in files.chunks(batch_size).enumerate() {
            info!(batch = index + 1, files = batch.len(), "Submitting ingestion batch");
            reports.extend(ingestor.ingest_batch(batch).await);
        }
        reports
    }
}

/// Drive one file through transcribe → redact → format → upload
#[instrument(skip_all, fields(audio_uri = %audio.uri()))]
async fn process_file(
    ctx: &PipelineContext,
    formatter: &ConversationFormatter,
    uploader: &FormattedUploader,
    audio: AudioReference,
) -> FileReport {
    let mut progress = FileProgress::new(&audio);
    match run_stages(ctx, formatter, uploader, &audio, &mut progress).await {
        Ok(outcome) => progress.finish(outcome),
        Err(e) => {
            let stage = progress.state();
            warn!(stage = ?stage, error = %e, "File failed");
            progress.finish(FileOutcome::Failed {
                stage,
                error: e.to_string(),
            })
        }
    }
}

async fn run_stages(
    ctx: &PipelineContext,
    formatter: &ConversationFormatter,
    uploader: &FormattedUploader,
    audio: &AudioReference,
    progress: &mut FileProgress,
) -> Result<FileOutcome> {
    let settings = &ctx.settings;
    let services = &ctx.services;
    let retry = &settings.processing.retry;

    progress.advance(FileState::Transcribing)?;
    let transcribed = with_retry(retry, "transcribe", |_| {
        services.speech.transcribe(audio, &settings.speech)
    })
    .await;
    progress.add_attempts(transcribed.attempts);
    let transcript = transcribed.result?;
    if transcript.is_empty() {
        progress.warn("transcript is empty");
    }

    progress.advance(FileState::Redacting)?;
    let (transcript, redaction) = redact(ctx, transcript, progress).await?;

    progress.advance(FileState::Formatting)?;
    let formatted = formatter.format(audio, &transcript, &redaction);
    for warning in formatted.warnings {
        progress.warn(warning);
    }
    let record = formatted.record;
    archive(ctx, audio, &record, progress).await;

    progress.advance(FileState::Uploading)?;
    let uploaded = uploader.upload(&record).await;
    progress.add_attempts(uploaded.attempts);

    Ok(match uploaded.result? {
        CreateOutcome::Created { name } => {
            debug!(conversation = %name, "Conversation created");
            FileOutcome::Succeeded {
                conversation: Some(name),
            }
        }
        CreateOutcome::AlreadyExists => {
            info!(conversation_id = %record.conversation_id, "Conversation already exists, skipping");
            FileOutcome::SkippedDuplicate
        }
    })
}

/// Redact the transcript, degrading to the original on failure unless
/// redaction is mandatory
async fn redact(
    ctx: &PipelineContext,
    transcript: Transcript,
    progress: &mut FileProgress,
) -> Result<(Transcript, RedactionOutcome)> {
    let settings = &ctx.settings;
    let Some(templates) = settings.redaction.templates() else {
        return Ok((transcript, RedactionOutcome::Disabled));
    };

    if transcript.is_empty() {
        return Ok((
            transcript,
            RedactionOutcome::Completed(RedactionResult::unchanged("")),
        ));
    }

    let text = transcript.text();
    let redacted = with_retry(&settings.processing.retry, "redact", |_| {
        ctx.services.redactor.redact(&text, &templates)
    })
    .await;
    progress.add_attempts(redacted.attempts);

    let applied = redacted
        .result
        .and_then(|result| Ok((transcript.with_redacted_text(&result)?, result)));

    match applied {
        Ok((redacted_transcript, result)) => {
            debug!(info_types = ?result.info_types, "Transcript redacted");
            Ok((redacted_transcript, RedactionOutcome::Completed(result)))
        }
        Err(e) if settings.redaction.mandatory => Err(e),
        Err(e) => {
            warn!(error = %e, "Redaction failed, continuing with unredacted transcript");
            progress.warn(format!("redaction skipped: {}", e));
            Ok((
                transcript,
                RedactionOutcome::Failed {
                    reason: e.to_string(),
                },
            ))
        }
    }
}

/// Copy the formatted record to the output bucket, if one is configured
async fn archive(
    ctx: &PipelineContext,
    audio: &AudioReference,
    record: &ConversationRecord,
    progress: &mut FileProgress,
) {
    let storage = &ctx.settings.storage;
    let Some(bucket) = &storage.output_bucket else {
        return;
    };
    let object = format!("{}processed_{}.json", storage.output_folder, audio.stem());

    let result = match serde_json::to_value(record) {
        Ok(body) => ctx.services.storage.upload_json(bucket, &object, &body).await,
        Err(e) => Err(PipelineError::storage(bucket.as_str(), e.to_string())),
    };

    if let Err(e) = result {
        warn!(bucket = %bucket, object = %object, error = %e, "Could not archive formatted record");
        progress.warn(format!("archive to gs://{}/{} failed: {}", bucket, object, e));
    }
}

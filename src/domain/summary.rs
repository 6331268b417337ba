//! End-of-run summary.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::file::{FileOutcome, FileReport, FileState};

/// How audio reaches the analytics service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IngestionMode {
    /// Transcribe and redact locally, then create formatted conversations
    #[default]
    FormattedUpload,

    /// Hand raw audio URIs to the bulk ingestion endpoint
    DirectIngestion,
}

impl fmt::Display for IngestionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::FormattedUpload => write!(f, "formatted_upload"),
            Self::DirectIngestion => write!(f, "direct_ingestion"),
        }
    }
}

/// A failed file, as listed in the summary
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileError {
    pub audio_uri: String,
    pub stage: FileState,
    pub error: String,
}

/// Aggregated outcome of one run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub mode: IngestionMode,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,

    /// Files that entered the run (after the file limit)
    pub discovered: usize,
    pub succeeded: usize,
    pub skipped_duplicate: usize,
    pub failed: usize,
    pub incomplete: usize,

    pub errors: Vec<FileError>,
    pub warnings: usize,
    pub files: Vec<FileReport>,
}

impl RunSummary {
    pub fn new(run_id: Uuid, mode: IngestionMode) -> Self {
        Self {
            run_id,
            mode,
            started_at: Utc::now(),
            finished_at: None,
            discovered: 0,
            succeeded: 0,
            skipped_duplicate: 0,
            failed: 0,
            incomplete: 0,
            errors: Vec::new(),
            warnings: 0,
            files: Vec::new(),
        }
    }

    /// Add one file's terminal outcome
    pub fn record(&mut self, report: FileReport) {
        match &report.outcome {
            FileOutcome::Succeeded { .. } => self.succeeded += 1,
            FileOutcome::SkippedDuplicate => self.skipped_duplicate += 1,
            FileOutcome::Failed { stage, error } => {
                self.failed += 1;
                self.errors.push(FileError {
                    audio_uri: report.audio_uri.clone(),
                    stage: *stage,
                    error: error.clone(),
                });
            }
            FileOutcome::Incomplete { .. } => self.incomplete += 1,
        }
        self.warnings += report.warnings.len();
        self.files.push(report);
    }

    pub fn finish(&mut self) {
        self.finished_at = Some(Utc::now());
    }

    /// Number of files with a recorded terminal outcome
    pub fn accounted(&self) -> usize {
        self.succeeded + self.skipped_duplicate + self.failed + self.incomplete
    }

    /// Every discovered file reached exactly one terminal outcome
    pub fn is_consistent(&self) -> bool {
        self.accounted() == self.discovered && self.files.len() == self.discovered
    }

    /// Percentage of discovered files that succeeded or were skipped as
    /// duplicates, rounded to two decimals
    pub fn success_rate(&self) -> f64 {
        if self.discovered == 0 {
            return 0.0;
        }
        let ok = (self.succeeded + self.skipped_duplicate) as f64;
        (ok / self.discovered as f64 * 10_000.0).round() / 100.0
    }

    pub fn duration_seconds(&self) -> Option<f64> {
        self.finished_at
            .map(|end| (end - self.started_at).num_milliseconds() as f64 / 1000.0)
    }

    /// Process exit status: 1 if any file failed, 2 if some are still
    /// being ingested remotely, 0 otherwise
    pub fn exit_code(&self) -> u8 {
        if self.failed > 0 {
            1
        } else if self.incomplete > 0 {
            2
        } else {
            0
        }
    }
}

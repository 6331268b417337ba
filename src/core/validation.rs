//! Validate-only mode: connectivity and permission checks without
//! processing any file.
//!
//! The input bucket is checked first; if it is unreachable nothing else
//! runs (in particular, nothing is listed).

use serde::Serialize;
use tracing::{info, warn};

use super::context::PipelineContext;
use super::lister::AudioLister;
use crate::domain::IngestionMode;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckStatus {
    Passed,
    Warning,
    Failed,
}

#[derive(Debug, Clone, Serialize)]
pub struct Check {
    pub name: String,
    pub status: CheckStatus,
    pub detail: String,
}

/// Results of a validation pass
#[derive(Debug, Clone, Default, Serialize)]
pub struct ValidationReport {
    pub checks: Vec<Check>,
    /// Checks stopped early after a fatal failure
    pub aborted: bool,
}

impl ValidationReport {
    fn push(&mut self, name: &str, status: CheckStatus, detail: impl Into<String>) {
        let detail = detail.into();
        match status {
            CheckStatus::Failed => warn!(check = name, %detail, "Validation check failed"),
            _ => info!(check = name, status = ?status, %detail, "Validation check"),
        }
        self.checks.push(Check {
            name: name.to_string(),
            status,
            detail,
        });
    }

    fn result(&mut self, name: &str, result: crate::error::Result<()>, ok: impl Into<String>) {
        match result {
            Ok(()) => self.push(name, CheckStatus::Passed, ok),
            Err(e) => self.push(name, CheckStatus::Failed, e.to_string()),
        }
    }

    pub fn is_ok(&self) -> bool {
        !self.aborted && self.checks.iter().all(|c| c.status != CheckStatus::Failed)
    }

    pub fn failures(&self) -> impl Iterator<Item = &Check> {
        self.checks.iter().filter(|c| c.status == CheckStatus::Failed)
    }
}

/// Run every check that applies to the configured mode
pub async fn validate(ctx: &PipelineContext) -> ValidationReport {
    let settings = &ctx.settings;
    let services = &ctx.services;
    let storage = &settings.storage;
    let mut report = ValidationReport::default();

    report.push(
        "configuration",
        CheckStatus::Passed,
        match &settings.source {
            Some(path) => format!("loaded {}", path.display()),
            None => "loaded".to_string(),
        },
    );

    if let Err(e) = services.storage.check_bucket(&storage.input_bucket).await {
        report.push("input_bucket", CheckStatus::Failed, e.to_string());
        report.aborted = true;
        return report;
    }
    report.push(
        "input_bucket",
        CheckStatus::Passed,
        format!("gs://{} is accessible", storage.input_bucket),
    );

    match AudioLister::new(services.storage.clone(), storage, Some(1)) {
        Ok(mut lister) => match lister.next().await {
            Ok(Some(audio)) => report.push(
                "input_files",
                CheckStatus::Passed,
                format!("found matching files (e.g. {})", audio.uri()),
            ),
            Ok(None) => report.push(
                "input_files",
                CheckStatus::Warning,
                format!(
                    "no files under gs://{}/{} match prefix '{}'",
                    storage.input_bucket, storage.input_folder, storage.file_prefix_filter
                ),
            ),
            Err(e) => report.push("input_files", CheckStatus::Failed, e.to_string()),
        },
        Err(e) => report.push("input_files", CheckStatus::Failed, e.to_string()),
    }

    if let Some(bucket) = &storage.output_bucket {
        report.result(
            "output_bucket",
            services.storage.check_bucket(bucket).await,
            format!("gs://{} is accessible", bucket),
        );
    }

    match settings.insights.mode {
        IngestionMode::FormattedUpload => match settings.redaction.templates() {
            Some(templates) => report.result(
                "dlp_templates",
                services.redactor.check_templates(&templates).await,
                "inspect and de-identify templates found",
            ),
            None => report.push("dlp_templates", CheckStatus::Warning, "redaction disabled"),
        },
        IngestionMode::DirectIngestion => report.result(
            "recognizer",
            services
                .speech
                .check_recognizer(&settings.insights.recognizer)
                .await,
            format!("{} found", settings.insights.recognizer),
        ),
    }

    let parent = settings.insights.parent(&settings.project_id);
    report.result(
        "insights",
        services.insights.check_access(&parent).await,
        format!("{} is accessible", parent),
    );

    report
}

//! Command-line interface for stt-insights.
//!
//! Provides commands for running the pipeline, validating connectivity
//! and permissions, and printing the resolved configuration.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use crate::config::{self, Settings, CONFIG_ENV};
use crate::core::{validate, CheckStatus, Orchestrator, PipelineContext, Services, ValidationReport};
use crate::domain::{FileOutcome, RunSummary};

/// stt-insights - Speech-to-Text to Contact Center AI Insights pipeline
#[derive(Parser, Debug)]
#[command(name = "stt-insights")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to the YAML config file
    #[arg(short, long, global = true, env = CONFIG_ENV)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Process audio files from the input bucket
    Run {
        /// Process at most this many files (for dry runs)
        #[arg(short = 'n', long, env = "STT_INSIGHTS_FILE_LIMIT")]
        file_limit: Option<usize>,

        /// Only run connectivity and permission checks
        #[arg(long)]
        validate_only: bool,

        /// Print the summary as JSON
        #[arg(long)]
        json: bool,
    },

    /// Check connectivity and permissions without processing files
    Validate {
        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show resolved configuration (debug)
    Config,
}

impl Cli {
    /// Execute the CLI command
    pub async fn execute(self) -> Result<ExitCode> {
        let settings = config::load(self.config.as_deref())?;

        match self.command {
            Commands::Run {
                file_limit,
                validate_only,
                json,
            } => {
                if validate_only {
                    run_validation(settings, json).await
                } else {
                    run_pipeline(settings, file_limit, json).await
                }
            }
            Commands::Validate { json } => run_validation(settings, json).await,
            Commands::Config => show_config(&settings),
        }
    }
}

async fn connect(settings: Settings) -> Result<PipelineContext> {
    let services = Services::connect()
        .await
        .context("Failed to obtain Google Cloud credentials")?;
    Ok(PipelineContext::new(settings, services))
}

async fn run_pipeline(settings: Settings, file_limit: Option<usize>, json: bool) -> Result<ExitCode> {
    let ctx = connect(settings).await?;
    let orchestrator = Orchestrator::new(ctx);

    let summary = orchestrator.run(file_limit).await.context("Run aborted")?;

    if json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        print_summary(&summary);
    }

    Ok(ExitCode::from(summary.exit_code()))
}

async fn run_validation(settings: Settings, json: bool) -> Result<ExitCode> {
    let ctx = connect(settings).await?;
    let report = validate(&ctx).await;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_validation(&report);
    }

    Ok(if report.is_ok() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

/// Show the resolved configuration (for debugging)
fn show_config(settings: &Settings) -> Result<ExitCode> {
    let source = settings
        .source
        .as_ref()
        .map(|p| p.display().to_string())
        .unwrap_or_else(|| "(none)".to_string());

    println!("# Config file: {}", source);
    print!(
        "{}",
        serde_yaml::to_string(settings).context("Failed to render configuration")?
    );
    Ok(ExitCode::SUCCESS)
}

fn print_summary(summary: &RunSummary) {
    println!();
    println!("Run {} ({})", summary.run_id, summary.mode);
    println!("{}", "-".repeat(60));
    println!("  {:<20} {:>8}", "Discovered", summary.discovered);
    println!("  {:<20} {:>8}", "Succeeded", summary.succeeded);
    println!("  {:<20} {:>8}", "Skipped (duplicate)", summary.skipped_duplicate);
    println!("  {:<20} {:>8}", "Failed", summary.failed);
    println!("  {:<20} {:>8}", "Incomplete", summary.incomplete);
    println!("  {:<20} {:>7.2}%", "Success rate", summary.success_rate());
    if let Some(seconds) = summary.duration_seconds() {
        println!("  {:<20} {:>7.1}s", "Duration", seconds);
    }
    if summary.warnings > 0 {
        println!("  {:<20} {:>8}", "Warnings", summary.warnings);
    }

    if !summary.errors.is_empty() {
        println!();
        println!("Failed files:");
        for err in &summary.errors {
            println!("  {} [{:?}]: {}", err.audio_uri, err.stage, err.error);
        }
    }

    let incomplete: Vec<_> = summary
        .files
        .iter()
        .filter_map(|f| match &f.outcome {
            FileOutcome::Incomplete { operation } => Some((f.audio_uri.as_str(), operation)),
            _ => None,
        })
        .collect();
    if !incomplete.is_empty() {
        println!();
        println!("Still ingesting (operation not finished when polling stopped):");
        for (uri, operation) in incomplete {
            println!("  {} ({})", uri, operation);
        }
    }
}

fn print_validation(report: &ValidationReport) {
    println!();
    println!("{:<16} {:<8} DETAIL", "CHECK", "STATUS");
    println!("{}", "-".repeat(72));
    for check in &report.checks {
        let status = match check.status {
            CheckStatus::Passed => "ok",
            CheckStatus::Warning => "warn",
            CheckStatus::Failed => "FAILED",
        };
        println!("{:<16} {:<8} {}", check.name, status, check.detail);
    }

    println!();
    if report.aborted {
        println!("Validation aborted: input bucket is not accessible");
    } else if report.is_ok() {
        println!("Validation passed");
    } else {
        println!("Validation failed ({} check(s))", report.failures().count());
    }
}

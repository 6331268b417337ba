//! Validation and Fatal Error Tests
//!
//! Validate-only checks, and runs that must stop before any file is
//! touched.

mod common;

use std::sync::atomic::Ordering;

use common::{merged_files, settings, Fakes, BUCKET};
use stt_insights::core::{validate, CheckStatus, Orchestrator};

#[tokio::test]
async fn test_validation_passes_when_everything_is_reachable() {
    let fakes = Fakes::new(merged_files(2));
    let ctx = fakes.context(settings(""));

    let report = validate(&ctx).await;

    assert!(report.is_ok());
    assert!(!report.aborted);
    let names: Vec<&str> = report.checks.iter().map(|c| c.name.as_str()).collect();
    assert_eq!(
        names,
        vec!["configuration", "input_bucket", "input_files", "dlp_templates", "insights"]
    );

    // Validation never processes files
    assert_eq!(fakes.speech.calls.load(Ordering::SeqCst), 0);
    assert_eq!(fakes.insights.create_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_denied_input_bucket_aborts_before_listing() {
    let fakes = Fakes::new(merged_files(2));
    fakes.storage.deny(BUCKET);
    let ctx = fakes.context(settings(""));

    let report = validate(&ctx).await;

    assert!(report.aborted);
    assert!(!report.is_ok());
    assert_eq!(fakes.storage.list_calls.load(Ordering::SeqCst), 0);

    let failed: Vec<_> = report.failures().collect();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].name, "input_bucket");
}

#[tokio::test]
async fn test_empty_input_is_a_warning() {
    let fakes = Fakes::new(vec!["notes.txt".to_string(), "other_call.wav".to_string()]);
    let report = validate(&fakes.context(settings(""))).await;

    let files = report
        .checks
        .iter()
        .find(|c| c.name == "input_files")
        .unwrap();
    assert_eq!(files.status, CheckStatus::Warning);
    assert!(report.is_ok());
}

#[tokio::test]
async fn test_insights_access_failure_is_reported() {
    let fakes = Fakes::new(merged_files(1));
    *fakes.insights.access_denied.lock().unwrap() = true;

    let report = validate(&fakes.context(settings(""))).await;

    assert!(!report.is_ok());
    assert!(!report.aborted);
    assert_eq!(report.failures().next().unwrap().name, "insights");
}

#[tokio::test]
async fn test_direct_mode_checks_recognizer_instead_of_templates() {
    let fakes = Fakes::new(merged_files(1));
    let report = validate(&fakes.context(settings("ccai:\n  mode: direct_ingestion\n"))).await;

    assert!(report.is_ok());
    assert!(report.checks.iter().any(|c| c.name == "recognizer"));
    assert!(!report.checks.iter().any(|c| c.name == "dlp_templates"));
}

#[tokio::test]
async fn test_run_with_denied_bucket_is_fatal() {
    let fakes = Fakes::new(merged_files(3));
    fakes.storage.deny(BUCKET);

    let err = Orchestrator::new(fakes.context(settings("")))
        .run(None)
        .await
        .unwrap_err();

    assert!(err.is_fatal());
    assert!(err.to_string().contains(BUCKET));
    assert_eq!(fakes.storage.list_calls.load(Ordering::SeqCst), 0);
    assert_eq!(fakes.speech.calls.load(Ordering::SeqCst), 0);
}

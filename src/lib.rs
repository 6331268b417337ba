//! stt-insights - audio to Contact Center AI Insights pipeline
//!
//! Discovers call recordings in a Cloud Storage bucket and gets them into
//! CCAI Insights in one of two modes:
//!
//! - **Formatted upload**: transcribe with Speech-to-Text, optionally
//!   redact PII with Cloud DLP, format a conversation record and create it
//! - **Direct ingestion**: hand batches of audio URIs to the bulk
//!   ingestion endpoint and poll the long-running operation
//!
//! Every file ends in exactly one terminal outcome (succeeded, skipped as
//! duplicate, failed, or incomplete) recorded in the run summary.
//!
//! # Modules
//!
//! - `adapters`: Google Cloud REST clients behind service traits
//! - `core`: Lister, formatter, ingestion client, orchestrator, validation
//! - `domain`: Data structures (AudioReference, Transcript, RunSummary)
//! - `config`: YAML configuration and validation
//! - `cli`: Command-line interface
//!
//! # Usage
//!
//! ```bash
//! # Check buckets, templates and API access
//! stt-insights validate
//!
//! # Process the first 10 matching files
//! stt-insights run --file-limit 10
//! ```

pub mod adapters;
pub mod cli;
pub mod config;
pub mod core;
pub mod domain;
pub mod error;

// Re-export main types at crate root for convenience
pub use config::Settings;
pub use core::{Orchestrator, PipelineContext, Services};
pub use domain::{AudioReference, FileOutcome, RunSummary};
pub use error::PipelineError;

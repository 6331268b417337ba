//! Core orchestration logic.
//!
//! This module contains:
//! - Retry / Poll: retry policy and bounded operation polling
//! - AudioLister: filtered, paged discovery of input files
//! - ConversationFormatter: transcript → conversation record
//! - IngestionClient: formatted upload or direct bulk ingestion
//! - Orchestrator: per-file state machine and run summary
//! - Validation: validate-only connectivity checks

pub mod context;
pub mod formatter;
pub mod ingestion;
pub mod lister;
pub mod orchestrator;
pub mod poll;
pub mod retry;
pub mod validation;

// Re-export commonly used types
pub use context::{PipelineContext, Services};
pub use formatter::{ConversationFormatter, FormattedConversation};
pub use ingestion::{DirectIngestor, FormattedUploader, IngestionClient};
pub use lister::AudioLister;
pub use orchestrator::Orchestrator;
pub use poll::{poll_until, PollOutcome, PollSettings};
pub use retry::{with_retry, Attempted, RetryPolicy};
pub use validation::{validate, Check, CheckStatus, ValidationReport};

//! Output of the PII redaction stage.

use serde::{Deserialize, Serialize};

/// A single PII finding reported by the inspection call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Finding {
    /// Info type name, e.g. PHONE_NUMBER
    pub info_type: String,

    /// Likelihood bucket, e.g. LIKELY
    pub likelihood: String,

    /// Matched text (only when the inspect template includes quotes)
    pub quote: Option<String>,
}

/// Redacted transcript text plus what was found
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RedactionResult {
    /// Text after de-identification
    pub text: String,

    /// Individual findings
    pub findings: Vec<Finding>,

    /// Distinct info types, sorted
    pub info_types: Vec<String>,

    /// Whether the text differs from the input
    pub applied: bool,
}

impl RedactionResult {
    /// Build a result from the original text, the redacted text and findings
    pub fn new(original: &str, text: String, findings: Vec<Finding>) -> Self {
        let mut info_types: Vec<String> = findings.iter().map(|f| f.info_type.clone()).collect();
        info_types.sort();
        info_types.dedup();

        Self {
            applied: text != original,
            text,
            findings,
            info_types,
        }
    }

    /// A pass-through result for text with nothing to redact
    pub fn unchanged(original: &str) -> Self {
        Self::new(original, original.to_string(), Vec::new())
    }
}

/// Fully-qualified DLP template names used for a redaction call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedactionTemplates {
    /// Resource name of the inspect template
    pub inspect: String,

    /// Resource name of the de-identify template
    pub deidentify: String,
}

/// What the redaction stage did for one file
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RedactionOutcome {
    /// No templates configured
    Disabled,

    /// Redaction failed and the file continued unredacted
    Failed { reason: String },

    /// Redaction ran
    Completed(RedactionResult),
}

impl RedactionOutcome {
    /// Label value recorded on the conversation
    pub fn label(&self) -> &'static str {
        match self {
            Self::Disabled => "disabled",
            Self::Failed { .. } => "failed",
            Self::Completed(result) if result.applied => "applied",
            Self::Completed(_) => "clean",
        }
    }

    pub fn result(&self) -> Option<&RedactionResult> {
        match self {
            Self::Completed(result) => Some(result),
            _ => None,
        }
    }
}

//! Transcripts produced by the speech recognition stage.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, Result};

use super::redaction::RedactionResult;

/// A recognised word with timing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WordInfo {
    pub word: String,

    /// Offset from the start of the audio
    pub start: Duration,

    /// Offset from the start of the audio
    pub end: Duration,

    pub confidence: f32,

    /// Diarization speaker label (if enabled)
    pub speaker_tag: Option<u32>,
}

/// A contiguous piece of speech from one channel (or speaker)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Utterance {
    /// Audio channel the speech was recognised on (1-based)
    pub channel_tag: u32,

    /// Diarization speaker label (if enabled)
    pub speaker_tag: Option<u32>,

    pub text: String,

    /// Offset from the start of the audio
    pub start: Duration,

    /// Offset from the start of the audio
    pub end: Duration,

    pub confidence: f32,

    /// Word-level detail; empty when the text was redacted
    pub words: Vec<WordInfo>,
}

/// Ordered utterances for one audio object
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transcript {
    /// gs:// URI of the transcribed audio
    pub audio_uri: String,

    /// BCP-47 language code used for recognition
    pub language_code: String,

    pub utterances: Vec<Utterance>,
}

impl Transcript {
    pub fn new(audio_uri: impl Into<String>, language_code: impl Into<String>) -> Self {
        Self {
            audio_uri: audio_uri.into(),
            language_code: language_code.into(),
            utterances: Vec::new(),
        }
    }

    /// Full text, one utterance per line
    pub fn text(&self) -> String {
        self.utterances
            .iter()
            .map(|u| u.text.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn is_empty(&self) -> bool {
        self.utterances.iter().all(|u| u.text.trim().is_empty())
    }

    /// Latest end offset across utterances
    pub fn duration(&self) -> Duration {
        self.utterances
            .iter()
            .map(|u| u.end)
            .max()
            .unwrap_or_default()
    }

    pub fn word_count(&self) -> usize {
        self.utterances
            .iter()
            .map(|u| {
                if u.words.is_empty() {
                    u.text.split_whitespace().count()
                } else {
                    u.words.len()
                }
            })
            .sum()
    }

    /// Mean utterance confidence (0.0 when empty)
    pub fn average_confidence(&self) -> f32 {
        if self.utterances.is_empty() {
            return 0.0;
        }
        let total: f32 = self.utterances.iter().map(|u| u.confidence).sum();
        total / self.utterances.len() as f32
    }

    /// Apply redacted text (as produced from [`Transcript::text`]) line by line.
    ///
    /// Utterances whose text changed drop their word-level detail.
    pub fn with_redacted_text(&self, redaction: &RedactionResult) -> Result<Transcript> {
        let lines: Vec<&str> = redaction.text.split('\n').collect();
        if lines.len() != self.utterances.len() {
            return Err(PipelineError::redaction(format!(
                "redacted text has {} lines, transcript has {} utterances",
                lines.len(),
                self.utterances.len()
            )));
        }

        let utterances = self
            .utterances
            .iter()
            .zip(lines)
            .map(|(utterance, line)| {
                if utterance.text == line {
                    utterance.clone()
                } else {
                    Utterance {
                        text: line.to_string(),
                        words: Vec::new(),
                        ..utterance.clone()
                    }
                }
            })
            .collect();

        Ok(Transcript {
            audio_uri: self.audio_uri.clone(),
            language_code: self.language_code.clone(),
            utterances,
        })
    }
}

//! Conversation formatter.
//!
//! Maps a transcript plus run metadata onto the Insights conversation
//! schema. Output depends only on its inputs: no clocks, no random ids.

use std::collections::BTreeMap;

use tracing::warn;

use crate::config::{InsightsSettings, RoleSource};
use crate::domain::{
    AudioReference, ConversationRecord, ConversationTranscript, DataSource, Medium,
    ParticipantRole, RedactionOutcome, SegmentParticipant, SegmentWord, Transcript,
    TranscriptSegment, Utterance,
};

/// A formatted record plus anything worth surfacing in the file report
#[derive(Debug, Clone)]
pub struct FormattedConversation {
    pub record: ConversationRecord,
    pub warnings: Vec<String>,
}

/// Builds conversation records from transcripts
#[derive(Debug, Clone)]
pub struct ConversationFormatter {
    settings: InsightsSettings,
}

impl ConversationFormatter {
    pub fn new(settings: &InsightsSettings) -> Self {
        Self {
            settings: settings.clone(),
        }
    }

    /// Full record with transcript segments (formatted-upload mode)
    pub fn format(
        &self,
        audio: &AudioReference,
        transcript: &Transcript,
        redaction: &RedactionOutcome,
    ) -> FormattedConversation {
        let mut ordered: Vec<&Utterance> = transcript
            .utterances
            .iter()
            .filter(|u| !u.text.trim().is_empty())
            .collect();
        ordered.sort_by(|a, b| a.start.cmp(&b.start).then(a.channel_tag.cmp(&b.channel_tag)));

        let segments = ordered
            .into_iter()
            .map(|u| self.segment(audio, &transcript.language_code, u))
            .collect();

        let mut required = self.base_labels(audio);
        required.insert("redaction".to_string(), redaction.label().to_string());
        if let Some(result) = redaction.result().filter(|r| !r.info_types.is_empty()) {
            required.insert(
                "pii_info_types".to_string(),
                result.info_types.join(",").to_lowercase(),
            );
        }
        required.insert("word_count".to_string(), transcript.word_count().to_string());
        required.insert(
            "duration_seconds".to_string(),
            format!("{:.1}", transcript.duration().as_secs_f64()),
        );
        required.insert(
            "average_confidence".to_string(),
            format!("{:.2}", transcript.average_confidence()),
        );

        let (labels, warnings) = merge_labels(&self.settings.labels, required);

        let mut record = self.record(audio, labels);
        record.transcript = Some(ConversationTranscript {
            transcript_segments: segments,
        });

        FormattedConversation { record, warnings }
    }

    /// Audio-only record for bulk ingestion; the service transcribes it
    pub fn audio_only(&self, audio: &AudioReference) -> ConversationRecord {
        let (labels, warnings) = merge_labels(&self.settings.labels, self.base_labels(audio));
        for warning in warnings {
            warn!(audio_uri = %audio.uri(), "{}", warning);
        }
        self.record(audio, labels)
    }

    /// Participant role for an utterance under the configured channel mapping
    pub fn role_for(&self, utterance: &Utterance) -> ParticipantRole {
        let key = match self.settings.role_source {
            RoleSource::Channel => Some(utterance.channel_tag),
            RoleSource::Speaker => utterance.speaker_tag,
        };

        match key {
            Some(k) if k == self.settings.channels.customer_channel => ParticipantRole::EndUser,
            Some(k) if k == self.settings.channels.agent_channel => ParticipantRole::HumanAgent,
            _ => ParticipantRole::RoleUnspecified,
        }
    }

    fn record(&self, audio: &AudioReference, labels: BTreeMap<String, String>) -> ConversationRecord {
        ConversationRecord {
            conversation_id: audio.conversation_id(),
            medium: Medium::PhoneCall,
            language_code: self.settings.language_code.clone(),
            ttl: self.settings.ttl,
            call_metadata: self.settings.channels,
            agent_id: self.settings.agent_id.clone(),
            data_source: DataSource::audio(audio.uri()),
            transcript: None,
            labels,
        }
    }

    fn segment(
        &self,
        audio: &AudioReference,
        language_code: &str,
        utterance: &Utterance,
    ) -> TranscriptSegment {
        let message_time = audio.created.and_then(|created| {
            chrono::Duration::from_std(utterance.start)
                .ok()
                .map(|offset| created + offset)
        });

        TranscriptSegment {
            text: utterance.text.trim().to_string(),
            confidence: utterance.confidence,
            words: utterance
                .words
                .iter()
                .map(|w| SegmentWord {
                    word: w.word.clone(),
                    start_offset: w.start,
                    end_offset: w.end,
                    confidence: w.confidence,
                })
                .collect(),
            language_code: language_code.to_string(),
            channel_tag: utterance.channel_tag,
            segment_participant: SegmentParticipant {
                role: self.role_for(utterance),
            },
            message_time,
            start_offset: utterance.start,
        }
    }

    fn base_labels(&self, audio: &AudioReference) -> BTreeMap<String, String> {
        let mut labels = BTreeMap::new();
        labels.insert("source_uri".to_string(), audio.uri());
        if let Some(customer) = &self.settings.customer_id {
            labels.insert("customer_id".to_string(), customer.clone());
        }
        labels
    }
}

/// Configured labels first, then required keys on top
fn merge_labels(
    configured: &BTreeMap<String, String>,
    required: BTreeMap<String, String>,
) -> (BTreeMap<String, String>, Vec<String>) {
    let mut labels = configured.clone();
    let mut warnings = Vec::new();

    for (key, value) in required {
        if let Some(previous) = labels.insert(key.clone(), value) {
            warnings.push(format!(
                "configured label '{}={}' replaced by required value",
                key, previous
            ));
        }
    }

    (labels, warnings)
}

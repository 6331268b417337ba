//! Contact Center AI Insights conversation schema (v1 REST JSON).

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A conversation record ready to be created in Insights
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationRecord {
    /// Client-chosen id, sent as a query parameter rather than in the body
    #[serde(skip)]
    pub conversation_id: String,

    pub medium: Medium,

    pub language_code: String,

    #[serde(with = "crate::domain::duration")]
    pub ttl: Duration,

    pub call_metadata: CallMetadata,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,

    pub data_source: DataSource,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub transcript: Option<ConversationTranscript>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Medium {
    PhoneCall,
    Chat,
}

/// Which audio channel belongs to which participant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallMetadata {
    pub customer_channel: u32,
    pub agent_channel: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataSource {
    pub gcs_source: GcsSource,
}

impl DataSource {
    pub fn audio(uri: impl Into<String>) -> Self {
        Self {
            gcs_source: GcsSource {
                audio_uri: uri.into(),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GcsSource {
    pub audio_uri: String,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationTranscript {
    pub transcript_segments: Vec<TranscriptSegment>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TranscriptSegment {
    pub text: String,

    pub confidence: f32,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub words: Vec<SegmentWord>,

    pub language_code: String,

    pub channel_tag: u32,

    pub segment_participant: SegmentParticipant,

    /// Wall-clock time of the segment start, when the recording time is known
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_time: Option<DateTime<Utc>>,

    /// Offset of the segment start from the beginning of the audio
    #[serde(skip)]
    pub start_offset: Duration,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SegmentWord {
    pub word: String,

    #[serde(with = "crate::domain::duration")]
    pub start_offset: Duration,

    #[serde(with = "crate::domain::duration")]
    pub end_offset: Duration,

    pub confidence: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SegmentParticipant {
    pub role: ParticipantRole,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ParticipantRole {
    RoleUnspecified,
    HumanAgent,
    EndUser,
}

impl ParticipantRole {
    /// Label used in logs and summaries
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RoleUnspecified => "unspecified",
            Self::HumanAgent => "agent",
            Self::EndUser => "customer",
        }
    }
}

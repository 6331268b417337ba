//! Contact Center AI Insights v1 adapter.
//!
//! Create conversation: `POST {parent}/conversations?conversationId=`
//! (409 means a conversation with that id already exists).
//! Bulk ingestion: `POST {parent}/conversations:ingest`, then
//! `GET {operation}` until done. Per-file results are read from the
//! operation metadata lists `processedConversations`,
//! `duplicateConversations` and `failedConversations`.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::{ApiError, CreateOutcome, GcpClient, IngestRequest, InsightsService};
use crate::domain::{
    ConversationRecord, EntryStatus, IngestEntry, IngestionOperation, OperationStatus,
};
use crate::error::{PipelineError, Result};

const INSIGHTS_API: &str = "https://contactcenterinsights.googleapis.com/v1";

/// Insights client
pub struct InsightsClient {
    client: GcpClient,
    endpoint: String,
}

impl InsightsClient {
    pub fn new(client: GcpClient) -> Self {
        Self::with_endpoint(client, INSIGHTS_API)
    }

    /// `endpoint` is the versioned API root
    pub fn with_endpoint(client: GcpClient, endpoint: impl Into<String>) -> Self {
        Self {
            client,
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
        }
    }

    fn url(&self, resource: &str, suffix: &str) -> String {
        format!("{}/{}{}", self.endpoint, resource, suffix)
    }
}

fn ingestion_error(call: &str, err: ApiError) -> PipelineError {
    PipelineError::ingestion(format!("{}: {}", call, err))
}

#[async_trait]
impl InsightsService for InsightsClient {
    async fn create_conversation(
        &self,
        parent: &str,
        record: &ConversationRecord,
    ) -> Result<CreateOutcome> {
        let url = self.url(parent, "/conversations");
        let query = [("conversationId", record.conversation_id.as_str())];

        match self
            .client
            .post::<_, CreatedConversation>(&url, &query, record)
            .await
        {
            Ok(created) => Ok(CreateOutcome::Created { name: created.name }),
            Err(e) if e.is_conflict() => {
                debug!(conversation_id = %record.conversation_id, "Conversation already exists");
                Ok(CreateOutcome::AlreadyExists)
            }
            Err(e) => Err(ingestion_error("create conversation", e)),
        }
    }

    async fn ingest_conversations(&self, request: &IngestRequest) -> Result<IngestionOperation> {
        let url = self.url(&request.parent, "/conversations:ingest");
        let body = IngestBody::from(request);

        let raw: RawOperation = self
            .client
            .post(&url, &[], &body)
            .await
            .map_err(|e| ingestion_error("ingest conversations", e))?;

        info!(
            operation = %raw.name,
            conversations = request.conversations.len(),
            "Ingestion operation submitted"
        );
        Ok(raw.into_operation())
    }

    async fn get_operation(&self, name: &str) -> Result<IngestionOperation> {
        let raw: RawOperation = self
            .client
            .get(&self.url(name, ""), &[])
            .await
            .map_err(|e| ingestion_error("get operation", e))?;
        Ok(raw.into_operation())
    }

    async fn check_access(&self, parent: &str) -> Result<()> {
        let _: serde_json::Value = self
            .client
            .get(&self.url(parent, "/conversations"), &[("pageSize", "1")])
            .await
            .map_err(|e| ingestion_error("list conversations", e))?;
        Ok(())
    }
}

// ============================================================================
// Wire types
// ============================================================================

#[derive(Debug, Deserialize)]
struct CreatedConversation {
    #[serde(default)]
    name: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct IngestBody<'a> {
    conversations: &'a [ConversationRecord],
    conversation_config: ConversationConfig<'a>,
    speech_config: SpeechConfig<'a>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ConversationConfig<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    agent_id: Option<&'a str>,
    agent_channel: u32,
    customer_channel: u32,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SpeechConfig<'a> {
    speech_recognizer: &'a str,
}

impl<'a> From<&'a IngestRequest> for IngestBody<'a> {
    fn from(request: &'a IngestRequest) -> Self {
        Self {
            conversations: &request.conversations,
            conversation_config: ConversationConfig {
                agent_id: request.agent_id.as_deref(),
                agent_channel: request.channels.agent_channel,
                customer_channel: request.channels.customer_channel,
            },
            speech_config: SpeechConfig {
                speech_recognizer: &request.recognizer,
            },
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawOperation {
    name: String,
    #[serde(default)]
    done: bool,
    error: Option<OperationStatus>,
    #[serde(default)]
    metadata: IngestMetadata,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IngestMetadata {
    #[serde(default)]
    processed_conversations: Vec<ConversationResult>,
    #[serde(default)]
    duplicate_conversations: Vec<ConversationResult>,
    #[serde(default)]
    failed_conversations: Vec<ConversationResult>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConversationResult {
    audio_uri: String,
    conversation: Option<String>,
    error: Option<String>,
}

impl RawOperation {
    fn into_operation(self) -> IngestionOperation {
        let metadata = self.metadata;
        let mut entries = Vec::new();

        entries.extend(metadata.processed_conversations.into_iter().map(|r| IngestEntry {
            audio_uri: r.audio_uri,
            status: EntryStatus::Ingested {
                conversation: r.conversation,
            },
        }));
        entries.extend(metadata.duplicate_conversations.into_iter().map(|r| IngestEntry {
            audio_uri: r.audio_uri,
            status: EntryStatus::Duplicate,
        }));
        entries.extend(metadata.failed_conversations.into_iter().map(|r| IngestEntry {
            audio_uri: r.audio_uri,
            status: EntryStatus::Failed {
                reason: r
                    .error
                    .unwrap_or_else(|| "ingestion failed without a reason".to_string()),
            },
        }));

        IngestionOperation {
            name: self.name,
            done: self.done,
            error: self.error,
            entries,
        }
    }
}

//! Adapter interfaces for external systems.
//!
//! Each cloud service sits behind a trait so the orchestrator can be driven
//! by in-memory fakes in tests. The production implementations talk to the
//! Google REST/JSON APIs through a shared [`GcpClient`].

pub mod auth;
pub mod dlp;
pub mod gcs;
pub mod insights;
pub mod speech;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::info;

use crate::config::SpeechSettings;
use crate::domain::{
    AudioReference, CallMetadata, ConversationRecord, IngestionOperation, RedactionResult,
    RedactionTemplates, Transcript,
};
use crate::error::Result;

pub use dlp::DlpRedactor;
pub use gcs::GcsStore;
pub use insights::InsightsClient;
pub use speech::SpeechClient;

/// One page of a bucket listing
#[derive(Debug, Clone, Default)]
pub struct ObjectPage {
    pub objects: Vec<AudioReference>,
    pub next_page_token: Option<String>,
}

/// Result of creating a conversation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CreateOutcome {
    /// New conversation resource name
    Created { name: String },

    /// A conversation with the same id already exists
    AlreadyExists,
}

/// Bulk ingestion request for a batch of audio files
#[derive(Debug, Clone)]
pub struct IngestRequest {
    /// projects/{p}/locations/{l}
    pub parent: String,

    /// One audio-only record per file
    pub conversations: Vec<ConversationRecord>,

    /// Full recognizer resource name
    pub recognizer: String,

    pub channels: CallMetadata,

    pub agent_id: Option<String>,
}

/// Object storage (listing, access checks, archive uploads)
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Fails with a storage access error if the bucket is missing or forbidden
    async fn check_bucket(&self, bucket: &str) -> Result<()>;

    async fn list_page(
        &self,
        bucket: &str,
        prefix: &str,
        page_token: Option<&str>,
    ) -> Result<ObjectPage>;

    async fn upload_json(&self, bucket: &str, object: &str, body: &serde_json::Value)
        -> Result<()>;
}

/// Speech-to-text
#[async_trait]
pub trait SpeechRecognizer: Send + Sync {
    async fn transcribe(
        &self,
        audio: &AudioReference,
        settings: &SpeechSettings,
    ) -> Result<Transcript>;

    /// Verify a pre-provisioned recognizer exists
    async fn check_recognizer(&self, recognizer: &str) -> Result<()>;
}

/// PII inspection and de-identification
#[async_trait]
pub trait PiiRedactor: Send + Sync {
    async fn redact(&self, text: &str, templates: &RedactionTemplates) -> Result<RedactionResult>;

    /// Verify both templates exist and are readable
    async fn check_templates(&self, templates: &RedactionTemplates) -> Result<()>;
}

/// Supplier of OAuth bearer tokens
#[async_trait]
pub trait TokenSource: Send + Sync {
    async fn token(&self) -> Result<String>;
}

/// Conversation analytics service
#[async_trait]
pub trait InsightsService: Send + Sync {
    async fn create_conversation(
        &self,
        parent: &str,
        record: &ConversationRecord,
    ) -> Result<CreateOutcome>;

    /// Submit a bulk ingestion and return the operation handle
    async fn ingest_conversations(&self, request: &IngestRequest) -> Result<IngestionOperation>;

    async fn get_operation(&self, name: &str) -> Result<IngestionOperation>;

    /// Cheap authenticated read against the location
    async fn check_access(&self, parent: &str) -> Result<()>;
}

// ============================================================================
// Shared HTTP plumbing
// ============================================================================

/// Failed Google API call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiError {
    /// HTTP status (None when the request never got a response)
    pub status: Option<u16>,
    pub message: String,
}

impl ApiError {
    fn transport(err: reqwest::Error) -> Self {
        Self {
            status: None,
            message: err.to_string(),
        }
    }

    /// Build from an error response, preferring the `error.message` field of
    /// the standard Google error envelope
    pub fn from_response(status: u16, body: &str) -> Self {
        #[derive(Deserialize)]
        struct Envelope {
            error: ErrorBody,
        }

        #[derive(Deserialize)]
        struct ErrorBody {
            #[serde(default)]
            message: String,
            #[serde(default)]
            status: Option<String>,
        }

        let message = match serde_json::from_str::<Envelope>(body) {
            Ok(env) => match env.error.status {
                Some(code) => format!("{}: {}", code, env.error.message),
                None => env.error.message,
            },
            Err(_) if body.trim().is_empty() => "empty response body".to_string(),
            Err(_) => body.trim().chars().take(500).collect(),
        };

        Self {
            status: Some(status),
            message,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.status == Some(404)
    }

    pub fn is_permission_denied(&self) -> bool {
        matches!(self.status, Some(401) | Some(403))
    }

    pub fn is_conflict(&self) -> bool {
        self.status == Some(409)
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.status {
            Some(status) => write!(f, "HTTP {}: {}", status, self.message),
            None => write!(f, "request failed: {}", self.message),
        }
    }
}

/// Authenticated JSON client shared by the Google adapters
///
/// Clones share the current token, so a refresh made by one adapter is
/// seen by all of them.
#[derive(Clone)]
pub struct GcpClient {
    http: reqwest::Client,
    token: Arc<RwLock<String>>,
    source: Option<Arc<dyn TokenSource>>,
}

impl GcpClient {
    /// Client with a fixed token that is never refreshed
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            token: Arc::new(RwLock::new(token.into())),
            source: None,
        }
    }

    /// Client that takes its first token from `source` and asks it for a
    /// new one when a call comes back 401 (tokens expire after an hour,
    /// long runs outlive them)
    pub async fn connect(source: Arc<dyn TokenSource>) -> Result<Self> {
        let token = source.token().await?;
        Ok(Self {
            http: reqwest::Client::new(),
            token: Arc::new(RwLock::new(token)),
            source: Some(source),
        })
    }

    pub async fn get<T: DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, &str)],
    ) -> std::result::Result<T, ApiError> {
        let request = self.http.get(url).query(query);
        self.send(request).await
    }

    pub async fn post<B, T>(
        &self,
        url: &str,
        query: &[(&str, &str)],
        body: &B,
    ) -> std::result::Result<T, ApiError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let request = self.http.post(url).query(query).json(body);
        self.send(request).await
    }

    /// POST a raw body with an explicit content type
    pub async fn post_bytes(
        &self,
        url: &str,
        query: &[(&str, &str)],
        content_type: &str,
        body: Vec<u8>,
    ) -> std::result::Result<serde_json::Value, ApiError> {
        let request = self
            .http
            .post(url)
            .query(query)
            .header("Content-Type", content_type)
            .body(body);
        self.send(request).await
    }

    async fn send<T: DeserializeOwned>(
        &self,
        request: reqwest::RequestBuilder,
    ) -> std::result::Result<T, ApiError> {
        // Only buffered bodies can be replayed; all of ours are
        let replay = match self.source {
            Some(_) => request.try_clone(),
            None => None,
        };

        let (mut status, mut text) = self.execute(request).await?;
        if status == StatusCode::UNAUTHORIZED {
            if let Some(request) = replay {
                self.refresh_token().await?;
                (status, text) = self.execute(request).await?;
            }
        }

        if !status.is_success() {
            return Err(ApiError::from_response(status.as_u16(), &text));
        }

        let body = if text.trim().is_empty() { "{}" } else { text.as_str() };
        serde_json::from_str(body).map_err(|e| ApiError {
            status: Some(status.as_u16()),
            message: format!("unexpected response body: {}", e),
        })
    }

    async fn execute(
        &self,
        request: reqwest::RequestBuilder,
    ) -> std::result::Result<(StatusCode, String), ApiError> {
        let token = self.token.read().await.clone();
        let response = request
            .bearer_auth(token)
            .send()
            .await
            .map_err(ApiError::transport)?;

        let status = response.status();
        let text = response.text().await.map_err(ApiError::transport)?;
        Ok((status, text))
    }

    async fn refresh_token(&self) -> std::result::Result<(), ApiError> {
        let Some(source) = &self.source else {
            return Ok(());
        };

        let token = source.token().await.map_err(|e| ApiError {
            status: Some(StatusCode::UNAUTHORIZED.as_u16()),
            message: format!("access token rejected and refresh failed: {}", e),
        })?;
        *self.token.write().await = token;

        info!("Access token refreshed after 401");
        Ok(())
    }
}

/// Host prefix for regional endpoints (`us-central1-` etc.; empty for global)
pub(crate) fn regional_prefix(resource: &str) -> String {
    let location = resource
        .split('/')
        .skip_while(|part| *part != "locations")
        .nth(1)
        .unwrap_or("global");

    if location == "global" {
        String::new()
    } else {
        format!("{}-", location)
    }
}

//! In-memory fakes of the cloud services, shared by the integration tests.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use stt_insights::adapters::{
    CreateOutcome, IngestRequest, InsightsService, ObjectPage, ObjectStore, PiiRedactor,
    SpeechRecognizer,
};
use stt_insights::config::{Settings, SpeechSettings};
use stt_insights::core::{PipelineContext, PollSettings, RetryPolicy, Services};
use stt_insights::domain::{
    AudioReference, ConversationRecord, IngestionOperation, RedactionResult, RedactionTemplates,
    Transcript, Utterance,
};
use stt_insights::error::{PipelineError, Result};

pub const BUCKET: &str = "calls";

/// Settings for tests: fast retries and polling
pub fn settings(extra: &str) -> Settings {
    let yaml = format!(
        "gcp:\n  project_id: test-project\nstorage:\n  input_bucket: {}\n{}",
        BUCKET, extra
    );
    let mut settings = Settings::from_yaml(&yaml).unwrap();
    settings.processing.retry = RetryPolicy::fixed(3, Duration::from_millis(1));
    settings.speech.poll = PollSettings::new(Duration::from_millis(2), Duration::from_millis(50));
    settings.insights.poll = PollSettings::new(Duration::from_millis(2), Duration::from_millis(50));
    settings
}

pub fn merged_files(count: usize) -> Vec<String> {
    (1..=count).map(|i| format!("merged_call_{:02}.wav", i)).collect()
}

pub fn uri(object: &str) -> String {
    format!("gs://{}/{}", BUCKET, object)
}

/// All fakes plus the services bundle pointing at them
pub struct Fakes {
    pub storage: Arc<FakeStore>,
    pub speech: Arc<FakeSpeech>,
    pub redactor: Arc<FakeRedactor>,
    pub insights: Arc<FakeInsights>,
}

impl Fakes {
    pub fn new(objects: Vec<String>) -> Self {
        Self {
            storage: Arc::new(FakeStore::new(objects)),
            speech: Arc::new(FakeSpeech::default()),
            redactor: Arc::new(FakeRedactor::default()),
            insights: Arc::new(FakeInsights::default()),
        }
    }

    pub fn context(&self, settings: Settings) -> PipelineContext {
        let services = Services {
            storage: self.storage.clone(),
            speech: self.speech.clone(),
            redactor: self.redactor.clone(),
            insights: self.insights.clone(),
        };
        PipelineContext::new(settings, services)
    }
}

// ============================================================================
// Storage
// ============================================================================

pub struct FakeStore {
    objects: Vec<String>,
    pub inaccessible: Mutex<HashSet<String>>,
    pub list_calls: AtomicUsize,
    pub uploads: Mutex<Vec<(String, String, serde_json::Value)>>,
}

impl FakeStore {
    fn new(objects: Vec<String>) -> Self {
        Self {
            objects,
            inaccessible: Mutex::new(HashSet::new()),
            list_calls: AtomicUsize::new(0),
            uploads: Mutex::new(Vec::new()),
        }
    }

    pub fn deny(&self, bucket: &str) {
        self.inaccessible.lock().unwrap().insert(bucket.to_string());
    }

    fn check(&self, bucket: &str) -> Result<()> {
        if self.inaccessible.lock().unwrap().contains(bucket) {
            Err(PipelineError::storage(bucket, "HTTP 404: bucket not found"))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl ObjectStore for FakeStore {
    async fn check_bucket(&self, bucket: &str) -> Result<()> {
        self.check(bucket)
    }

    async fn list_page(
        &self,
        bucket: &str,
        prefix: &str,
        _page_token: Option<&str>,
    ) -> Result<ObjectPage> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        self.check(bucket)?;

        Ok(ObjectPage {
            objects: self
                .objects
                .iter()
                .filter(|o| o.starts_with(prefix))
                .map(|o| AudioReference::new(bucket, o.as_str()))
                .collect(),
            next_page_token: None,
        })
    }

    async fn upload_json(
        &self,
        bucket: &str,
        object: &str,
        body: &serde_json::Value,
    ) -> Result<()> {
        self.check(bucket)?;
        self.uploads
            .lock()
            .unwrap()
            .push((bucket.to_string(), object.to_string(), body.clone()));
        Ok(())
    }
}

// ============================================================================
// Speech
// ============================================================================

/// Two-line call per file; failures and latency can be scripted
#[derive(Default)]
pub struct FakeSpeech {
    /// URI → remaining failures before success
    pub failures: Mutex<HashMap<String, u32>>,
    pub calls: AtomicUsize,
    pub latency: Mutex<Duration>,
    pub in_flight: AtomicUsize,
    /// Highest number of transcriptions running at once
    pub peak_in_flight: AtomicUsize,
}

impl FakeSpeech {
    pub fn fail(&self, uri: &str, times: u32) {
        self.failures.lock().unwrap().insert(uri.to_string(), times);
    }

    pub fn slow_down(&self, latency: Duration) {
        *self.latency.lock().unwrap() = latency;
    }

    fn respond(&self, audio: &AudioReference, settings: &SpeechSettings) -> Result<Transcript> {
        let uri = audio.uri();

        if let Some(remaining) = self.failures.lock().unwrap().get_mut(&uri) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(PipelineError::transcription("429 quota exhausted"));
            }
        }

        let mut transcript = Transcript::new(uri, settings.language_code.clone());
        transcript.utterances = vec![
            utterance(2, "Thank you for calling, how can I help?", 0),
            utterance(1, "My phone number is 555 0100", 3000),
        ];
        Ok(transcript)
    }
}

#[async_trait]
impl SpeechRecognizer for FakeSpeech {
    async fn transcribe(
        &self,
        audio: &AudioReference,
        settings: &SpeechSettings,
    ) -> Result<Transcript> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let running = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(running, Ordering::SeqCst);

        let latency = *self.latency.lock().unwrap();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        let result = self.respond(audio, settings);
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }

    async fn check_recognizer(&self, _recognizer: &str) -> Result<()> {
        Ok(())
    }
}

fn utterance(channel: u32, text: &str, start_ms: u64) -> Utterance {
    Utterance {
        channel_tag: channel,
        speaker_tag: None,
        text: text.to_string(),
        start: Duration::from_millis(start_ms),
        end: Duration::from_millis(start_ms + 2500),
        confidence: 0.92,
        words: Vec::new(),
    }
}

// ============================================================================
// Redaction
// ============================================================================

/// Replaces "555 0100" with a placeholder, or fails when `broken` is set
#[derive(Default)]
pub struct FakeRedactor {
    pub broken: Mutex<bool>,
    pub calls: AtomicUsize,
}

impl FakeRedactor {
    pub fn break_service(&self) {
        *self.broken.lock().unwrap() = true;
    }
}

#[async_trait]
impl PiiRedactor for FakeRedactor {
    async fn redact(&self, text: &str, _templates: &RedactionTemplates) -> Result<RedactionResult> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if *self.broken.lock().unwrap() {
            return Err(PipelineError::redaction("template not found"));
        }

        let redacted = text.replace("555 0100", "[PHONE_NUMBER]");
        let findings = if redacted != text {
            vec![stt_insights::domain::Finding {
                info_type: "PHONE_NUMBER".to_string(),
                likelihood: "LIKELY".to_string(),
                quote: None,
            }]
        } else {
            Vec::new()
        };
        Ok(RedactionResult::new(text, redacted, findings))
    }

    async fn check_templates(&self, _templates: &RedactionTemplates) -> Result<()> {
        Ok(())
    }
}

// ============================================================================
// Insights
// ============================================================================

/// Scripted Insights service
#[derive(Default)]
pub struct FakeInsights {
    /// Conversation ids that already exist
    pub existing: Mutex<HashSet<String>>,
    /// Conversation id → remaining create failures
    pub create_failures: Mutex<HashMap<String, u32>>,
    pub created: Mutex<Vec<ConversationRecord>>,
    pub create_calls: AtomicUsize,

    /// Remaining ingest submission failures
    pub ingest_failures: Mutex<u32>,
    pub ingest_requests: Mutex<Vec<IngestRequest>>,
    /// Snapshot returned once the operation has been polled `polls_until_done` times
    pub final_operation: Mutex<Option<IngestionOperation>>,
    pub polls_until_done: Mutex<usize>,
    pub get_calls: AtomicUsize,

    pub access_denied: Mutex<bool>,
}

impl FakeInsights {
    pub fn set_final_operation(&self, operation: IngestionOperation, polls: usize) {
        *self.final_operation.lock().unwrap() = Some(operation);
        *self.polls_until_done.lock().unwrap() = polls;
    }
}

#[async_trait]
impl InsightsService for FakeInsights {
    async fn create_conversation(
        &self,
        _parent: &str,
        record: &ConversationRecord,
    ) -> Result<CreateOutcome> {
        self.create_calls.fetch_add(1, Ordering::SeqCst);
        let id = record.conversation_id.clone();

        if let Some(remaining) = self.create_failures.lock().unwrap().get_mut(&id) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(PipelineError::ingestion("HTTP 503: UNAVAILABLE"));
            }
        }

        if !self.existing.lock().unwrap().insert(id.clone()) {
            return Ok(CreateOutcome::AlreadyExists);
        }

        self.created.lock().unwrap().push(record.clone());
        Ok(CreateOutcome::Created {
            name: format!("projects/test-project/locations/us-central1/conversations/{}", id),
        })
    }

    async fn ingest_conversations(&self, request: &IngestRequest) -> Result<IngestionOperation> {
        {
            let mut failures = self.ingest_failures.lock().unwrap();
            if *failures > 0 {
                *failures -= 1;
                return Err(PipelineError::ingestion("HTTP 500: INTERNAL"));
            }
        }

        self.ingest_requests.lock().unwrap().push(request.clone());
        Ok(IngestionOperation::pending(
            "projects/test-project/locations/us-central1/operations/1",
        ))
    }

    async fn get_operation(&self, name: &str) -> Result<IngestionOperation> {
        let polls = self.get_calls.fetch_add(1, Ordering::SeqCst) + 1;
        let ready = polls >= *self.polls_until_done.lock().unwrap();

        match self.final_operation.lock().unwrap().clone() {
            Some(operation) if ready => Ok(operation),
            _ => Ok(IngestionOperation::pending(name)),
        }
    }

    async fn check_access(&self, parent: &str) -> Result<()> {
        if *self.access_denied.lock().unwrap() {
            Err(PipelineError::ingestion(format!("HTTP 403: {}", parent)))
        } else {
            Ok(())
        }
    }
}

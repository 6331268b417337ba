//! Explicit run context: validated settings plus the service handles.

use std::sync::Arc;
use std::time::Duration;

use uuid::Uuid;

use crate::adapters::{
    auth, DlpRedactor, GcpClient, GcsStore, InsightsClient, InsightsService, ObjectStore,
    PiiRedactor, SpeechClient, SpeechRecognizer,
};
use crate::config::Settings;
use crate::error::Result;

/// How long each `gcloud auth print-access-token` may take
const TOKEN_TIMEOUT: Duration = Duration::from_secs(30);

/// Handles to every external service the pipeline talks to
#[derive(Clone)]
pub struct Services {
    pub storage: Arc<dyn ObjectStore>,
    pub speech: Arc<dyn SpeechRecognizer>,
    pub redactor: Arc<dyn PiiRedactor>,
    pub insights: Arc<dyn InsightsService>,
}

impl Services {
    /// Production services sharing one authenticated HTTP client
    pub async fn connect() -> Result<Self> {
        let tokens = Arc::new(auth::GcloudTokens::new(TOKEN_TIMEOUT));
        let client = GcpClient::connect(tokens).await?;

        Ok(Self {
            storage: Arc::new(GcsStore::new(client.clone())),
            speech: Arc::new(SpeechClient::new(client.clone())),
            redactor: Arc::new(DlpRedactor::new(client.clone())),
            insights: Arc::new(InsightsClient::new(client)),
        })
    }
}

/// Everything a run needs, passed explicitly to each component
#[derive(Clone)]
pub struct PipelineContext {
    pub run_id: Uuid,
    pub settings: Arc<Settings>,
    pub services: Services,
}

impl PipelineContext {
    pub fn new(settings: Settings, services: Services) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            settings: Arc::new(settings),
            services,
        }
    }
}

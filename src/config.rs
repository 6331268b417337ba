//! Pipeline configuration.
//!
//! Configuration sources (highest priority first):
//! 1. `--config <path>` on the command line
//! 2. `STT_INSIGHTS_CONFIG` environment variable
//! 3. `config/config.yaml` in the current directory or one of its parents
//! 4. `<config dir>/stt-insights/config.yaml` (e.g. ~/.config on Linux)
//!
//! `$VAR` and `${VAR}` references are expanded from the environment before
//! the YAML is parsed. A missing `gcp.project_id` falls back to
//! `GOOGLE_CLOUD_PROJECT` or `GCP_PROJECT`.
//!
//! The raw file is resolved into a validated [`Settings`] once at startup
//! and handed to components explicitly; nothing here is global.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::core::poll::PollSettings;
use crate::core::retry::RetryPolicy;
use crate::domain::{CallMetadata, IngestionMode, RedactionTemplates};
use crate::error::PipelineError;

/// Environment variable naming the config file
pub const CONFIG_ENV: &str = "STT_INSIGHTS_CONFIG";

/// Raw config file schema (matches YAML structure)
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub gcp: GcpSection,
    #[serde(default, alias = "gcs")]
    pub storage: StorageSection,
    #[serde(default)]
    pub stt: SttSection,
    #[serde(default)]
    pub dlp: DlpSection,
    #[serde(default)]
    pub ccai: CcaiSection,
    #[serde(default)]
    pub processing: ProcessingSection,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct GcpSection {
    pub project_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageSection {
    pub input_bucket: String,
    pub input_folder: String,
    pub file_prefix_filter: String,
    pub audio_patterns: Vec<String>,
    pub output_bucket: Option<String>,
    pub output_folder: String,
}

impl Default for StorageSection {
    fn default() -> Self {
        Self {
            input_bucket: String::new(),
            input_folder: String::new(),
            file_prefix_filter: "merged".to_string(),
            audio_patterns: default_audio_patterns(),
            output_bucket: None,
            output_folder: String::new(),
        }
    }
}

fn default_audio_patterns() -> Vec<String> {
    ["*.wav", "*.mp3", "*.flac", "*.m4a", "*.aac", "*.ogg", "*.au", "*.raw"]
        .iter()
        .map(|p| p.to_string())
        .collect()
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SttSection {
    pub mode: RecognitionMode,
    pub encoding: String,
    pub sample_rate_hertz: u32,
    pub audio_channel_count: u32,
    pub language_code: String,
    pub model: String,
    pub use_enhanced: bool,
    pub enable_separate_recognition_per_channel: bool,
    pub enable_automatic_punctuation: bool,
    pub diarization: DiarizationSection,
    pub poll_interval_seconds: u64,
    pub max_wait_seconds: u64,
}

impl Default for SttSection {
    fn default() -> Self {
        Self {
            mode: RecognitionMode::LongRunning,
            encoding: "MULAW".to_string(),
            sample_rate_hertz: 8000,
            audio_channel_count: 2,
            language_code: "en-US".to_string(),
            model: "telephony".to_string(),
            use_enhanced: true,
            enable_separate_recognition_per_channel: true,
            enable_automatic_punctuation: true,
            diarization: DiarizationSection::default(),
            poll_interval_seconds: 10,
            max_wait_seconds: 600,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DiarizationSection {
    pub enabled: bool,
    pub min_speakers: u32,
    pub max_speakers: u32,
}

impl Default for DiarizationSection {
    fn default() -> Self {
        Self {
            enabled: false,
            min_speakers: 1,
            max_speakers: 2,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DlpSection {
    pub location: String,
    #[serde(alias = "identify_template_id")]
    pub inspect_template_id: Option<String>,
    pub deidentify_template_id: Option<String>,
    pub mandatory: bool,
}

impl Default for DlpSection {
    fn default() -> Self {
        Self {
            location: "global".to_string(),
            inspect_template_id: None,
            deidentify_template_id: None,
            mandatory: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CcaiSection {
    pub location: String,
    pub mode: IngestionMode,
    pub recognizer_id: String,
    pub agent_id: Option<String>,
    pub customer_id: Option<String>,
    pub customer_channel: u32,
    pub agent_channel: u32,
    pub role_source: RoleSource,
    #[serde(alias = "conversation_ttl_days")]
    pub ttl_days: u64,
    pub language_code: String,
    pub labels: BTreeMap<String, String>,
    pub batch_size: usize,
    pub poll_interval_seconds: u64,
    pub max_wait_seconds: u64,
}

impl Default for CcaiSection {
    fn default() -> Self {
        Self {
            location: "us-central1".to_string(),
            mode: IngestionMode::FormattedUpload,
            recognizer_id: "ccai-insights-recognizer".to_string(),
            agent_id: Some("agent-001".to_string()),
            customer_id: Some("customer-001".to_string()),
            customer_channel: 1,
            agent_channel: 2,
            role_source: RoleSource::Channel,
            ttl_days: 365,
            language_code: "en-US".to_string(),
            labels: BTreeMap::new(),
            batch_size: 100,
            poll_interval_seconds: 30,
            max_wait_seconds: 900,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ProcessingSection {
    pub max_concurrent_files: usize,
    pub retry_attempts: u32,
    pub retry_delay_seconds: f64,
    pub backoff_multiplier: f64,
    pub max_retry_delay_seconds: f64,
}

impl Default for ProcessingSection {
    fn default() -> Self {
        Self {
            max_concurrent_files: 5,
            retry_attempts: 3,
            retry_delay_seconds: 2.0,
            backoff_multiplier: 1.0,
            max_retry_delay_seconds: 60.0,
        }
    }
}

/// Synchronous or long-running speech recognition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecognitionMode {
    /// `speech:recognize`, blocking; only suitable for short audio
    Sync,
    /// `speech:longrunningrecognize` plus operation polling
    #[default]
    LongRunning,
}

/// Which tag maps utterances to participants
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoleSource {
    /// Audio channel (stereo recordings, one party per channel)
    #[default]
    Channel,
    /// Diarization speaker tag (mono recordings)
    Speaker,
}

// ============================================================================
// Resolved settings
// ============================================================================

/// Validated configuration for one run
#[derive(Debug, Clone, Serialize)]
pub struct Settings {
    pub project_id: String,
    pub storage: StorageSettings,
    pub speech: SpeechSettings,
    pub redaction: RedactionSettings,
    pub insights: InsightsSettings,
    pub processing: ProcessingSettings,
    /// Config file the settings came from (if any)
    pub source: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StorageSettings {
    pub input_bucket: String,
    /// Folder prefix, normalised to end with '/' (empty for bucket root)
    pub input_folder: String,
    pub file_prefix_filter: String,
    pub audio_patterns: Vec<String>,
    pub output_bucket: Option<String>,
    pub output_folder: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct SpeechSettings {
    pub mode: RecognitionMode,
    pub encoding: String,
    pub sample_rate_hertz: u32,
    pub audio_channel_count: u32,
    pub language_code: String,
    pub model: String,
    pub use_enhanced: bool,
    pub separate_recognition_per_channel: bool,
    pub enable_automatic_punctuation: bool,
    pub diarization: Option<DiarizationSettings>,
    pub poll: PollSettings,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DiarizationSettings {
    pub min_speakers: u32,
    pub max_speakers: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct RedactionSettings {
    /// None when the stage is disabled
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inspect_template: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deidentify_template: Option<String>,
    pub location: String,
    /// Fail the file instead of continuing unredacted
    pub mandatory: bool,
}

impl RedactionSettings {
    pub fn templates(&self) -> Option<RedactionTemplates> {
        match (&self.inspect_template, &self.deidentify_template) {
            (Some(inspect), Some(deidentify)) => Some(RedactionTemplates {
                inspect: inspect.clone(),
                deidentify: deidentify.clone(),
            }),
            _ => None,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.templates().is_some()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct InsightsSettings {
    pub location: String,
    pub mode: IngestionMode,
    /// projects/{p}/locations/{l}/recognizers/{id}
    pub recognizer: String,
    pub agent_id: Option<String>,
    pub customer_id: Option<String>,
    pub channels: CallMetadata,
    pub role_source: RoleSource,
    #[serde(with = "crate::domain::duration")]
    pub ttl: Duration,
    pub language_code: String,
    pub labels: BTreeMap<String, String>,
    pub batch_size: usize,
    pub poll: PollSettings,
}

impl InsightsSettings {
    /// projects/{p}/locations/{l}
    pub fn parent(&self, project_id: &str) -> String {
        format!("projects/{}/locations/{}", project_id, self.location)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ProcessingSettings {
    pub max_concurrent_files: usize,
    pub retry: RetryPolicy,
}

impl Settings {
    /// Parse and validate YAML content (environment expansion is the
    /// caller's job, see [`expand_env_vars`])
    pub fn from_yaml(content: &str) -> Result<Self, PipelineError> {
        let file: ConfigFile = serde_yaml::from_str(content)
            .map_err(|e| PipelineError::configuration(format!("invalid YAML: {}", e)))?;
        file.resolve(env_project_id())
    }
}

impl ConfigFile {
    /// Validate the raw file and resolve it into [`Settings`]
    pub fn resolve(self, fallback_project: Option<String>) -> Result<Settings, PipelineError> {
        let project_id = self
            .gcp
            .project_id
            .filter(|p| !p.trim().is_empty())
            .or(fallback_project)
            .ok_or_else(|| {
                PipelineError::configuration(
                    "gcp.project_id is not set and neither GOOGLE_CLOUD_PROJECT nor GCP_PROJECT is defined",
                )
            })?;

        let storage = resolve_storage(self.storage)?;
        let speech = resolve_speech(self.stt)?;
        let redaction = resolve_redaction(&project_id, self.dlp)?;
        let insights = resolve_insights(&project_id, self.ccai)?;
        let processing = resolve_processing(self.processing)?;

        Ok(Settings {
            project_id,
            storage,
            speech,
            redaction,
            insights,
            processing,
            source: None,
        })
    }
}

fn resolve_storage(raw: StorageSection) -> Result<StorageSettings, PipelineError> {
    let input_bucket = strip_gs_scheme(&raw.input_bucket);
    if input_bucket.is_empty() {
        return Err(PipelineError::configuration("storage.input_bucket is required"));
    }

    for pattern in &raw.audio_patterns {
        glob::Pattern::new(pattern).map_err(|e| {
            PipelineError::configuration(format!("invalid audio pattern '{}': {}", pattern, e))
        })?;
    }

    Ok(StorageSettings {
        input_bucket,
        input_folder: normalize_folder(&raw.input_folder),
        file_prefix_filter: raw.file_prefix_filter,
        audio_patterns: raw.audio_patterns,
        output_bucket: raw
            .output_bucket
            .map(|b| strip_gs_scheme(&b))
            .filter(|b| !b.is_empty()),
        output_folder: normalize_folder(&raw.output_folder),
    })
}

fn resolve_speech(raw: SttSection) -> Result<SpeechSettings, PipelineError> {
    if raw.sample_rate_hertz == 0 {
        return Err(PipelineError::configuration("stt.sample_rate_hertz must be positive"));
    }
    if raw.audio_channel_count == 0 {
        return Err(PipelineError::configuration("stt.audio_channel_count must be at least 1"));
    }

    let diarization = if raw.diarization.enabled {
        if raw.diarization.min_speakers == 0
            || raw.diarization.min_speakers > raw.diarization.max_speakers
        {
            return Err(PipelineError::configuration(
                "stt.diarization requires 1 <= min_speakers <= max_speakers",
            ));
        }
        Some(DiarizationSettings {
            min_speakers: raw.diarization.min_speakers,
            max_speakers: raw.diarization.max_speakers,
        })
    } else {
        None
    };

    Ok(SpeechSettings {
        mode: raw.mode,
        encoding: raw.encoding,
        sample_rate_hertz: raw.sample_rate_hertz,
        audio_channel_count: raw.audio_channel_count,
        language_code: raw.language_code,
        model: raw.model,
        use_enhanced: raw.use_enhanced,
        separate_recognition_per_channel: raw.enable_separate_recognition_per_channel,
        enable_automatic_punctuation: raw.enable_automatic_punctuation,
        diarization,
        poll: poll_settings("stt", raw.poll_interval_seconds, raw.max_wait_seconds)?,
    })
}

fn resolve_redaction(project_id: &str, raw: DlpSection) -> Result<RedactionSettings, PipelineError> {
    let inspect = raw.inspect_template_id.filter(|t| !t.trim().is_empty());
    let deidentify = raw.deidentify_template_id.filter(|t| !t.trim().is_empty());

    if inspect.is_some() != deidentify.is_some() {
        return Err(PipelineError::configuration(
            "dlp.inspect_template_id and dlp.deidentify_template_id must be set together",
        ));
    }
    if raw.mandatory && inspect.is_none() {
        return Err(PipelineError::configuration(
            "dlp.mandatory is set but no DLP templates are configured",
        ));
    }

    let parent = format!("projects/{}/locations/{}", project_id, raw.location);
    Ok(RedactionSettings {
        inspect_template: inspect.map(|id| qualify(&parent, "inspectTemplates", &id)),
        deidentify_template: deidentify.map(|id| qualify(&parent, "deidentifyTemplates", &id)),
        location: raw.location,
        mandatory: raw.mandatory,
    })
}

fn resolve_insights(project_id: &str, raw: CcaiSection) -> Result<InsightsSettings, PipelineError> {
    if raw.customer_channel == raw.agent_channel {
        return Err(PipelineError::configuration(
            "ccai.customer_channel and ccai.agent_channel must differ",
        ));
    }
    if raw.ttl_days == 0 {
        return Err(PipelineError::configuration("ccai.ttl_days must be at least 1"));
    }
    let ttl_seconds = raw.ttl_days.checked_mul(24 * 60 * 60).ok_or_else(|| {
        PipelineError::configuration(format!("ccai.ttl_days {} is too large", raw.ttl_days))
    })?;
    if raw.batch_size == 0 {
        return Err(PipelineError::configuration("ccai.batch_size must be at least 1"));
    }
    if raw.mode == IngestionMode::DirectIngestion && raw.recognizer_id.trim().is_empty() {
        return Err(PipelineError::configuration(
            "ccai.recognizer_id is required for direct ingestion",
        ));
    }

    let parent = format!("projects/{}/locations/{}", project_id, raw.location);
    Ok(InsightsSettings {
        recognizer: qualify(&parent, "recognizers", &raw.recognizer_id),
        location: raw.location,
        mode: raw.mode,
        agent_id: raw.agent_id.filter(|a| !a.is_empty()),
        customer_id: raw.customer_id.filter(|c| !c.is_empty()),
        channels: CallMetadata {
            customer_channel: raw.customer_channel,
            agent_channel: raw.agent_channel,
        },
        role_source: raw.role_source,
        ttl: Duration::from_secs(ttl_seconds),
        language_code: raw.language_code,
        labels: raw.labels,
        batch_size: raw.batch_size,
        poll: poll_settings("ccai", raw.poll_interval_seconds, raw.max_wait_seconds)?,
    })
}

fn resolve_processing(raw: ProcessingSection) -> Result<ProcessingSettings, PipelineError> {
    if raw.max_concurrent_files == 0 {
        return Err(PipelineError::configuration(
            "processing.max_concurrent_files must be at least 1",
        ));
    }
    if raw.retry_attempts == 0 {
        return Err(PipelineError::configuration(
            "processing.retry_attempts must be at least 1",
        ));
    }
    if raw.retry_delay_seconds < 0.0 || raw.backoff_multiplier < 1.0 {
        return Err(PipelineError::configuration(
            "processing.retry_delay_seconds must be >= 0 and backoff_multiplier >= 1.0",
        ));
    }

    Ok(ProcessingSettings {
        max_concurrent_files: raw.max_concurrent_files,
        retry: RetryPolicy {
            max_attempts: raw.retry_attempts,
            initial_delay_ms: (raw.retry_delay_seconds * 1000.0) as u64,
            max_delay_ms: (raw.max_retry_delay_seconds.max(raw.retry_delay_seconds) * 1000.0)
                as u64,
            backoff_multiplier: raw.backoff_multiplier,
        },
    })
}

fn poll_settings(section: &str, interval: u64, max_wait: u64) -> Result<PollSettings, PipelineError> {
    if interval == 0 || max_wait < interval {
        return Err(PipelineError::configuration(format!(
            "{}.poll_interval_seconds must be positive and not exceed max_wait_seconds",
            section
        )));
    }
    Ok(PollSettings::new(
        Duration::from_secs(interval),
        Duration::from_secs(max_wait),
    ))
}

/// Build a full resource name unless `id` already is one
fn qualify(parent: &str, collection: &str, id: &str) -> String {
    if id.starts_with("projects/") || id.starts_with("organizations/") {
        id.to_string()
    } else {
        format!("{}/{}/{}", parent, collection, id)
    }
}

fn strip_gs_scheme(bucket: &str) -> String {
    bucket
        .trim()
        .trim_start_matches("gs://")
        .trim_end_matches('/')
        .to_string()
}

fn normalize_folder(folder: &str) -> String {
    let trimmed = folder.trim().trim_matches('/');
    if trimmed.is_empty() {
        String::new()
    } else {
        format!("{}/", trimmed)
    }
}

fn env_project_id() -> Option<String> {
    std::env::var("GOOGLE_CLOUD_PROJECT")
        .or_else(|_| std::env::var("GCP_PROJECT"))
        .ok()
        .filter(|p| !p.trim().is_empty())
}

// ============================================================================
// Loading
// ============================================================================

/// Expand `$VAR` and `${VAR}` from the process environment.
///
/// Unknown variables are left untouched.
pub fn expand_env_vars(input: &str) -> String {
    expand_with(input, |name| std::env::var(name).ok())
}

fn expand_with(input: &str, lookup: impl Fn(&str) -> Option<String>) -> String {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(pos) = rest.find('$') {
        out.push_str(&rest[..pos]);
        let after = &rest[pos + 1..];

        let (name, consumed) = if let Some(braced) = after.strip_prefix('{') {
            match braced.find('}') {
                Some(end) => (&braced[..end], end + 2),
                None => ("", 0),
            }
        } else {
            let end = after
                .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
                .unwrap_or(after.len());
            (&after[..end], end)
        };

        match (name.is_empty(), lookup(name)) {
            (false, Some(value)) => out.push_str(&value),
            _ => out.push_str(&rest[pos..pos + 1 + consumed]),
        }
        rest = &rest[pos + 1 + consumed..];
    }

    out.push_str(rest);
    out
}

/// Find config file by searching the current directory and its parents
fn find_config_file() -> Option<PathBuf> {
    let mut current = std::env::current_dir().ok()?;

    loop {
        let config_path = current.join("config").join("config.yaml");
        if config_path.exists() {
            return Some(config_path);
        }

        if !current.pop() {
            break;
        }
    }

    let user_config = dirs::config_dir()?.join("stt-insights").join("config.yaml");
    user_config.exists().then_some(user_config)
}

/// Resolve which config file to use
pub fn locate(explicit: Option<&Path>) -> Result<PathBuf> {
    if let Some(path) = explicit {
        return Ok(path.to_path_buf());
    }
    if let Ok(path) = std::env::var(CONFIG_ENV) {
        return Ok(PathBuf::from(path));
    }
    find_config_file().with_context(|| {
        format!(
            "No configuration file found. Pass --config, set {}, or create config/config.yaml",
            CONFIG_ENV
        )
    })
}

/// Load, expand and validate the configuration
pub fn load(explicit: Option<&Path>) -> Result<Settings> {
    let path = locate(explicit)?;

    let content = std::fs::read_to_string(&path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let mut settings = Settings::from_yaml(&expand_env_vars(&content))
        .with_context(|| format!("Invalid config file: {}", path.display()))?;
    settings.source = Some(path);

    Ok(settings)
}

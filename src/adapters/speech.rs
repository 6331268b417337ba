//! Speech-to-Text v1 REST adapter.
//!
//! Sync mode calls `speech:recognize`; long-running mode calls
//! `speech:longrunningrecognize` and polls `operations/{name}` with the
//! shared bounded poller.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::{regional_prefix, GcpClient, SpeechRecognizer};
use crate::config::{RecognitionMode, SpeechSettings};
use crate::core::poll::{poll_until, PollOutcome};
use crate::domain::{AudioReference, OperationStatus, Transcript, Utterance, WordInfo};
use crate::error::{PipelineError, Result};

const SPEECH_API: &str = "https://speech.googleapis.com";

/// Speech-to-Text client
pub struct SpeechClient {
    client: GcpClient,
    endpoint: String,
    /// v2 recognizer root; None means the regional host of each recognizer
    recognizer_endpoint: Option<String>,
}

impl SpeechClient {
    pub fn new(client: GcpClient) -> Self {
        Self {
            client,
            endpoint: SPEECH_API.to_string(),
            recognizer_endpoint: None,
        }
    }

    /// Send v1 and v2 calls to one non-default API root
    pub fn with_endpoint(client: GcpClient, endpoint: impl Into<String>) -> Self {
        let endpoint = endpoint.into().trim_end_matches('/').to_string();
        Self {
            client,
            recognizer_endpoint: Some(endpoint.clone()),
            endpoint,
        }
    }

    async fn recognize(&self, request: &RecognizeRequest<'_>) -> Result<Vec<SpeechResult>> {
        let url = format!("{}/v1/speech:recognize", self.endpoint);
        let response: RecognizeResponse = self
            .client
            .post(&url, &[], request)
            .await
            .map_err(|e| PipelineError::transcription(e.to_string()))?;
        Ok(response.results)
    }

    async fn recognize_long_running(
        &self,
        request: &RecognizeRequest<'_>,
        settings: &SpeechSettings,
    ) -> Result<Vec<SpeechResult>> {
        let url = format!("{}/v1/speech:longrunningrecognize", self.endpoint);
        let submitted: SpeechOperation = self
            .client
            .post(&url, &[], request)
            .await
            .map_err(|e| PipelineError::transcription(e.to_string()))?;

        let name = submitted.name.clone();
        info!(operation = %name, audio_uri = request.audio.uri, "Long-running recognition started");

        let outcome = poll_until(
            &settings.poll,
            &name,
            || self.fetch_operation(&name),
            |op: &SpeechOperation| op.done,
        )
        .await;

        match outcome {
            PollOutcome::Done(op) => match (op.error, op.response) {
                (Some(status), _) => Err(PipelineError::transcription(format!(
                    "operation {} failed: {} (code {})",
                    name, status.message, status.code
                ))),
                (None, Some(response)) => Ok(response.results),
                (None, None) => Ok(Vec::new()),
            },
            PollOutcome::TimedOut { .. } => Err(PipelineError::transcription(format!(
                "operation {} did not finish within {:?}",
                name, settings.poll.max_wait
            ))),
        }
    }

    async fn fetch_operation(&self, name: &str) -> Result<SpeechOperation> {
        let url = format!("{}/v1/operations/{}", self.endpoint, name);
        self.client
            .get(&url, &[])
            .await
            .map_err(|e| PipelineError::transcription(e.to_string()))
    }

    fn recognizer_url(&self, recognizer: &str) -> String {
        match &self.recognizer_endpoint {
            Some(root) => format!("{}/v2/{}", root, recognizer),
            None => format!(
                "https://{}speech.googleapis.com/v2/{}",
                regional_prefix(recognizer),
                recognizer
            ),
        }
    }
}

#[async_trait]
impl SpeechRecognizer for SpeechClient {
    async fn transcribe(
        &self,
        audio: &AudioReference,
        settings: &SpeechSettings,
    ) -> Result<Transcript> {
        let uri = audio.uri();
        let request = RecognizeRequest::new(&uri, settings);

        let results = match settings.mode {
            RecognitionMode::Sync => self.recognize(&request).await?,
            RecognitionMode::LongRunning => self.recognize_long_running(&request, settings).await?,
        };

        let transcript = build_transcript(
            &uri,
            &settings.language_code,
            results,
            settings.diarization.is_some(),
        );
        debug!(
            audio_uri = %uri,
            utterances = transcript.utterances.len(),
            words = transcript.word_count(),
            "Transcription finished"
        );
        Ok(transcript)
    }

    async fn check_recognizer(&self, recognizer: &str) -> Result<()> {
        let _: serde_json::Value = self
            .client
            .get(&self.recognizer_url(recognizer), &[])
            .await
            .map_err(|e| {
                if e.is_not_found() {
                    PipelineError::configuration(format!("recognizer {} not found", recognizer))
                } else {
                    PipelineError::transcription(format!("recognizer {}: {}", recognizer, e))
                }
            })?;
        Ok(())
    }
}

// ============================================================================
// Wire types
// ============================================================================

#[derive(Debug, Serialize)]
struct RecognizeRequest<'a> {
    config: RecognitionConfig<'a>,
    audio: RecognitionAudio<'a>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RecognitionConfig<'a> {
    encoding: &'a str,
    sample_rate_hertz: u32,
    audio_channel_count: u32,
    enable_separate_recognition_per_channel: bool,
    language_code: &'a str,
    model: &'a str,
    use_enhanced: bool,
    enable_automatic_punctuation: bool,
    enable_word_time_offsets: bool,
    enable_word_confidence: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    diarization_config: Option<DiarizationConfig>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct DiarizationConfig {
    enable_speaker_diarization: bool,
    min_speaker_count: u32,
    max_speaker_count: u32,
}

#[derive(Debug, Serialize)]
struct RecognitionAudio<'a> {
    uri: &'a str,
}

impl<'a> RecognizeRequest<'a> {
    fn new(uri: &'a str, settings: &'a SpeechSettings) -> Self {
        Self {
            config: RecognitionConfig {
                encoding: &settings.encoding,
                sample_rate_hertz: settings.sample_rate_hertz,
                audio_channel_count: settings.audio_channel_count,
                enable_separate_recognition_per_channel: settings.separate_recognition_per_channel
                    && settings.audio_channel_count > 1,
                language_code: &settings.language_code,
                model: &settings.model,
                use_enhanced: settings.use_enhanced,
                enable_automatic_punctuation: settings.enable_automatic_punctuation,
                enable_word_time_offsets: true,
                enable_word_confidence: true,
                diarization_config: settings.diarization.map(|d| DiarizationConfig {
                    enable_speaker_diarization: true,
                    min_speaker_count: d.min_speakers,
                    max_speaker_count: d.max_speakers,
                }),
            },
            audio: RecognitionAudio { uri },
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct RecognizeResponse {
    #[serde(default)]
    results: Vec<SpeechResult>,
}

#[derive(Debug, Deserialize)]
struct SpeechOperation {
    name: String,
    #[serde(default)]
    done: bool,
    error: Option<OperationStatus>,
    response: Option<RecognizeResponse>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SpeechResult {
    #[serde(default)]
    alternatives: Vec<Alternative>,
    channel_tag: Option<u32>,
    #[serde(default, with = "crate::domain::duration::option")]
    result_end_time: Option<Duration>,
}

#[derive(Debug, Clone, Deserialize)]
struct Alternative {
    #[serde(default)]
    transcript: String,
    #[serde(default)]
    confidence: f32,
    #[serde(default)]
    words: Vec<SpeechWord>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SpeechWord {
    word: String,
    #[serde(default, with = "crate::domain::duration::option")]
    start_time: Option<Duration>,
    #[serde(default, with = "crate::domain::duration::option")]
    end_time: Option<Duration>,
    #[serde(default)]
    confidence: f32,
    #[serde(default)]
    speaker_tag: u32,
}

impl SpeechWord {
    fn to_word_info(&self) -> WordInfo {
        WordInfo {
            word: self.word.clone(),
            start: self.start_time.unwrap_or_default(),
            end: self.end_time.unwrap_or_default(),
            confidence: self.confidence,
            speaker_tag: (self.speaker_tag > 0).then_some(self.speaker_tag),
        }
    }
}

// ============================================================================
// Transcript assembly
// ============================================================================

fn build_transcript(
    audio_uri: &str,
    language_code: &str,
    results: Vec<SpeechResult>,
    diarized: bool,
) -> Transcript {
    let mut transcript = Transcript::new(audio_uri, language_code);

    let speaker_result = if diarized {
        results.iter().rev().find(|r| {
            r.alternatives
                .first()
                .is_some_and(|alt| alt.words.iter().any(|w| w.speaker_tag > 0))
        })
    } else {
        None
    };

    transcript.utterances = match speaker_result {
        Some(result) => speaker_turns(result),
        None => channel_utterances(&results),
    };

    transcript
        .utterances
        .sort_by(|a, b| a.start.cmp(&b.start).then(a.channel_tag.cmp(&b.channel_tag)));
    transcript
}

/// One utterance per recognition result
fn channel_utterances(results: &[SpeechResult]) -> Vec<Utterance> {
    let mut previous_end: BTreeMap<u32, Duration> = BTreeMap::new();
    let mut utterances = Vec::new();

    for result in results {
        let Some(alt) = result.alternatives.first() else {
            continue;
        };
        let channel = result.channel_tag.unwrap_or(1);
        let text = alt.transcript.trim();
        if text.is_empty() {
            continue;
        }

        let words: Vec<WordInfo> = alt.words.iter().map(SpeechWord::to_word_info).collect();
        let start = words
            .first()
            .map(|w| w.start)
            .unwrap_or_else(|| previous_end.get(&channel).copied().unwrap_or_default());
        let end = result
            .result_end_time
            .or_else(|| words.last().map(|w| w.end))
            .unwrap_or(start)
            .max(start);
        previous_end.insert(channel, end);

        utterances.push(Utterance {
            channel_tag: channel,
            speaker_tag: None,
            text: text.to_string(),
            start,
            end,
            confidence: alt.confidence,
            words,
        });
    }

    utterances
}

/// Split the diarized word list into turns at each speaker change
fn speaker_turns(result: &SpeechResult) -> Vec<Utterance> {
    let channel = result.channel_tag.unwrap_or(1);
    let Some(alt) = result.alternatives.first() else {
        return Vec::new();
    };

    let mut turns: Vec<Vec<WordInfo>> = Vec::new();
    for word in alt.words.iter().map(SpeechWord::to_word_info) {
        match turns.last_mut() {
            Some(turn) if turn.last().map(|w| w.speaker_tag) == Some(word.speaker_tag) => {
                turn.push(word)
            }
            _ => turns.push(vec![word]),
        }
    }

    turns
        .into_iter()
        .filter_map(|words| {
            let first = words.first()?;
            let last = words.last()?;
            let confidence = if words.iter().all(|w| w.confidence == 0.0) {
                alt.confidence
            } else {
                words.iter().map(|w| w.confidence).sum::<f32>() / words.len() as f32
            };

            Some(Utterance {
                channel_tag: channel,
                speaker_tag: first.speaker_tag,
                text: words
                    .iter()
                    .map(|w| w.word.as_str())
                    .collect::<Vec<_>>()
                    .join(" "),
                start: first.start,
                end: last.end.max(first.start),
                confidence,
                words,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::{Matcher, Server, ServerGuard};

    use crate::config::DiarizationSettings;
    use crate::core::poll::PollSettings;

    fn settings() -> SpeechSettings {
        SpeechSettings {
            mode: RecognitionMode::LongRunning,
            encoding: "MULAW".to_string(),
            sample_rate_hertz: 8000,
            audio_channel_count: 2,
            language_code: "en-US".to_string(),
            model: "telephony".to_string(),
            use_enhanced: true,
            separate_recognition_per_channel: true,
            enable_automatic_punctuation: true,
            diarization: None,
            poll: PollSettings::new(Duration::from_secs(10), Duration::from_secs(600)),
        }
    }

    #[test]
    fn test_request_shape() {
        let mut settings = settings();
        settings.diarization = Some(DiarizationSettings {
            min_speakers: 2,
            max_speakers: 2,
        });

        let request = RecognizeRequest::new("gs://calls/merged_1.wav", &settings);
        let json = serde_json::to_value(&request).unwrap();

        assert_eq!(json["audio"]["uri"], "gs://calls/merged_1.wav");
        assert_eq!(json["config"]["sampleRateHertz"], 8000);
        assert_eq!(json["config"]["enableSeparateRecognitionPerChannel"], true);
        assert_eq!(json["config"]["enableWordTimeOffsets"], true);
        assert_eq!(json["config"]["diarizationConfig"]["maxSpeakerCount"], 2);
    }

    #[test]
    fn test_channel_results() {
        let body = r#"{"results": [
            {"alternatives": [{"transcript": "Thanks for calling", "confidence": 0.9,
              "words": [{"word": "Thanks", "startTime": "0.400s", "endTime": "0.800s", "confidence": 0.9}]}],
             "channelTag": 2, "resultEndTime": "1.500s"},
            {"alternatives": [{"transcript": "Hi, my card is blocked", "confidence": 0.8}],
             "channelTag": 1, "resultEndTime": "3s"},
            {"alternatives": [{"transcript": "   "}], "channelTag": 1}
        ]}"#;
        let response: RecognizeResponse = serde_json::from_str(body).unwrap();
        let transcript = build_transcript("gs://calls/a.wav", "en-US", response.results, false);

        assert_eq!(transcript.utterances.len(), 2);
        let first = &transcript.utterances[0];
        assert_eq!(first.channel_tag, 1);
        assert_eq!(first.start, Duration::ZERO);
        assert_eq!(first.end, Duration::from_secs(3));

        let second = &transcript.utterances[1];
        assert_eq!(second.channel_tag, 2);
        assert_eq!(second.start, Duration::from_millis(400));
        assert_eq!(second.words.len(), 1);
    }

    #[test]
    fn test_diarized_result_split_by_speaker() {
        let body = r#"{"results": [
            {"alternatives": [{"transcript": "hello there hi"}], "resultEndTime": "2s"},
            {"alternatives": [{"transcript": "", "confidence": 0.7, "words": [
                {"word": "hello", "startTime": "0s", "endTime": "0.5s", "speakerTag": 1},
                {"word": "there", "startTime": "0.5s", "endTime": "1s", "speakerTag": 1},
                {"word": "hi", "startTime": "1.2s", "endTime": "1.5s", "speakerTag": 2}
            ]}]}
        ]}"#;
        let response: RecognizeResponse = serde_json::from_str(body).unwrap();
        let transcript = build_transcript("gs://calls/a.wav", "en-US", response.results, true);

        assert_eq!(transcript.utterances.len(), 2);
        assert_eq!(transcript.utterances[0].text, "hello there");
        assert_eq!(transcript.utterances[0].speaker_tag, Some(1));
        assert_eq!(transcript.utterances[0].confidence, 0.7);
        assert_eq!(transcript.utterances[1].text, "hi");
        assert_eq!(transcript.utterances[1].start, Duration::from_millis(1200));
    }

    #[test]
    fn test_operation_snapshot() {
        let body = r#"{"name": "123", "done": true,
            "response": {"results": [{"alternatives": [{"transcript": "ok"}]}]}}"#;
        let op: SpeechOperation = serde_json::from_str(body).unwrap();
        assert!(op.done);
        assert_eq!(op.response.map(|r| r.results.len()), Some(1));

        let pending: SpeechOperation = serde_json::from_str(r#"{"name": "124"}"#).unwrap();
        assert!(!pending.done);
    }

    #[test]
    fn test_recognizer_url_is_regional() {
        let client = SpeechClient::new(GcpClient::new("t"));
        assert_eq!(
            client.recognizer_url("projects/p/locations/us-central1/recognizers/r"),
            "https://us-central1-speech.googleapis.com/v2/projects/p/locations/us-central1/recognizers/r"
        );
    }

    fn fast_polling() -> SpeechSettings {
        SpeechSettings {
            poll: PollSettings::new(Duration::from_millis(5), Duration::from_millis(40)),
            ..settings()
        }
    }

    fn submitted(server: &mut ServerGuard) -> mockito::Mock {
        server
            .mock("POST", "/v1/speech:longrunningrecognize")
            .match_header("authorization", "Bearer t")
            .match_body(Matcher::PartialJson(serde_json::json!({
                "audio": {"uri": "gs://calls/merged_1.wav"},
                "config": {"languageCode": "en-US"}
            })))
            .with_status(200)
            .with_body(r#"{"name":"op-7"}"#)
            .create()
    }

    #[tokio::test]
    async fn test_sync_recognition() {
        let mut server = Server::new_async().await;
        let _m = server
            .mock("POST", "/v1/speech:recognize")
            .with_status(200)
            .with_body(
                r#"{"results":[{"alternatives":[{"transcript":"hello","confidence":0.9}],
                    "channelTag":1,"resultEndTime":"2s"}]}"#,
            )
            .create();

        let client = SpeechClient::with_endpoint(GcpClient::new("t"), server.url());
        let settings = SpeechSettings {
            mode: RecognitionMode::Sync,
            ..settings()
        };
        let transcript = client
            .transcribe(&AudioReference::new("calls", "merged_1.wav"), &settings)
            .await
            .unwrap();

        assert_eq!(transcript.utterances.len(), 1);
        assert_eq!(transcript.utterances[0].text, "hello");
    }

    #[tokio::test]
    async fn test_long_running_polls_until_done() {
        let mut server = Server::new_async().await;
        let _submit = submitted(&mut server);
        let _op = server
            .mock("GET", "/v1/operations/op-7")
            .with_status(200)
            .with_body(
                r#"{"name":"op-7","done":true,"response":{"results":[
                    {"alternatives":[{"transcript":"thanks for calling"}],"channelTag":2}]}}"#,
            )
            .create();

        let client = SpeechClient::with_endpoint(GcpClient::new("t"), server.url());
        let transcript = client
            .transcribe(&AudioReference::new("calls", "merged_1.wav"), &fast_polling())
            .await
            .unwrap();

        assert_eq!(transcript.utterances.len(), 1);
        assert_eq!(transcript.utterances[0].channel_tag, 2);
    }

    #[tokio::test]
    async fn test_operation_error_is_transcription_failure() {
        let mut server = Server::new_async().await;
        let _submit = submitted(&mut server);
        let _op = server
            .mock("GET", "/v1/operations/op-7")
            .with_status(200)
            .with_body(r#"{"name":"op-7","done":true,"error":{"code":3,"message":"audio is empty"}}"#)
            .create();

        let client = SpeechClient::with_endpoint(GcpClient::new("t"), server.url());
        let err = client
            .transcribe(&AudioReference::new("calls", "merged_1.wav"), &fast_polling())
            .await
            .unwrap_err();

        assert!(matches!(err, PipelineError::Transcription { .. }));
        assert!(err.to_string().contains("operation op-7 failed: audio is empty (code 3)"));
    }

    #[tokio::test]
    async fn test_unfinished_operation_times_out() {
        let mut server = Server::new_async().await;
        let _submit = submitted(&mut server);
        let polled = server
            .mock("GET", "/v1/operations/op-7")
            .with_status(200)
            .with_body(r#"{"name":"op-7","done":false}"#)
            .expect_at_least(2)
            .create();

        let client = SpeechClient::with_endpoint(GcpClient::new("t"), server.url());
        let err = client
            .transcribe(&AudioReference::new("calls", "merged_1.wav"), &fast_polling())
            .await
            .unwrap_err();

        assert!(err.to_string().contains("operation op-7 did not finish within"));
        polled.assert_async().await;
    }

    #[tokio::test]
    async fn test_rejected_submission_maps_to_transcription_error() {
        let mut server = Server::new_async().await;
        let _m = server
            .mock("POST", "/v1/speech:longrunningrecognize")
            .with_status(429)
            .with_body(r#"{"error":{"code":429,"message":"Quota exceeded","status":"RESOURCE_EXHAUSTED"}}"#)
            .create();

        let client = SpeechClient::with_endpoint(GcpClient::new("t"), server.url());
        let err = client
            .transcribe(&AudioReference::new("calls", "merged_1.wav"), &fast_polling())
            .await
            .unwrap_err();

        assert!(matches!(err, PipelineError::Transcription { .. }));
        assert!(err.to_string().contains("HTTP 429: RESOURCE_EXHAUSTED: Quota exceeded"));
    }

    #[tokio::test]
    async fn test_missing_recognizer_is_configuration_error() {
        let mut server = Server::new_async().await;
        let _m = server
            .mock("GET", "/v2/projects/p/locations/us-central1/recognizers/r")
            .with_status(404)
            .with_body("")
            .create();

        let client = SpeechClient::with_endpoint(GcpClient::new("t"), server.url());
        let err = client
            .check_recognizer("projects/p/locations/us-central1/recognizers/r")
            .await
            .unwrap_err();

        assert!(matches!(err, PipelineError::Configuration(_)));
    }
}

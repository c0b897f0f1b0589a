//! Cloud speech-recognition adapter (OpenAI-compatible transcription API).

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::multipart;
use reqwest::Client;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::WhisperConfig;
use crate::credentials::resolve_api_key;
use crate::error::{Result, SubGenError};
use crate::llm::{truncate_error_body, validate_http_url};
use crate::subtitle::{Segment, Word};

use super::{forced_language, Recognizer, TranscribeOptions, TranscriptionOutput};

/// The OpenAI transcription endpoint rejects uploads above 25 MB.
const MAX_UPLOAD_BYTES: u64 = 25 * 1024 * 1024;

pub struct CloudRecognizer {
    client: Client,
    base_url: String,
    api_key: String,
    config: WhisperConfig,
}

#[derive(Debug, Deserialize)]
struct VerboseTranscription {
    #[serde(default)]
    language: String,
    #[serde(default)]
    segments: Vec<ApiSegment>,
    #[serde(default)]
    words: Vec<ApiWord>,
}

#[derive(Debug, Deserialize)]
struct ApiSegment {
    start: f64,
    end: f64,
    text: String,
    #[serde(default)]
    no_speech_prob: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct ApiWord {
    word: String,
    start: f64,
    end: f64,
}

impl CloudRecognizer {
    pub fn new(config: &WhisperConfig) -> Result<Self> {
        let api_key = resolve_api_key("cloud-api", None, config.api_key.as_deref())?;
        let base_url = match &config.base_url {
            Some(url) => validate_http_url(url)?,
            None => "https://api.openai.com/v1".to_string(),
        };
        Ok(Self {
            client: Client::new(),
            base_url,
            api_key,
            config: config.clone(),
        })
    }

    fn normalize(&self, parsed: VerboseTranscription) -> Result<TranscriptionOutput> {
        let mut segments = Vec::with_capacity(parsed.segments.len());
        for api_segment in parsed.segments {
            if !api_segment.start.is_finite()
                || !api_segment.end.is_finite()
                || api_segment.start < 0.0
                || api_segment.end < api_segment.start
            {
                return Err(SubGenError::BadTranscriptionOutput(format!(
                    "segment with invalid span [{}, {}]",
                    api_segment.start, api_segment.end
                )));
            }
            let text = api_segment.text.trim();
            if text.is_empty() {
                continue;
            }
            let mut segment = Segment::new(api_segment.start, api_segment.end, text);
            segment.no_speech_prob = api_segment.no_speech_prob;
            segments.push(segment);
        }

        // Word timestamps arrive as one flat list; attach each word to the
        // segment whose span contains it.
        for api_word in parsed.words {
            if !api_word.start.is_finite() || api_word.end < api_word.start {
                return Err(SubGenError::BadTranscriptionOutput(format!(
                    "word '{}' with invalid span",
                    api_word.word
                )));
            }
            let text = api_word.word.trim();
            if text.is_empty() {
                continue;
            }
            if let Some(segment) = segments
                .iter_mut()
                .find(|s| api_word.start >= s.start - 0.05 && api_word.end <= s.end + 0.05)
            {
                segment.words.push(Word::new(text, api_word.start, api_word.end));
            }
        }

        Ok(TranscriptionOutput {
            detected_lang: if parsed.language.is_empty() {
                "auto".to_string()
            } else {
                parsed.language
            },
            segments,
        })
    }
}

#[async_trait]
impl Recognizer for CloudRecognizer {
    async fn transcribe(
        &self,
        audio_path: &Path,
        options: &TranscribeOptions,
        cancel: &CancellationToken,
    ) -> Result<TranscriptionOutput> {
        let metadata = std::fs::metadata(audio_path).map_err(|e| SubGenError::io(audio_path, e))?;
        if metadata.len() > MAX_UPLOAD_BYTES {
            return Err(SubGenError::BadInput(format!(
                "Audio file ({:.1} MB) exceeds the provider's 25 MB upload limit. \
                 Use the local recognizer instead.",
                metadata.len() as f64 / 1024.0 / 1024.0
            )));
        }

        info!("uploading audio for cloud transcription");
        let bytes = tokio::fs::read(audio_path)
            .await
            .map_err(|e| SubGenError::io(audio_path, e))?;
        let file_name = audio_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "audio.wav".to_string());

        let mut form = multipart::Form::new()
            .part(
                "file",
                multipart::Part::bytes(bytes).file_name(file_name),
            )
            .text("model", "whisper-1")
            .text("response_format", "verbose_json")
            .text("timestamp_granularities[]", "segment")
            .text("timestamp_granularities[]", "word");
        if let Some(lang) = forced_language(options, &self.config) {
            form = form.text("language", lang.to_string());
        }

        let url = format!("{}/audio/transcriptions", self.base_url);
        let request = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .multipart(form)
            .timeout(Duration::from_secs(self.config.timeout_secs))
            .send();

        let response = tokio::select! {
            result = request => result.map_err(|e| {
                if e.is_timeout() {
                    SubGenError::Timeout {
                        operation: "cloud transcription".to_string(),
                        seconds: self.config.timeout_secs,
                    }
                } else {
                    SubGenError::Transcription(format!("upload failed: {}", e))
                }
            })?,
            _ = cancel.cancelled() => return Err(SubGenError::Cancelled),
        };

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(SubGenError::Transcription(format!(
                "cloud API error {}: {}",
                status,
                truncate_error_body(&body)
            )));
        }

        let parsed: VerboseTranscription = response.json().await.map_err(|e| {
            SubGenError::BadTranscriptionOutput(format!("unparseable API response: {}", e))
        })?;
        debug!(
            "cloud transcription returned {} segments, language {}",
            parsed.segments.len(),
            parsed.language
        );
        self.normalize(parsed)
    }

    fn provider_id(&self) -> &str {
        "cloud-api"
    }

    fn model_id(&self) -> &str {
        "whisper-1"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recognizer() -> CloudRecognizer {
        CloudRecognizer {
            client: Client::new(),
            base_url: "https://api.openai.com/v1".to_string(),
            api_key: "sk-test".to_string(),
            config: WhisperConfig::default(),
        }
    }

    #[test]
    fn test_normalize_attaches_words() {
        let parsed: VerboseTranscription = serde_json::from_str(
            r#"{
                "language": "en",
                "segments": [
                    {"start": 0.0, "end": 1.2, "text": " Hello. ", "no_speech_prob": 0.01},
                    {"start": 1.3, "end": 2.9, "text": "How are you?"}
                ],
                "words": [
                    {"word": "Hello.", "start": 0.0, "end": 1.1},
                    {"word": "How", "start": 1.3, "end": 1.7},
                    {"word": "are", "start": 1.7, "end": 2.4},
                    {"word": "you?", "start": 2.4, "end": 2.9}
                ]
            }"#,
        )
        .unwrap();

        let output = recognizer().normalize(parsed).unwrap();
        assert_eq!(output.detected_lang, "en");
        assert_eq!(output.segments.len(), 2);
        assert_eq!(output.segments[0].text, "Hello.");
        assert_eq!(output.segments[0].words.len(), 1);
        assert_eq!(output.segments[1].words.len(), 3);
    }

    #[test]
    fn test_normalize_rejects_bad_spans() {
        let parsed: VerboseTranscription = serde_json::from_str(
            r#"{"segments": [{"start": 2.0, "end": 1.0, "text": "backwards"}], "words": []}"#,
        )
        .unwrap();
        let err = recognizer().normalize(parsed).unwrap_err();
        assert!(matches!(err, SubGenError::BadTranscriptionOutput(_)));
    }
}

//! Local whisper.cpp adapter — spawns the managed binary and parses its
//! JSON output.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::components::ComponentManager;
use crate::config::WhisperConfig;
use crate::error::{Result, SubGenError};
use crate::subtitle::{Segment, Word};

use super::{forced_language, Recognizer, TranscribeOptions, TranscriptionOutput};

pub struct BinaryRecognizer {
    engine_path: PathBuf,
    model_path: PathBuf,
    model_name: String,
    config: WhisperConfig,
}

impl BinaryRecognizer {
    pub fn new(config: &WhisperConfig, components: &ComponentManager) -> Result<Self> {
        let engine_path = components
            .find_whisper_engine()
            .ok_or_else(|| SubGenError::MissingComponent {
                id: "whisper-cpp-cpu".to_string(),
            })?;
        let model_path = components.find_whisper_model(&config.model).ok_or_else(|| {
            SubGenError::MissingComponent {
                id: format!("model-whisper-{}", config.model),
            }
        })?;
        Ok(Self {
            engine_path,
            model_path,
            model_name: config.model.clone(),
            config: config.clone(),
        })
    }
}

#[async_trait]
impl Recognizer for BinaryRecognizer {
    async fn transcribe(
        &self,
        audio_path: &Path,
        options: &TranscribeOptions,
        cancel: &CancellationToken,
    ) -> Result<TranscriptionOutput> {
        // Output goes to a private temp directory (0700, random suffix) so
        // the JSON path cannot be predicted or pre-created by another user.
        let tmp_dir = tempfile::tempdir()
            .map_err(|e| SubGenError::Transcription(format!("temp dir creation failed: {}", e)))?;
        let output_base = tmp_dir.path().join("output");

        let threads = self.config.threads.unwrap_or(4);
        let mut cmd = Command::new(&self.engine_path);
        cmd.arg("-m")
            .arg(&self.model_path)
            .arg("-f")
            .arg(audio_path)
            .arg("--output-json-full")
            .arg("--print-progress")
            .arg("--split-on-word")
            .arg("-t")
            .arg(threads.to_string())
            .arg("-of")
            .arg(&output_base)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(lang) = forced_language(options, &self.config) {
            cmd.arg("-l").arg(lang);
        }

        info!("running whisper.cpp recognizer");
        debug!("recognizer input: {}", audio_path.display());
        let mut child = cmd
            .spawn()
            .map_err(|e| SubGenError::Transcription(format!("failed to spawn recognizer: {}", e)))?;

        // Drain stdout and stderr concurrently; a sequential read would
        // deadlock once either pipe buffer fills.
        let stdout = child.stdout.take().expect("stdout piped");
        let stderr = child.stderr.take().expect("stderr piped");
        let stdout_task = tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            let mut collected = String::new();
            while let Ok(Some(line)) = lines.next_line().await {
                collected.push_str(&line);
                collected.push('\n');
            }
            collected
        });
        let stderr_task = tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            let mut collected = String::new();
            while let Ok(Some(line)) = lines.next_line().await {
                if let Some(pct) = line.split("progress =").nth(1) {
                    debug!("recognizer progress: {}", pct.trim());
                }
                collected.push_str(&line);
                collected.push('\n');
            }
            collected
        });

        let timeout = Duration::from_secs(self.config.timeout_secs);
        let status = tokio::select! {
            result = tokio::time::timeout(timeout, child.wait()) => match result {
                Ok(status) => status.map_err(|e| {
                    SubGenError::Transcription(format!("recognizer wait failed: {}", e))
                })?,
                Err(_) => {
                    let _ = child.kill().await;
                    return Err(SubGenError::Timeout {
                        operation: "recognizer run".to_string(),
                        seconds: self.config.timeout_secs,
                    });
                }
            },
            _ = cancel.cancelled() => {
                let _ = child.kill().await;
                return Err(SubGenError::Cancelled);
            }
        };

        let stdout_text = stdout_task.await.unwrap_or_default();
        let stderr_text = stderr_task.await.unwrap_or_default();

        if !status.success() {
            let tail: String = stderr_text
                .lines()
                .rev()
                .take(10)
                .collect::<Vec<_>>()
                .into_iter()
                .rev()
                .collect::<Vec<_>>()
                .join("\n");
            return Err(SubGenError::Transcription(format!(
                "whisper.cpp exited with {}: {}",
                status, tail
            )));
        }

        let json_path = output_base.with_extension("json");
        let json_text = std::fs::read_to_string(&json_path).map_err(|_| {
            SubGenError::BadTranscriptionOutput(format!(
                "recognizer produced no JSON output (stdout: {})",
                &stdout_text.chars().take(300).collect::<String>()
            ))
        })?;

        parse_whisper_json(&json_text)
    }

    fn provider_id(&self) -> &str {
        "cpp-binary"
    }

    fn model_id(&self) -> &str {
        &self.model_name
    }
}

/// Parse whisper.cpp `--output-json-full` output into segments with merged
/// word timestamps.
pub fn parse_whisper_json(json_text: &str) -> Result<TranscriptionOutput> {
    let data: Value = serde_json::from_str(json_text).map_err(|e| {
        SubGenError::BadTranscriptionOutput(format!(
            "invalid JSON from recognizer: {} (first 200 chars: {})",
            e,
            &json_text.chars().take(200).collect::<String>()
        ))
    })?;

    let transcription = data
        .get("transcription")
        .and_then(Value::as_array)
        .ok_or_else(|| {
            SubGenError::BadTranscriptionOutput(
                "recognizer output missing 'transcription' array".to_string(),
            )
        })?;

    let detected_lang = data
        .pointer("/result/language")
        .and_then(Value::as_str)
        .unwrap_or("auto")
        .to_string();

    let mut segments = Vec::with_capacity(transcription.len());
    for (index, item) in transcription.iter().enumerate() {
        let offsets = item.get("offsets").ok_or_else(|| {
            SubGenError::BadTranscriptionOutput(format!("segment {} missing offsets", index))
        })?;
        let start_ms = offsets.get("from").and_then(Value::as_i64).ok_or_else(|| {
            SubGenError::BadTranscriptionOutput(format!("segment {} has bad start offset", index))
        })?;
        let end_ms = offsets.get("to").and_then(Value::as_i64).ok_or_else(|| {
            SubGenError::BadTranscriptionOutput(format!("segment {} has bad end offset", index))
        })?;
        if start_ms < 0 || end_ms < start_ms {
            return Err(SubGenError::BadTranscriptionOutput(format!(
                "segment {} has invalid offsets [{}, {}]",
                index, start_ms, end_ms
            )));
        }

        let text = item
            .get("text")
            .and_then(Value::as_str)
            .unwrap_or("")
            .trim()
            .to_string();
        if text.is_empty() {
            continue;
        }

        let mut segment = Segment::new(start_ms as f64 / 1000.0, end_ms as f64 / 1000.0, text);
        segment.no_speech_prob = item.get("no_speech_prob").and_then(Value::as_f64);

        if let Some(tokens) = item.get("tokens").and_then(Value::as_array) {
            segment.words = merge_tokens_into_words(tokens);
        }
        segments.push(segment);
    }

    Ok(TranscriptionOutput {
        segments,
        detected_lang,
    })
}

/// Merge whisper.cpp BPE token fragments into words. A token starting with
/// a space begins a new word; tokens without a leading space continue the
/// previous one. `[_..._]` control tokens are skipped.
fn merge_tokens_into_words(tokens: &[Value]) -> Vec<Word> {
    let mut words: Vec<Word> = Vec::new();
    let mut current: Option<Word> = None;

    for token in tokens {
        let text = token.get("text").and_then(Value::as_str).unwrap_or("");
        if text.starts_with("[_") && text.ends_with(']') {
            continue;
        }
        if text.trim().is_empty() {
            continue;
        }
        let Some(offsets) = token.get("offsets") else {
            continue;
        };
        let (Some(from), Some(to)) = (
            offsets.get("from").and_then(Value::as_i64),
            offsets.get("to").and_then(Value::as_i64),
        ) else {
            continue;
        };
        let start = from as f64 / 1000.0;
        let end = to as f64 / 1000.0;

        if text.starts_with(' ') {
            if let Some(word) = current.take() {
                words.push(word);
            }
            current = Some(Word::new(text.trim_start(), start, end));
        } else {
            match current.as_mut() {
                Some(word) => {
                    word.text.push_str(text);
                    word.end = end;
                }
                None => current = Some(Word::new(text, start, end)),
            }
        }
    }
    if let Some(word) = current {
        words.push(word);
    }
    words
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_whisper_json() {
        let json = r#"{
            "result": {"language": "en"},
            "transcription": [
                {
                    "offsets": {"from": 0, "to": 1200},
                    "text": " Hello.",
                    "no_speech_prob": 0.02,
                    "tokens": [
                        {"text": "[_BEG_]", "offsets": {"from": 0, "to": 0}},
                        {"text": " Hel", "offsets": {"from": 0, "to": 600}},
                        {"text": "lo.", "offsets": {"from": 600, "to": 1100}}
                    ]
                },
                {
                    "offsets": {"from": 1300, "to": 2400},
                    "text": " How are",
                    "tokens": [
                        {"text": " How", "offsets": {"from": 1300, "to": 1700}},
                        {"text": " are", "offsets": {"from": 1700, "to": 2400}}
                    ]
                }
            ]
        }"#;

        let output = parse_whisper_json(json).unwrap();
        assert_eq!(output.detected_lang, "en");
        assert_eq!(output.segments.len(), 2);
        assert_eq!(output.segments[0].text, "Hello.");
        assert_eq!(output.segments[0].start, 0.0);
        assert_eq!(output.segments[0].end, 1.2);
        // BPE fragments " Hel" + "lo." merge into one word.
        assert_eq!(output.segments[0].words.len(), 1);
        assert_eq!(output.segments[0].words[0].text, "Hello.");
        assert_eq!(output.segments[1].words.len(), 2);
    }

    #[test]
    fn test_parse_rejects_missing_transcription() {
        let err = parse_whisper_json(r#"{"result": {}}"#).unwrap_err();
        assert!(matches!(err, SubGenError::BadTranscriptionOutput(_)));
    }

    #[test]
    fn test_parse_rejects_invalid_offsets() {
        let json = r#"{
            "transcription": [
                {"offsets": {"from": 500, "to": 100}, "text": "backwards"}
            ]
        }"#;
        let err = parse_whisper_json(json).unwrap_err();
        assert!(matches!(err, SubGenError::BadTranscriptionOutput(_)));
    }

    #[test]
    fn test_parse_rejects_garbage() {
        let err = parse_whisper_json("this is not json").unwrap_err();
        assert!(matches!(err, SubGenError::BadTranscriptionOutput(_)));
    }

    #[test]
    fn test_merge_skips_special_tokens() {
        let tokens: Vec<Value> = serde_json::from_str(
            r#"[
                {"text": "[_TT_250]", "offsets": {"from": 0, "to": 0}},
                {"text": " word", "offsets": {"from": 0, "to": 500}}
            ]"#,
        )
        .unwrap();
        let words = merge_tokens_into_words(&tokens);
        assert_eq!(words.len(), 1);
        assert_eq!(words[0].text, "word");
    }
}

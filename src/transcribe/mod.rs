//! Speech recognition backends behind one trait.
//!
//! Two adapters exist: a cloud API client and a local whisper.cpp binary
//! driver. Both normalize their output into [`Segment`]s and report the
//! language the recognizer detected.

pub mod binary;
pub mod cloud;

use async_trait::async_trait;
use std::path::Path;

use tokio_util::sync::CancellationToken;

use crate::components::ComponentManager;
use crate::config::WhisperConfig;
use crate::error::{Result, SubGenError};
use crate::subtitle::Segment;

/// Recognition result: segments plus the language the backend detected.
#[derive(Debug, Clone)]
pub struct TranscriptionOutput {
    pub segments: Vec<Segment>,
    pub detected_lang: String,
}

/// Per-run options, separate from the static config.
#[derive(Debug, Clone, Default)]
pub struct TranscribeOptions {
    /// Forced source language; `None` or `auto` lets the backend detect.
    pub language: Option<String>,
}

#[async_trait]
pub trait Recognizer: Send + Sync {
    async fn transcribe(
        &self,
        audio_path: &Path,
        options: &TranscribeOptions,
        cancel: &CancellationToken,
    ) -> Result<TranscriptionOutput>;

    /// Stable identifier used in cache fingerprints.
    fn provider_id(&self) -> &str;

    fn model_id(&self) -> &str;
}

/// Build the configured recognizer.
pub fn create_recognizer(
    config: &WhisperConfig,
    components: &ComponentManager,
) -> Result<Box<dyn Recognizer>> {
    match config.provider.as_str() {
        "cloud-api" | "openai" => Ok(Box::new(cloud::CloudRecognizer::new(config)?)),
        "cpp-binary" | "local" => Ok(Box::new(binary::BinaryRecognizer::new(config, components)?)),
        other => Err(SubGenError::bad_config(
            "whisper.provider",
            format!(
                "unsupported provider '{}'. Supported: cloud-api, cpp-binary",
                other
            ),
        )),
    }
}

/// Normalize a forced-language option: `auto` and empty mean "detect".
pub(crate) fn forced_language<'a>(
    options: &'a TranscribeOptions,
    config: &'a WhisperConfig,
) -> Option<&'a str> {
    let lang = options
        .language
        .as_deref()
        .unwrap_or(config.source_language.as_str());
    (!lang.is_empty() && lang != "auto").then_some(lang)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forced_language() {
        let config = WhisperConfig::default();
        let options = TranscribeOptions::default();
        assert_eq!(forced_language(&options, &config), None);

        let options = TranscribeOptions {
            language: Some("en".to_string()),
        };
        assert_eq!(forced_language(&options, &config), Some("en"));

        let options = TranscribeOptions {
            language: Some("auto".to_string()),
        };
        assert_eq!(forced_language(&options, &config), None);
    }

    #[test]
    fn test_unknown_provider_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let components = ComponentManager::with_base_dir(dir.path().to_path_buf()).unwrap();
        let config = WhisperConfig {
            provider: "telepathy".to_string(),
            ..WhisperConfig::default()
        };
        assert!(matches!(
            create_recognizer(&config, &components),
            Err(SubGenError::BadConfig { .. })
        ));
    }
}

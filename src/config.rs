use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{Result, SubGenError};

fn default_provider_local() -> String {
    "local".to_string()
}

fn default_whisper_model() -> String {
    "large-v3".to_string()
}

fn default_translation_provider() -> String {
    "openai".to_string()
}

fn default_translation_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_ollama_host() -> String {
    "http://localhost:11434".to_string()
}

fn default_auto() -> String {
    "auto".to_string()
}

fn default_target_lang() -> String {
    "zh".to_string()
}

fn default_format() -> String {
    "srt".to_string()
}

fn default_max_chars() -> usize {
    42
}

fn default_batch_size() -> usize {
    20
}

fn default_context_groups() -> usize {
    5
}

fn default_max_gap_sec() -> f64 {
    1.5
}

fn default_max_group_size() -> usize {
    10
}

fn default_group_char_budget() -> usize {
    400
}

fn default_retry_count() -> u32 {
    2
}

fn default_proofread_batch() -> usize {
    50
}

fn default_proofread_context_chars() -> usize {
    15_000
}

fn default_llm_concurrency() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get().min(4))
        .unwrap_or(4)
}

fn default_download_concurrency() -> usize {
    2
}

fn default_temperature() -> f32 {
    0.3
}

fn default_llm_timeout_secs() -> u64 {
    120
}

fn default_extract_timeout_secs() -> u64 {
    300
}

fn default_transcribe_timeout_secs() -> u64 {
    900
}

fn default_style_preset() -> String {
    "default".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub whisper: WhisperConfig,
    #[serde(default)]
    pub translation: TranslationConfig,
    #[serde(default)]
    pub output: OutputConfig,
    #[serde(default)]
    pub styles: StylesConfig,
    #[serde(default)]
    pub advanced: AdvancedConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WhisperConfig {
    /// Recognizer backend: `cloud-api` or `cpp-binary` (the legacy value
    /// `local` is accepted as an alias for `cpp-binary`).
    #[serde(default = "default_provider_local")]
    pub provider: String,
    #[serde(default = "default_whisper_model")]
    pub model: String,
    /// Forced source language; `auto` lets the recognizer detect it.
    #[serde(default = "default_auto")]
    pub source_language: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub threads: Option<u32>,
    #[serde(default = "default_transcribe_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for WhisperConfig {
    fn default() -> Self {
        Self {
            provider: default_provider_local(),
            model: default_whisper_model(),
            source_language: default_auto(),
            api_key: None,
            base_url: None,
            threads: None,
            timeout_secs: default_transcribe_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TranslationConfig {
    #[serde(default = "default_translation_provider")]
    pub provider: String,
    #[serde(default = "default_translation_model")]
    pub model: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default = "default_ollama_host")]
    pub ollama_host: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_llm_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for TranslationConfig {
    fn default() -> Self {
        Self {
            provider: default_translation_provider(),
            model: default_translation_model(),
            api_key: None,
            base_url: None,
            ollama_host: default_ollama_host(),
            temperature: default_temperature(),
            timeout_secs: default_llm_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OutputConfig {
    #[serde(default = "default_format")]
    pub format: String,
    #[serde(default = "default_auto")]
    pub source_language: String,
    #[serde(default = "default_target_lang")]
    pub target_language: String,
    #[serde(default)]
    pub bilingual: bool,
    #[serde(default = "default_max_chars")]
    pub max_chars_per_line: usize,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            format: default_format(),
            source_language: default_auto(),
            target_language: default_target_lang(),
            bilingual: false,
            max_chars_per_line: default_max_chars(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StylesConfig {
    #[serde(default = "default_style_preset")]
    pub preset: String,
    #[serde(default)]
    pub primary_font: Option<String>,
    #[serde(default)]
    pub primary_color: Option<String>,
    #[serde(default)]
    pub secondary_font: Option<String>,
    #[serde(default)]
    pub secondary_color: Option<String>,
}

impl Default for StylesConfig {
    fn default() -> Self {
        Self {
            preset: default_style_preset(),
            primary_font: None,
            primary_color: None,
            secondary_font: None,
            secondary_color: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AdvancedConfig {
    #[serde(default = "default_batch_size")]
    pub translation_batch_size: usize,
    #[serde(default = "default_context_groups")]
    pub translation_context_groups: usize,
    #[serde(default = "default_max_gap_sec")]
    pub sentence_max_gap_sec: f64,
    #[serde(default = "default_max_group_size")]
    pub sentence_max_group_size: usize,
    #[serde(default = "default_group_char_budget")]
    pub sentence_char_budget: usize,
    #[serde(default = "default_retry_count")]
    pub translation_retries: u32,
    #[serde(default = "default_proofread_batch")]
    pub proofread_batch_size: usize,
    #[serde(default = "default_proofread_context_chars")]
    pub proofread_context_chars: usize,
    #[serde(default = "default_llm_concurrency")]
    pub llm_concurrency: usize,
    #[serde(default = "default_download_concurrency")]
    pub download_concurrency: usize,
    #[serde(default = "default_extract_timeout_secs")]
    pub extract_timeout_secs: u64,
    #[serde(default)]
    pub temp_dir: Option<PathBuf>,
    #[serde(default)]
    pub keep_temp_files: bool,
    #[serde(default)]
    pub rules_dir: Option<PathBuf>,
}

impl Default for AdvancedConfig {
    fn default() -> Self {
        Self {
            translation_batch_size: default_batch_size(),
            translation_context_groups: default_context_groups(),
            sentence_max_gap_sec: default_max_gap_sec(),
            sentence_max_group_size: default_max_group_size(),
            sentence_char_budget: default_group_char_budget(),
            translation_retries: default_retry_count(),
            proofread_batch_size: default_proofread_batch(),
            proofread_context_chars: default_proofread_context_chars(),
            llm_concurrency: default_llm_concurrency(),
            download_concurrency: default_download_concurrency(),
            extract_timeout_secs: default_extract_timeout_secs(),
            temp_dir: None,
            keep_temp_files: false,
            rules_dir: None,
        }
    }
}

const KNOWN_SECTIONS: &[&str] = &["whisper", "translation", "output", "styles", "advanced", "llm"];

impl Config {
    /// Load from an explicit path, or search `./config.yaml` then
    /// `~/.subgen/config.yaml`, falling back to defaults.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            if !path.exists() {
                return Err(SubGenError::BadInput(format!(
                    "Config file not found: {}",
                    path.display()
                )));
            }
            return Self::from_file(path);
        }
        let candidates = [PathBuf::from("config.yaml"), subgen_dir().join("config.yaml")];
        for candidate in &candidates {
            if candidate.exists() {
                return Self::from_file(candidate);
            }
        }
        Ok(Self::default())
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| SubGenError::io(path, e))?;
        Self::from_yaml(&content)
    }

    pub fn from_yaml(content: &str) -> Result<Self> {
        let raw: serde_yaml::Value = serde_yaml::from_str(content)
            .map_err(|e| SubGenError::bad_config("<root>", e.to_string()))?;

        let mut mapping = match raw {
            serde_yaml::Value::Null => serde_yaml::Mapping::new(),
            serde_yaml::Value::Mapping(m) => m,
            other => {
                return Err(SubGenError::bad_config(
                    "<root>",
                    format!("expected a mapping, got {}", yaml_type_name(&other)),
                ))
            }
        };

        for key in mapping.keys() {
            if let Some(name) = key.as_str() {
                if !KNOWN_SECTIONS.contains(&name) {
                    warn!("ignoring unknown config section '{}'", name);
                }
            }
        }

        // Legacy location for translator credentials: an `llm:` section is
        // merged into `translation:` with a deprecation warning.
        if let Some(legacy) = mapping.remove(&serde_yaml::Value::from("llm")) {
            warn!("config section 'llm' is deprecated; move these keys under 'translation'");
            let translation = mapping
                .entry(serde_yaml::Value::from("translation"))
                .or_insert_with(|| serde_yaml::Value::Mapping(serde_yaml::Mapping::new()));
            if let (serde_yaml::Value::Mapping(target), serde_yaml::Value::Mapping(source)) =
                (translation, legacy)
            {
                for (k, v) in source {
                    target.entry(k).or_insert(v);
                }
            }
        }

        let filtered: serde_yaml::Mapping = mapping
            .into_iter()
            .filter(|(k, _)| k.as_str().is_some_and(|name| KNOWN_SECTIONS.contains(&name)))
            .collect();

        serde_yaml::from_value(serde_yaml::Value::Mapping(filtered)).map_err(|e| {
            let location = e
                .location()
                .map(|l| format!("line {}, column {}", l.line(), l.column()))
                .unwrap_or_else(|| "<unknown>".to_string());
            SubGenError::bad_config(location, e.to_string())
        })
    }

    /// Serialize and write with owner-only permissions set at creation.
    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        let content = serde_yaml::to_string(self)
            .map_err(|e| SubGenError::bad_config("<serialize>", e.to_string()))?;
        write_private(path, content.as_bytes())
    }

    /// Resolved temp directory for extracted audio.
    pub fn temp_dir(&self) -> PathBuf {
        self.advanced
            .temp_dir
            .clone()
            .unwrap_or_else(|| std::env::temp_dir().join("subgen"))
    }
}

fn yaml_type_name(value: &serde_yaml::Value) -> &'static str {
    match value {
        serde_yaml::Value::Null => "null",
        serde_yaml::Value::Bool(_) => "bool",
        serde_yaml::Value::Number(_) => "number",
        serde_yaml::Value::String(_) => "string",
        serde_yaml::Value::Sequence(_) => "sequence",
        serde_yaml::Value::Mapping(_) => "mapping",
        serde_yaml::Value::Tagged(_) => "tagged value",
    }
}

/// The SubGen user data root (`~/.subgen/`).
pub fn subgen_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".subgen")
}

/// Write a sensitive file with 0600 permissions from creation, never
/// chmod-after-write.
pub fn write_private(path: &Path, content: &[u8]) -> Result<()> {
    use std::io::Write;

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| SubGenError::io(parent, e))?;
    }

    let mut options = std::fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    let mut file = options.open(path).map_err(|e| SubGenError::io(path, e))?;
    file.write_all(content).map_err(|e| SubGenError::io(path, e))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.whisper.provider, "local");
        assert_eq!(config.output.target_language, "zh");
        assert_eq!(config.advanced.translation_batch_size, 20);
        assert_eq!(config.advanced.sentence_max_group_size, 10);
        assert!(config.advanced.llm_concurrency >= 1 && config.advanced.llm_concurrency <= 4);
    }

    #[test]
    fn test_partial_yaml_merges_defaults() {
        let config = Config::from_yaml("output:\n  target_language: ja\n").unwrap();
        assert_eq!(config.output.target_language, "ja");
        assert_eq!(config.whisper.model, "large-v3");
    }

    #[test]
    fn test_wrong_type_is_bad_config() {
        let err = Config::from_yaml("advanced:\n  translation_batch_size: lots\n").unwrap_err();
        assert!(matches!(err, SubGenError::BadConfig { .. }));
    }

    #[test]
    fn test_non_mapping_root_is_bad_config() {
        let err = Config::from_yaml("- just\n- a\n- list\n").unwrap_err();
        assert!(matches!(err, SubGenError::BadConfig { .. }));
    }

    #[test]
    fn test_unknown_section_ignored() {
        let config = Config::from_yaml("bogus:\n  x: 1\noutput:\n  bilingual: true\n").unwrap();
        assert!(config.output.bilingual);
    }

    #[test]
    fn test_legacy_llm_section_merged() {
        let config =
            Config::from_yaml("llm:\n  provider: deepseek\n  model: deepseek-chat\n").unwrap();
        assert_eq!(config.translation.provider, "deepseek");
        assert_eq!(config.translation.model, "deepseek-chat");
    }

    #[test]
    fn test_translation_section_wins_over_legacy() {
        let yaml = "translation:\n  provider: ollama\nllm:\n  provider: deepseek\n";
        let config = Config::from_yaml(yaml).unwrap();
        assert_eq!(config.translation.provider, "ollama");
    }

    #[test]
    fn test_empty_file_is_defaults() {
        let config = Config::from_yaml("").unwrap();
        assert_eq!(config, Config::default());
    }
}

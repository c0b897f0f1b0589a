//! LLM provider contract.
//!
//! Every provider adapter implements [`LlmClient`]; the engine and the
//! translators only ever see the trait object built by [`create_client`].

pub mod claude;
pub mod ollama;
pub mod openai;

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Url;

use crate::config::TranslationConfig;
use crate::credentials::resolve_api_key;
use crate::error::{Result, SubGenError};

/// Cap on error-body text surfaced in errors, so response bodies never leak
/// credentials or PII into logs wholesale.
pub const MAX_ERROR_BODY_BYTES: usize = 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ChatParams {
    pub temperature: f32,
    pub timeout: Duration,
}

impl Default for ChatParams {
    fn default() -> Self {
        Self {
            temperature: 0.3,
            timeout: Duration::from_secs(120),
        }
    }
}

/// Uniform chat-completion interface over the supported providers.
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Send a conversation and return the assistant's text.
    async fn chat(&self, messages: &[ChatMessage], params: &ChatParams) -> Result<String>;

    fn name(&self) -> &str;

    fn model(&self) -> &str;

    fn requires_auth(&self) -> bool;
}

/// Build the configured provider adapter.
///
/// Any key the provider needs but the config lacks is a typed error here,
/// before the first request goes out.
pub fn create_client(config: &TranslationConfig) -> Result<Box<dyn LlmClient>> {
    match config.provider.as_str() {
        "openai" => {
            let api_key = resolve_api_key("openai", None, config.api_key.as_deref())?;
            let base_url = match &config.base_url {
                Some(url) => validate_http_url(url)?,
                None => "https://api.openai.com/v1".to_string(),
            };
            Ok(Box::new(openai::OpenAiClient::new(
                "openai",
                base_url,
                api_key,
                config.model.clone(),
            )))
        }
        "deepseek" => {
            let api_key = resolve_api_key("deepseek", None, config.api_key.as_deref())?;
            Ok(Box::new(openai::OpenAiClient::new(
                "deepseek",
                "https://api.deepseek.com/v1".to_string(),
                api_key,
                config.model.clone(),
            )))
        }
        "claude" => {
            let api_key = resolve_api_key("claude", None, config.api_key.as_deref())?;
            Ok(Box::new(claude::ClaudeClient::new(api_key, config.model.clone())))
        }
        "ollama" => {
            let host = validate_http_url(&config.ollama_host)?;
            Ok(Box::new(ollama::OllamaClient::new(host, config.model.clone())))
        }
        other => Err(SubGenError::bad_config(
            "translation.provider",
            format!(
                "unsupported provider '{}'. Supported: openai, deepseek, claude, ollama",
                other
            ),
        )),
    }
}

/// Validate a provider endpoint as an absolute `http`/`https` URL and
/// normalize away a trailing slash.
pub fn validate_http_url(url: &str) -> Result<String> {
    let parsed = Url::parse(url)
        .map_err(|e| SubGenError::bad_config("translation.base_url", format!("{}: {}", url, e)))?;
    match parsed.scheme() {
        "http" | "https" => Ok(url.trim_end_matches('/').to_string()),
        scheme => Err(SubGenError::bad_config(
            "translation.base_url",
            format!("'{}' must use http or https, got '{}'", url, scheme),
        )),
    }
}

/// Truncate an HTTP error body before it reaches an error message.
pub fn truncate_error_body(body: &str) -> String {
    if body.len() <= MAX_ERROR_BODY_BYTES {
        return body.to_string();
    }
    let mut end = MAX_ERROR_BODY_BYTES;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}… ({} bytes truncated)", &body[..end], body.len() - end)
}

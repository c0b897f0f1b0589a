//! Anthropic messages API adapter.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;

use crate::error::{Result, SubGenError};

use super::{truncate_error_body, ChatMessage, ChatParams, LlmClient, Role};

const MESSAGES_URL: &str = "https://api.anthropic.com/v1/messages";
const API_VERSION: &str = "2023-06-01";
const MAX_TOKENS: u32 = 4096;

pub struct ClaudeClient {
    client: Client,
    api_key: String,
    model: String,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    content: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(default)]
    text: String,
}

impl ClaudeClient {
    pub fn new(api_key: String, model: String) -> Self {
        Self {
            client: Client::new(),
            api_key,
            model,
        }
    }
}

#[async_trait]
impl LlmClient for ClaudeClient {
    async fn chat(&self, messages: &[ChatMessage], params: &ChatParams) -> Result<String> {
        // The messages API takes the system prompt as a top-level field.
        let system: String = messages
            .iter()
            .filter(|m| m.role == Role::System)
            .map(|m| m.content.as_str())
            .collect::<Vec<_>>()
            .join("\n\n");
        let turns: Vec<_> = messages
            .iter()
            .filter(|m| m.role != Role::System)
            .map(|m| json!({"role": m.role.as_str(), "content": m.content}))
            .collect();

        let mut payload = json!({
            "model": self.model,
            "max_tokens": MAX_TOKENS,
            "messages": turns,
            "temperature": params.temperature,
        });
        if !system.is_empty() {
            payload["system"] = json!(system);
        }

        let response = self
            .client
            .post(MESSAGES_URL)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .json(&payload)
            .timeout(params.timeout)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    SubGenError::Timeout {
                        operation: "claude chat".to_string(),
                        seconds: params.timeout.as_secs(),
                    }
                } else {
                    SubGenError::Translation(format!("claude request failed: {}", e))
                }
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(SubGenError::Translation(format!(
                "claude API error {}: {}",
                status,
                truncate_error_body(&body)
            )));
        }

        let parsed: MessagesResponse = response.json().await.map_err(|e| {
            SubGenError::Translation(format!("claude returned unparseable response: {}", e))
        })?;
        parsed
            .content
            .into_iter()
            .next()
            .map(|block| block.text.trim().to_string())
            .ok_or_else(|| SubGenError::Translation("claude returned no content".to_string()))
    }

    fn name(&self) -> &str {
        "claude"
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn requires_auth(&self) -> bool {
        true
    }
}

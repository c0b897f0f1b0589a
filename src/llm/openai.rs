//! OpenAI-compatible chat adapter, also used for DeepSeek via its
//! compatible endpoint.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use crate::error::{Result, SubGenError};

use super::{truncate_error_body, ChatMessage, ChatParams, LlmClient};

pub struct OpenAiClient {
    name: String,
    client: Client,
    base_url: String,
    api_key: String,
    model: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: Message,
}

#[derive(Debug, Deserialize)]
struct Message {
    content: String,
}

impl OpenAiClient {
    pub fn new(name: &str, base_url: String, api_key: String, model: String) -> Self {
        Self {
            name: name.to_string(),
            client: Client::new(),
            base_url,
            api_key,
            model,
        }
    }
}

#[async_trait]
impl LlmClient for OpenAiClient {
    async fn chat(&self, messages: &[ChatMessage], params: &ChatParams) -> Result<String> {
        let url = format!("{}/chat/completions", self.base_url);
        let payload: Vec<_> = messages
            .iter()
            .map(|m| json!({"role": m.role.as_str(), "content": m.content}))
            .collect();

        debug!("chat request to {} ({} messages)", self.name, messages.len());

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&json!({
                "model": self.model,
                "messages": payload,
                "temperature": params.temperature,
            }))
            .timeout(params.timeout)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    SubGenError::Timeout {
                        operation: format!("{} chat", self.name),
                        seconds: params.timeout.as_secs(),
                    }
                } else {
                    SubGenError::Translation(format!("{} request failed: {}", self.name, e))
                }
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(SubGenError::Translation(format!(
                "{} API error {}: {}",
                self.name,
                status,
                truncate_error_body(&body)
            )));
        }

        let chat: ChatResponse = response.json().await.map_err(|e| {
            SubGenError::Translation(format!("{} returned unparseable response: {}", self.name, e))
        })?;
        chat.choices
            .into_iter()
            .next()
            .map(|c| c.message.content.trim().to_string())
            .ok_or_else(|| {
                SubGenError::Translation(format!("{} returned no choices", self.name))
            })
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn requires_auth(&self) -> bool {
        true
    }
}

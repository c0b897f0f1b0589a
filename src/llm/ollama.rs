//! Local Ollama chat adapter.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;

use crate::error::{Result, SubGenError};

use super::{truncate_error_body, ChatMessage, ChatParams, LlmClient};

pub struct OllamaClient {
    client: Client,
    host: String,
    model: String,
}

#[derive(Debug, Deserialize)]
struct OllamaChatResponse {
    message: OllamaMessage,
}

#[derive(Debug, Deserialize)]
struct OllamaMessage {
    content: String,
}

impl OllamaClient {
    pub fn new(host: String, model: String) -> Self {
        Self {
            client: Client::new(),
            host,
            model,
        }
    }

    /// Verify the server is reachable and the model is pulled.
    pub async fn check_availability(&self) -> Result<()> {
        let url = format!("{}/api/show", self.host);
        let response = self
            .client
            .post(&url)
            .json(&json!({"name": self.model}))
            .send()
            .await
            .map_err(|e| {
                SubGenError::Translation(format!(
                    "Cannot connect to Ollama at {}. Is it running? Start with: ollama serve ({})",
                    self.host, e
                ))
            })?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(SubGenError::Translation(format!(
                "Ollama model '{}' not found. Pull it first: ollama pull {}",
                self.model, self.model
            )))
        }
    }
}

#[async_trait]
impl LlmClient for OllamaClient {
    async fn chat(&self, messages: &[ChatMessage], params: &ChatParams) -> Result<String> {
        let url = format!("{}/api/chat", self.host);
        let payload: Vec<_> = messages
            .iter()
            .map(|m| json!({"role": m.role.as_str(), "content": m.content}))
            .collect();

        let response = self
            .client
            .post(&url)
            .json(&json!({
                "model": self.model,
                "messages": payload,
                "stream": false,
                "options": {"temperature": params.temperature},
            }))
            .timeout(params.timeout)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    SubGenError::Timeout {
                        operation: "ollama chat".to_string(),
                        seconds: params.timeout.as_secs(),
                    }
                } else if e.is_connect() {
                    SubGenError::Translation(format!(
                        "Cannot connect to Ollama at {}. Is it running? Start with: ollama serve",
                        self.host
                    ))
                } else {
                    SubGenError::Translation(format!("ollama request failed: {}", e))
                }
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(SubGenError::Translation(format!(
                "ollama API error {}: {}",
                status,
                truncate_error_body(&body)
            )));
        }

        let parsed: OllamaChatResponse = response.json().await.map_err(|e| {
            SubGenError::Translation(format!("ollama returned unparseable response: {}", e))
        })?;
        Ok(parsed.message.content.trim().to_string())
    }

    fn name(&self) -> &str {
        "ollama"
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn requires_auth(&self) -> bool {
        false
    }
}

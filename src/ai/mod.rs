//! AI-completion capability.
//!
//! All AI-category node handlers depend on an external completion service
//! only through this trait: send chat messages, get text back, plus a text
//! embedding call. The HTTP implementation targets an OpenAI-compatible
//! endpoint; tests substitute a scripted client.

use crate::error::EngineError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// One turn of a chat conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

/// Sampling options forwarded to the completion service.
#[derive(Debug, Clone, Default)]
pub struct CompletionOptions {
    pub temperature: Option<f64>,
    pub max_tokens: Option<u32>,
}

/// Token accounting reported by the service.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
}

/// Text reply from the completion service.
#[derive(Debug, Clone)]
pub struct Completion {
    pub content: String,
    pub usage: Usage,
}

/// The generic "invoke completion, get text" capability.
#[async_trait]
pub trait CompletionClient: Send + Sync {
    async fn chat(
        &self,
        messages: &[ChatMessage],
        options: &CompletionOptions,
    ) -> Result<Completion, EngineError>;

    async fn embed(&self, text: &str) -> Result<Vec<f32>, EngineError>;
}

/// reqwest-backed client for an OpenAI-compatible HTTP endpoint.
pub struct HttpCompletionClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl HttpCompletionClient {
    pub fn new(http: reqwest::Client, base_url: &str, api_key: &str, model: &str) -> Self {
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            model: model.to_string(),
        }
    }

    async fn post(&self, path: &str, body: Value) -> Result<Value, EngineError> {
        let response = self
            .http
            .post(format!("{}{}", self.base_url, path))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| EngineError::handler(format!("completion request failed: {e}")))?;

        let status = response.status();
        let payload: Value = response
            .json()
            .await
            .map_err(|e| EngineError::handler(format!("completion response unreadable: {e}")))?;

        if !status.is_success() {
            return Err(EngineError::handler(format!(
                "completion service returned {status}: {payload}"
            )));
        }

        Ok(payload)
    }
}

#[async_trait]
impl CompletionClient for HttpCompletionClient {
    async fn chat(
        &self,
        messages: &[ChatMessage],
        options: &CompletionOptions,
    ) -> Result<Completion, EngineError> {
        let mut body = json!({
            "model": self.model,
            "messages": messages,
        });
        if let Some(t) = options.temperature {
            body["temperature"] = json!(t);
        }
        if let Some(m) = options.max_tokens {
            body["max_tokens"] = json!(m);
        }

        let payload = self.post("/chat/completions", body).await?;

        let content = payload["choices"][0]["message"]["content"]
            .as_str()
            .ok_or_else(|| EngineError::handler("completion reply carried no content"))?
            .to_string();

        let usage = Usage {
            prompt_tokens: payload["usage"]["prompt_tokens"].as_u64().unwrap_or(0) as u32,
            completion_tokens: payload["usage"]["completion_tokens"].as_u64().unwrap_or(0) as u32,
        };

        Ok(Completion { content, usage })
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, EngineError> {
        let body = json!({
            "model": self.model,
            "input": text,
        });

        let payload = self.post("/embeddings", body).await?;

        let vector = payload["data"][0]["embedding"]
            .as_array()
            .ok_or_else(|| EngineError::handler("embedding reply carried no vector"))?
            .iter()
            .filter_map(|v| v.as_f64())
            .map(|v| v as f32)
            .collect();

        Ok(vector)
    }
}

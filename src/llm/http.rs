//! HTTP model backends: OpenAI-compatible chat completions, Anthropic
//! messages and Gemini `generateContent`.

use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};

use super::{LanguageModel, ModelError};
use crate::types::{ModelEndpoint, ModelProvider};

const ANTHROPIC_VERSION: &str = "2023-06-01";

pub struct HttpModel {
    client: reqwest::Client,
    endpoint: ModelEndpoint,
    api_key: Option<String>,
    timeout: Duration,
}

impl HttpModel {
    /// Build a backend for `endpoint`, reading its key from the environment.
    /// A missing key is reported on the first call, not here.
    pub fn from_endpoint(endpoint: &ModelEndpoint, timeout: Duration) -> Self {
        let api_key = std::env::var(&endpoint.api_key_env)
            .ok()
            .filter(|key| !key.trim().is_empty());
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            client,
            endpoint: endpoint.clone(),
            api_key,
            timeout,
        }
    }

    async fn send<R: DeserializeOwned>(
        &self,
        request: reqwest::RequestBuilder,
    ) -> Result<R, ModelError> {
        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                ModelError::Timeout(self.timeout)
            } else {
                ModelError::Network(e.to_string())
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ModelError::from_status(status.as_u16(), error_message(&body)));
        }

        response
            .json::<R>()
            .await
            .map_err(|e| ModelError::Decode(e.to_string()))
    }

    async fn chat(&self, key: &str, system: &str, user: &str) -> Result<String, ModelError> {
        let url = format!("{}/chat/completions", self.endpoint.base_url.trim_end_matches('/'));
        let request = self
            .client
            .post(url)
            .bearer_auth(key)
            .json(&chat_body(&self.endpoint, system, user));
        let response: ChatResponse = self.send(request).await?;
        response
            .choices
            .into_iter()
            .find_map(|choice| choice.message.content)
            .filter(|text| !text.trim().is_empty())
            .ok_or(ModelError::EmptyResponse)
    }

    async fn anthropic(&self, key: &str, system: &str, user: &str) -> Result<String, ModelError> {
        let url = format!("{}/messages", self.endpoint.base_url.trim_end_matches('/'));
        let request = self
            .client
            .post(url)
            .header("x-api-key", key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&anthropic_body(&self.endpoint, system, user));
        let response: AnthropicResponse = self.send(request).await?;
        let text: String = response
            .content
            .into_iter()
            .filter(|block| block.kind == "text")
            .filter_map(|block| block.text)
            .collect::<Vec<_>>()
            .join("");
        if text.trim().is_empty() {
            return Err(ModelError::EmptyResponse);
        }
        Ok(text)
    }

    async fn gemini(&self, key: &str, system: &str, user: &str) -> Result<String, ModelError> {
        let url = format!(
            "{}/models/{}:generateContent",
            self.endpoint.base_url.trim_end_matches('/'),
            self.endpoint.model
        );
        let request = self
            .client
            .post(url)
            .header("x-goog-api-key", key)
            .json(&gemini_body(&self.endpoint, system, user));
        let response: GeminiResponse = self.send(request).await?;
        response
            .candidates
            .into_iter()
            .flatten()
            .filter_map(|candidate| candidate.content)
            .flat_map(|content| content.parts)
            .find_map(|part| part.text)
            .filter(|text| !text.trim().is_empty())
            .ok_or(ModelError::EmptyResponse)
    }
}

#[async_trait]
impl LanguageModel for HttpModel {
    async fn complete(&self, system: &str, user: &str) -> Result<String, ModelError> {
        let Some(key) = self.api_key.as_deref() else {
            return Err(ModelError::NotConfigured(self.endpoint.api_key_env.clone()));
        };
        match self.endpoint.provider {
            ModelProvider::Chat => self.chat(key, system, user).await,
            ModelProvider::Anthropic => self.anthropic(key, system, user).await,
            ModelProvider::Gemini => self.gemini(key, system, user).await,
        }
    }
}

// ============================================================================
// Request bodies
// ============================================================================

fn chat_body(endpoint: &ModelEndpoint, system: &str, user: &str) -> Value {
    json!({
        "model": endpoint.model,
        "messages": [
            { "role": "system", "content": system },
            { "role": "user", "content": user },
        ],
        "temperature": endpoint.temperature,
        "max_tokens": endpoint.max_tokens,
    })
}

fn anthropic_body(endpoint: &ModelEndpoint, system: &str, user: &str) -> Value {
    json!({
        "model": endpoint.model,
        "system": system,
        "messages": [{ "role": "user", "content": user }],
        "temperature": endpoint.temperature,
        "max_tokens": endpoint.max_tokens,
    })
}

fn gemini_body(endpoint: &ModelEndpoint, system: &str, user: &str) -> Value {
    json!({
        "systemInstruction": { "parts": [{ "text": system }] },
        "contents": [{ "role": "user", "parts": [{ "text": user }] }],
        "generationConfig": {
            "temperature": endpoint.temperature,
            "maxOutputTokens": endpoint.max_tokens,
        },
    })
}

// ============================================================================
// Response types
// ============================================================================

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
struct AnthropicResponse {
    #[serde(default)]
    content: Vec<AnthropicBlock>,
}

#[derive(Deserialize)]
struct AnthropicBlock {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: Option<String>,
}

#[derive(Deserialize)]
struct GeminiResponse {
    candidates: Option<Vec<GeminiCandidate>>,
}

#[derive(Deserialize)]
struct GeminiCandidate {
    content: Option<GeminiContent>,
}

#[derive(Deserialize)]
struct GeminiContent {
    #[serde(default)]
    parts: Vec<GeminiPart>,
}

#[derive(Deserialize)]
struct GeminiPart {
    text: Option<String>,
}

/// Best-effort message from an error body: `{"error":{"message":..}}`,
/// `{"error":".."}`, or the raw text cut to 300 chars.
fn error_message(body: &str) -> String {
    if let Ok(value) = serde_json::from_str::<Value>(body) {
        let error = &value["error"];
        if let Some(message) = error["message"].as_str().or_else(|| error.as_str()) {
            return message.to_string();
        }
    }
    body.chars().take(300).collect()
}

//! Gemini `generateContent` client.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use tracing::debug;

use crate::error::{AppError, Result};

const PROVIDER: &str = "gemini";
const TEMPERATURE: f64 = 0.7;
const ERROR_BODY_LIMIT: usize = 320;

// ---

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    User,
    Model,
}

impl Role {
    fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Model => "model",
        }
    }
}

/// One turn of the conversation sent to the model.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelTurn {
    pub role: Role,
    pub text: String,
}

/// Text generation backend used by the chat assistant.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Generate a reply to the conversation ending with the last user turn.
    async fn generate(&self, system_prompt: &str, turns: &[ModelTurn]) -> Result<String>;
}

#[derive(Clone)]
pub struct GeminiClient {
    client: Client,
    api_key: String,
    model: String,
    endpoint: String,
}

impl GeminiClient {
    // ---
    pub fn new(
        api_key: String,
        model: String,
        endpoint: String,
        timeout: Duration,
    ) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AppError::Configuration(format!("HTTP client setup failed: {}", e)))?;

        Ok(Self {
            client,
            api_key,
            model,
            endpoint: endpoint.trim_end_matches('/').to_string(),
        })
    }

    fn url(&self) -> String {
        format!(
            "{}/v1beta/models/{}:generateContent",
            self.endpoint, self.model
        )
    }
}

#[async_trait]
impl LanguageModel for GeminiClient {
    async fn generate(&self, system_prompt: &str, turns: &[ModelTurn]) -> Result<String> {
        // ---
        let payload = build_payload(system_prompt, turns);
        debug!(model = %self.model, turns = turns.len(), "Calling Gemini");

        let response = self
            .client
            .post(self.url())
            .query(&[("key", self.api_key.as_str())])
            .json(&payload)
            .send()
            .await
            .map_err(|e| upstream(format!("request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(upstream(format!(
                "status {}: {}",
                status,
                truncate(&body, ERROR_BODY_LIMIT)
            )));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| upstream(format!("invalid response: {}", e)))?;

        extract_reply(&body).ok_or_else(|| upstream("empty response".to_string()))
    }
}

fn upstream(message: String) -> AppError {
    AppError::Upstream {
        provider: PROVIDER,
        message,
    }
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

/// Request body for `generateContent`.
pub fn build_payload(system_prompt: &str, turns: &[ModelTurn]) -> Value {
    // ---
    let contents: Vec<Value> = turns
        .iter()
        .map(|t| json!({ "role": t.role.as_str(), "parts": [{ "text": t.text }] }))
        .collect();

    let mut payload = json!({
        "contents": contents,
        "generationConfig": { "temperature": TEMPERATURE },
    });
    if !system_prompt.trim().is_empty() {
        payload["systemInstruction"] = json!({ "parts": [{ "text": system_prompt }] });
    }
    payload
}

/// Text of the first candidate, or `None` when it carries no text.
pub fn extract_reply(body: &Value) -> Option<String> {
    // ---
    let text = body["candidates"]
        .as_array()
        .and_then(|candidates| candidates.first())
        .and_then(|candidate| candidate["content"]["parts"].as_array())
        .map(|parts| {
            parts
                .iter()
                .filter_map(|part| part["text"].as_str())
                .collect::<Vec<_>>()
                .join("\n")
        })?;

    if text.trim().is_empty() {
        None
    } else {
        Some(text)
    }
}

//! Chat-completions backends

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use crate::config::{ApiKeys, LlmConfig};
use crate::{Error, Result};

/// One message in a chat-completions request
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    #[must_use]
    pub fn new(role: &str, content: impl Into<String>) -> Self {
        Self {
            role: role.to_string(),
            content: content.into(),
        }
    }
}

/// A chat-completions request
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub temperature: f32,
    pub max_tokens: u32,
}

/// Why a backend call failed
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    /// Quota or capacity exhausted for this model; another model may work
    #[error("rate limited: {0}")]
    RateLimited(String),

    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("transport error: {0}")]
    Transport(String),

    /// The model answered with no content
    #[error("empty response")]
    Empty,
}

impl BackendError {
    #[must_use]
    pub const fn is_rate_limit(&self) -> bool {
        matches!(self, Self::RateLimited(_))
    }
}

/// Something that answers chat-completions requests
#[async_trait]
pub trait ChatBackend: Send + Sync {
    async fn complete(&self, request: &ChatRequest) -> std::result::Result<String, BackendError>;
}

#[derive(Deserialize)]
struct CompletionResponse {
    #[serde(default)]
    choices: Vec<Choice>,
    error: Option<ApiError>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

#[derive(Deserialize)]
struct ApiError {
    code: Option<serde_json::Value>,
    #[serde(default)]
    message: String,
}

/// OpenAI-compatible chat-completions endpoint (`OpenRouter` by default)
pub struct OpenRouterBackend {
    client: reqwest::Client,
    endpoint: String,
    api_key: SecretString,
}

impl OpenRouterBackend {
    /// Create a backend for `base_url` with a per-request timeout
    ///
    /// # Errors
    ///
    /// Returns error if the HTTP client cannot be built
    pub fn new(base_url: &str, api_key: SecretString, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            endpoint: format!("{}/chat/completions", base_url.trim_end_matches('/')),
            api_key,
        })
    }

    /// Build from configuration
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` if `OPENROUTER_API_KEY` is missing
    pub fn from_config(llm: &LlmConfig, keys: &ApiKeys) -> Result<Self> {
        let api_key = keys
            .openrouter
            .as_ref()
            .map(|k| SecretString::from(k.expose_secret()))
            .ok_or_else(|| Error::Config("OPENROUTER_API_KEY is required".to_string()))?;

        Self::new(&llm.base_url, api_key, llm.request_timeout)
    }
}

#[async_trait]
impl ChatBackend for OpenRouterBackend {
    async fn complete(&self, request: &ChatRequest) -> std::result::Result<String, BackendError> {
        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(self.api_key.expose_secret())
            .json(request)
            .send()
            .await
            .map_err(|e| BackendError::Transport(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| BackendError::Transport(e.to_string()))?;

        parse_completion(status, &body)
    }
}

/// Classify an HTTP response from a chat-completions endpoint
fn parse_completion(status: StatusCode, body: &str) -> std::result::Result<String, BackendError> {
    if is_rate_limit_status(status.as_u16()) {
        return Err(BackendError::RateLimited(format!("{status}: {body}")));
    }
    if !status.is_success() {
        return Err(BackendError::Status {
            status: status.as_u16(),
            body: body.to_string(),
        });
    }

    let parsed: CompletionResponse = serde_json::from_str(body)
        .map_err(|e| BackendError::Transport(format!("invalid response body: {e}")))?;

    // Providers sometimes report upstream failures inside a 200
    if let Some(error) = parsed.error {
        let code = error
            .code
            .as_ref()
            .and_then(serde_json::Value::as_u64)
            .and_then(|c| u16::try_from(c).ok())
            .unwrap_or(500);
        return Err(if is_rate_limit_status(code) {
            BackendError::RateLimited(error.message)
        } else {
            BackendError::Status {
                status: code,
                body: error.message,
            }
        });
    }

    parsed
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message.content)
        .filter(|content| !content.trim().is_empty())
        .ok_or(BackendError::Empty)
}

const fn is_rate_limit_status(status: u16) -> bool {
    matches!(status, 429 | 503)
}

//! OpenAI-compatible chat completions. Errors are surfaced as-is, never retried.

use crate::conversations::Message;
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const DEFAULT_TEMPERATURE: f32 = 0.7;
pub const DEFAULT_MAX_TOKENS: u32 = 2000;
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct ApiCredentials {
    pub api_key: String,
    pub base_url: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<Message>,
    pub temperature: f32,
    pub max_tokens: u32,
}

impl ChatRequest {
    pub fn new(model: impl Into<String>, messages: Vec<Message>) -> Self {
        Self {
            model: model.into(),
            messages,
            temperature: DEFAULT_TEMPERATURE,
            max_tokens: DEFAULT_MAX_TOKENS,
        }
    }
}

#[derive(thiserror::Error, Debug)]
pub enum ChatError {
    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("rate limited: {0}")]
    RateLimit(String),

    #[error("{0}")]
    Api(String),

    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),
}

#[async_trait]
pub trait ChatCompletion: Send + Sync {
    async fn complete(&self, creds: &ApiCredentials, request: &ChatRequest) -> Result<String, ChatError>;
}

pub struct OpenAiClient {
    client: reqwest::Client,
}

impl OpenAiClient {
    pub fn new(timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }
}

pub fn endpoint(base_url: &str) -> String {
    format!("{}/chat/completions", base_url.trim_end_matches('/'))
}

#[derive(Deserialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Deserialize)]
struct ErrorDetail {
    message: String,
}

pub(crate) fn classify(status: StatusCode, body: &str) -> ChatError {
    let detail = serde_json::from_str::<ErrorBody>(body)
        .map(|b| b.error.message)
        .ok()
        .or_else(|| Some(body.trim().to_string()).filter(|s| !s.is_empty()))
        .unwrap_or_else(|| status.to_string());

    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => ChatError::Auth(detail),
        StatusCode::TOO_MANY_REQUESTS => ChatError::RateLimit(detail),
        _ => ChatError::Api(format!("{status}: {detail}")),
    }
}

#[derive(Deserialize)]
struct CompletionResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

#[async_trait]
impl ChatCompletion for OpenAiClient {
    async fn complete(&self, creds: &ApiCredentials, request: &ChatRequest) -> Result<String, ChatError> {
        let resp = self
            .client
            .post(endpoint(&creds.base_url))
            .bearer_auth(&creds.api_key)
            .json(request)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            let err = classify(status, &body);
            tracing::warn!(%status, error = %err, "chat completion rejected");
            return Err(err);
        }

        let body: CompletionResponse = resp
            .json()
            .await
            .map_err(|e| ChatError::Api(format!("invalid response: {e}")))?;
        body.choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| ChatError::Api("response contained no message".to_string()))
    }
}

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use serde::Deserialize;
use serde_json::json;
use thiserror::Error;
use tracing::debug;

use crate::prompt::RecapPrompt;

#[derive(Debug, Error)]
pub enum TextGenError {
    #[error("text generation request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("text generation returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("text generation returned no content")]
    Empty,
    #[error("invalid text generation configuration: {0}")]
    Config(String),
}

#[async_trait]
pub trait TextGenerator: Send + Sync {
    fn model(&self) -> &str;
    async fn generate(&self, prompt: &RecapPrompt) -> Result<String, TextGenError>;
}

/// OpenAI-compatible `chat/completions` client.
#[derive(Debug, Clone)]
pub struct ChatCompletionClient {
    client: reqwest::Client,
    base_url: String,
    model: String,
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

impl ChatCompletionClient {
    pub fn new(
        base_url: impl Into<String>,
        api_key: &str,
        model: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, TextGenError> {
        let mut headers = HeaderMap::new();
        let bearer = HeaderValue::from_str(&format!("Bearer {api_key}"))
            .map_err(|e| TextGenError::Config(e.to_string()))?;
        headers.insert(AUTHORIZATION, bearer);
        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(timeout)
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
        })
    }
}

fn first_content(response: CompletionResponse) -> Result<String, TextGenError> {
    response
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.message.content)
        .filter(|text| !text.trim().is_empty())
        .ok_or(TextGenError::Empty)
}

#[async_trait]
impl TextGenerator for ChatCompletionClient {
    fn model(&self) -> &str {
        &self.model
    }

    async fn generate(&self, prompt: &RecapPrompt) -> Result<String, TextGenError> {
        let body = json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": prompt.system},
                {"role": "user", "content": prompt.context},
            ],
        });
        debug!(model = %self.model, context_chars = prompt.context.len(), "requesting recap text");
        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .json(&body)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TextGenError::Status {
                status: status.as_u16(),
                body: body.chars().take(500).collect(),
            });
        }
        first_content(response.json().await?)
    }
}

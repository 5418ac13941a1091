//! Chat Completions client shared by OpenAI and Mistral.
//!
//! Both vendors expose the same `POST /v1/chat/completions` request and
//! response shape, so one client serves either, distinguished only by
//! endpoint, key, and model.

use std::time::Duration;

use async_trait::async_trait;
use precedent_core::{ProviderName, RetryPolicy};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{AiError, ChatMessage, ChatModel};

const OPENAI_CHAT_URL: &str = "https://api.openai.com/v1/chat/completions";
const MISTRAL_CHAT_URL: &str = "https://api.mistral.ai/v1/chat/completions";

const TEMPERATURE: f32 = 0.0;

/// HTTP client for an OpenAI-compatible chat endpoint.
pub struct ChatCompletionsClient {
    client: Client,
    provider: ProviderName,
    name: String,
    endpoint: String,
    api_key: String,
    model: String,
    retry: RetryPolicy,
}

#[derive(Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    temperature: f32,
    stream: bool,
}

#[derive(Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

impl ChatCompletionsClient {
    /// Create a client for `provider` with a per-request `timeout`.
    pub fn new(
        provider: ProviderName,
        api_key: impl Into<String>,
        model: impl Into<String>,
        timeout: Duration,
        retry: RetryPolicy,
    ) -> Result<Self, AiError> {
        let model = model.into();
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            provider,
            name: format!("{}-{model}", vendor(provider)),
            endpoint: default_endpoint(provider).to_string(),
            api_key: api_key.into(),
            model,
            retry,
        })
    }

    /// Point at a different OpenAI-compatible endpoint (proxy, gateway, local server).
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    pub fn provider(&self) -> ProviderName {
        self.provider
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn temperature(&self) -> f32 {
        TEMPERATURE
    }

    async fn send(&self, body: &ChatCompletionRequest<'_>) -> Result<String, AiError> {
        let resp = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(body)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(AiError::Server {
                provider: self.name.clone(),
                status: status.as_u16(),
                body,
            });
        }

        let parsed: ChatCompletionResponse = resp.json().await?;
        extract_text(parsed, &self.name)
    }
}

#[async_trait]
impl ChatModel for ChatCompletionsClient {
    fn name(&self) -> &str {
        &self.name
    }

    async fn invoke(&self, messages: &[ChatMessage]) -> Result<String, AiError> {
        let body = ChatCompletionRequest {
            model: &self.model,
            messages,
            temperature: TEMPERATURE,
            stream: false,
        };
        debug!(model = %self.name, messages = messages.len(), "invoking chat model");
        self.retry
            .run(&self.name, AiError::is_transient, || self.send(&body))
            .await
    }
}

fn vendor(provider: ProviderName) -> &'static str {
    match provider {
        ProviderName::OpenAi => "OpenAI",
        ProviderName::Mistral => "Mistral",
    }
}

fn default_endpoint(provider: ProviderName) -> &'static str {
    match provider {
        ProviderName::OpenAi => OPENAI_CHAT_URL,
        ProviderName::Mistral => MISTRAL_CHAT_URL,
    }
}

/// Take the first choice's text, trimmed. Blank output counts as a failure.
fn extract_text(resp: ChatCompletionResponse, name: &str) -> Result<String, AiError> {
    resp.choices
        .into_iter()
        .next()
        .and_then(|c| c.message.content)
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .ok_or_else(|| AiError::EmptyResponse(name.to_string()))
}

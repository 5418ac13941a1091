use async_trait::async_trait;
use serde::Serialize;

use crate::AiError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

/// One message of a chat-completion prompt. Serializes to the `{role, content}`
/// shape both OpenAI and Mistral accept.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
        }
    }
}

/// A generative-language backend: ordered messages in, text out. Non-streaming.
#[async_trait]
pub trait ChatModel: Send + Sync {
    /// Human-readable handle, e.g. `OpenAI-gpt-4o`.
    fn name(&self) -> &str;

    async fn invoke(&self, messages: &[ChatMessage]) -> Result<String, AiError>;
}

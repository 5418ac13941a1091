//! Model layer: chat completions (OpenAI, Mistral), query embeddings, and provider selection.

mod chat;
mod embedder;
mod error;
mod openai;
mod provider;

pub use chat::{ChatMessage, ChatModel, ChatRole};
pub use embedder::{EmbeddingService, OpenAiEmbedder};
pub use error::AiError;
pub use openai::ChatCompletionsClient;
pub use provider::{ModelPair, ProviderSelector};

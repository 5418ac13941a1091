pub mod chunk;
pub mod citation;
pub mod confidence;
pub mod config;
pub mod retry;
pub mod types;

pub use chunk::{CaseDocument, Chunker, count_tokens, vector_id};
pub use citation::extract_citations;
pub use confidence::{Confidence, ConfidenceAssessor, ConfidenceSettings, SelfRating};
pub use config::{ConfigError, ProviderName, Settings};
pub use retry::RetryPolicy;
pub use types::{Citation, ConfidenceLevel, Passage, PassageMetadata, Role, Turn};

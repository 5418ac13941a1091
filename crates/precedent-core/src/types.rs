//! Shared case-law types passed between retrieval, generation, and the CLI.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Speaker of a conversation turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }

    /// Parse a caller-supplied role. Unknown roles are ignored by callers.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "user" | "human" => Some(Self::User),
            "assistant" | "ai" => Some(Self::Assistant),
            _ => None,
        }
    }

    /// Speaker label used when history is folded into a prompt.
    pub fn label(&self) -> &'static str {
        match self {
            Self::User => "User",
            Self::Assistant => "Assistant",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One message in a session's conversation history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub text: String,
}

impl Turn {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            text: text.into(),
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            text: text.into(),
        }
    }
}

/// Metadata stored alongside each vector in the index.
///
/// Written once by ingestion and read back verbatim at query time. The
/// `chunk_id` key name matches what the ingestion pipeline has always written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PassageMetadata {
    pub case_name: String,
    pub court: String,
    pub date: String,
    pub citation: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub topic: Option<String>,
    #[serde(rename = "chunk_id")]
    pub chunk_index: u32,
    pub total_chunks: u32,
    pub text: String,
}

/// A retrieved chunk of case-law text with its source metadata and similarity score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Passage {
    pub id: String,
    pub text: String,
    pub case_name: String,
    pub court: String,
    pub date: String,
    pub citation: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub topic: Option<String>,
    pub chunk_index: u32,
    pub total_chunks: u32,
    /// Similarity to the query in [0, 1].
    pub score: f64,
}

impl Passage {
    pub fn from_metadata(id: impl Into<String>, metadata: PassageMetadata, score: f64) -> Self {
        Self {
            id: id.into(),
            text: metadata.text,
            case_name: metadata.case_name,
            court: metadata.court,
            date: metadata.date,
            citation: metadata.citation,
            topic: metadata.topic,
            chunk_index: metadata.chunk_index,
            total_chunks: metadata.total_chunks,
            score,
        }
    }
}

/// A verifiable reference from a generated answer back to a retrieved passage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Citation {
    pub case_name: String,
    pub court: String,
    pub date: String,
    pub citation: String,
    pub excerpt: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

/// Categorical confidence bucket. Always derived from a numeric score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfidenceLevel {
    Insufficient,
    Low,
    Medium,
    High,
}

impl ConfidenceLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Insufficient => "insufficient",
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }
}

impl fmt::Display for ConfidenceLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

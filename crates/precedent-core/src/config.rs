//! Shared runtime configuration.
//!
//! `Settings` is plain data with the deployment defaults baked in. Loading from
//! flags and environment variables happens in the CLI; libraries only ever see
//! a validated `Settings`.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::confidence::ConfidenceSettings;
use crate::retry::RetryPolicy;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid provider: {name}. Must be one of {}", ProviderName::known().join(", "))]
    InvalidProvider { name: String },

    #[error("{provider} selected but {var} is not set")]
    MissingCredential {
        provider: ProviderName,
        var: &'static str,
    },

    #[error("invalid setting: {0}")]
    Invalid(String),
}

/// Logical name of a generative-model backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderName {
    OpenAi,
    Mistral,
}

impl ProviderName {
    pub const ALL: [ProviderName; 2] = [ProviderName::OpenAi, ProviderName::Mistral];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OpenAi => "openai",
            Self::Mistral => "mistral",
        }
    }

    pub fn known() -> Vec<&'static str> {
        Self::ALL.iter().map(|p| p.as_str()).collect()
    }

    /// Environment variable holding this backend's API key.
    pub fn key_var(&self) -> &'static str {
        match self {
            Self::OpenAi => "OPENAI_API_KEY",
            Self::Mistral => "MISTRAL_API_KEY",
        }
    }
}

impl fmt::Display for ProviderName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderName {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let name = s.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|p| p.as_str() == name)
            .ok_or(ConfigError::InvalidProvider {
                name: s.to_string(),
            })
    }
}

/// Every tunable the query pipeline, adapters, and ingestion read.
#[derive(Debug, Clone)]
pub struct Settings {
    pub llm_provider: ProviderName,
    pub openai_api_key: Option<String>,
    pub openai_model: String,
    pub mistral_api_key: Option<String>,
    pub mistral_model: String,

    pub embedding_model: String,
    /// Must equal the dimension the index was built with.
    pub embedding_dimension: usize,

    pub pinecone_api_key: Option<String>,
    pub pinecone_index_name: String,
    /// Data-plane host; resolved from the index name when unset.
    pub pinecone_index_host: Option<String>,
    /// Where ingestion creates the index when it does not exist yet, as
    /// `<region>-<cloud>`.
    pub pinecone_environment: String,

    pub top_k: usize,
    pub chunk_size: usize,
    pub chunk_overlap: usize,

    pub confidence: ConfidenceSettings,

    /// Upper bound on any single outbound call.
    pub request_timeout: Duration,
    pub retry: RetryPolicy,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            llm_provider: ProviderName::OpenAi,
            openai_api_key: None,
            openai_model: "gpt-4o".into(),
            mistral_api_key: None,
            mistral_model: "mistral-large-latest".into(),
            embedding_model: "text-embedding-3-small".into(),
            embedding_dimension: 1536,
            pinecone_api_key: None,
            pinecone_index_name: "legal-ai-index".into(),
            pinecone_index_host: None,
            pinecone_environment: "us-east-1-aws".into(),
            top_k: 5,
            chunk_size: 512,
            chunk_overlap: 50,
            confidence: ConfidenceSettings::default(),
            request_timeout: Duration::from_secs(30),
            retry: RetryPolicy::default(),
        }
    }
}

impl Settings {
    /// API key for a backend, treating blank strings as unset.
    pub fn api_key(&self, provider: ProviderName) -> Option<&str> {
        let key = match provider {
            ProviderName::OpenAi => self.openai_api_key.as_deref(),
            ProviderName::Mistral => self.mistral_api_key.as_deref(),
        };
        key.map(str::trim).filter(|k| !k.is_empty())
    }

    pub fn model_name(&self, provider: ProviderName) -> &str {
        match provider {
            ProviderName::OpenAi => &self.openai_model,
            ProviderName::Mistral => &self.mistral_model,
        }
    }

    /// Reject settings that would only fail later, mid-request.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.top_k == 0 {
            return Err(ConfigError::Invalid("top_k must be at least 1".into()));
        }
        if self.embedding_dimension == 0 {
            return Err(ConfigError::Invalid(
                "embedding_dimension must be positive".into(),
            ));
        }
        if self.chunk_size == 0 || self.chunk_overlap >= self.chunk_size {
            return Err(ConfigError::Invalid(format!(
                "chunk_overlap ({}) must be smaller than chunk_size ({})",
                self.chunk_overlap, self.chunk_size
            )));
        }

        let c = &self.confidence;
        for (name, v) in [
            ("high_threshold", c.high_threshold),
            ("medium_threshold", c.medium_threshold),
        ] {
            if !(0.0..=1.0).contains(&v) {
                return Err(ConfigError::Invalid(format!("{name} must be in [0, 1], got {v}")));
            }
        }
        if c.medium_threshold > c.high_threshold {
            return Err(ConfigError::Invalid(format!(
                "medium_threshold ({}) exceeds high_threshold ({})",
                c.medium_threshold, c.high_threshold
            )));
        }
        if c.retrieval_weight < 0.0 || c.model_weight < 0.0 {
            return Err(ConfigError::Invalid("confidence weights must be non-negative".into()));
        }
        if self.request_timeout.is_zero() {
            return Err(ConfigError::Invalid("request_timeout must be positive".into()));
        }
        Ok(())
    }
}

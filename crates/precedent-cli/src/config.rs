//! Flag and environment-variable overrides for `Settings`.
//!
//! Every flag is optional; anything left unset keeps the default baked into
//! `precedent_core::Settings`. Environment variables are read after `.env`
//! has been loaded, so either source works.

use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, ValueEnum};
use precedent_core::{ProviderName, Settings};

/// Which vector index backs retrieval and ingestion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum IndexBackend {
    /// Hosted Pinecone index.
    Pinecone,
    /// Local LanceDB table (needs the `lancedb` feature).
    Lance,
}

#[derive(Debug, Clone, Args)]
pub struct IndexArgs {
    /// Vector index backend.
    #[arg(long = "index", global = true, value_enum, env = "PRECEDENT_INDEX", default_value_t = IndexBackend::Pinecone)]
    pub backend: IndexBackend,

    /// LanceDB directory, used with `--index lance`.
    #[arg(long, global = true, env = "PRECEDENT_LANCE_PATH", default_value = "data/lancedb")]
    pub lance_path: PathBuf,
}

#[derive(Debug, Clone, Default, Args)]
pub struct SettingsArgs {
    /// Primary generative backend (openai or mistral).
    #[arg(long, global = true, env = "LLM_PROVIDER")]
    pub llm_provider: Option<ProviderName>,

    #[arg(long, global = true, env = "OPENAI_API_KEY", hide_env_values = true)]
    pub openai_api_key: Option<String>,

    #[arg(long, global = true, env = "OPENAI_MODEL")]
    pub openai_model: Option<String>,

    #[arg(long, global = true, env = "MISTRAL_API_KEY", hide_env_values = true)]
    pub mistral_api_key: Option<String>,

    #[arg(long, global = true, env = "MISTRAL_MODEL")]
    pub mistral_model: Option<String>,

    #[arg(long, global = true, env = "EMBEDDING_MODEL")]
    pub embedding_model: Option<String>,

    /// Must match the dimension the index was built with.
    #[arg(long, global = true, env = "EMBEDDING_DIMENSION")]
    pub embedding_dimension: Option<usize>,

    #[arg(long, global = true, env = "PINECONE_API_KEY", hide_env_values = true)]
    pub pinecone_api_key: Option<String>,

    #[arg(long, global = true, env = "PINECONE_INDEX_NAME")]
    pub pinecone_index_name: Option<String>,

    /// Data-plane host; looked up from the index name when omitted.
    #[arg(long, global = true, env = "PINECONE_INDEX_HOST")]
    pub pinecone_index_host: Option<String>,

    /// Region and cloud for an index created by `ingest`, e.g. us-east-1-aws.
    #[arg(long, global = true, env = "PINECONE_ENVIRONMENT")]
    pub pinecone_environment: Option<String>,

    /// Passages retrieved per question.
    #[arg(long, global = true, env = "TOP_K_CHUNKS")]
    pub top_k: Option<usize>,

    #[arg(long, global = true, env = "CHUNK_SIZE")]
    pub chunk_size: Option<usize>,

    #[arg(long, global = true, env = "CHUNK_OVERLAP")]
    pub chunk_overlap: Option<usize>,

    #[arg(long, global = true, env = "RETRIEVAL_CONFIDENCE_WEIGHT")]
    pub retrieval_weight: Option<f64>,

    #[arg(long, global = true, env = "LLM_CONFIDENCE_WEIGHT")]
    pub model_weight: Option<f64>,

    #[arg(long, global = true, env = "HIGH_CONFIDENCE_THRESHOLD")]
    pub high_threshold: Option<f64>,

    #[arg(long, global = true, env = "MEDIUM_CONFIDENCE_THRESHOLD")]
    pub medium_threshold: Option<f64>,

    /// Per-request HTTP timeout in seconds.
    #[arg(long, global = true, env = "REQUEST_TIMEOUT_SECS")]
    pub request_timeout_secs: Option<u64>,

    #[arg(long, global = true, env = "MAX_RETRIES")]
    pub max_retries: Option<u32>,
}

impl SettingsArgs {
    /// Overlay the supplied values onto the defaults. Call `validate` on the result.
    pub fn to_settings(&self) -> Settings {
        let mut s = Settings::default();

        if let Some(p) = self.llm_provider {
            s.llm_provider = p;
        }
        s.openai_api_key = self.openai_api_key.clone();
        s.mistral_api_key = self.mistral_api_key.clone();
        s.pinecone_api_key = self.pinecone_api_key.clone();
        s.pinecone_index_host = self.pinecone_index_host.clone();

        overlay(&mut s.openai_model, &self.openai_model);
        overlay(&mut s.mistral_model, &self.mistral_model);
        overlay(&mut s.embedding_model, &self.embedding_model);
        overlay(&mut s.pinecone_index_name, &self.pinecone_index_name);
        overlay(&mut s.pinecone_environment, &self.pinecone_environment);

        overlay(&mut s.embedding_dimension, &self.embedding_dimension);
        overlay(&mut s.top_k, &self.top_k);
        overlay(&mut s.chunk_size, &self.chunk_size);
        overlay(&mut s.chunk_overlap, &self.chunk_overlap);

        overlay(&mut s.confidence.retrieval_weight, &self.retrieval_weight);
        overlay(&mut s.confidence.model_weight, &self.model_weight);
        overlay(&mut s.confidence.high_threshold, &self.high_threshold);
        overlay(&mut s.confidence.medium_threshold, &self.medium_threshold);

        if let Some(secs) = self.request_timeout_secs {
            s.request_timeout = Duration::from_secs(secs);
        }
        overlay(&mut s.retry.max_retries, &self.max_retries);
        s
    }
}

fn overlay<T: Clone>(slot: &mut T, value: &Option<T>) {
    if let Some(v) = value {
        *slot = v.clone();
    }
}

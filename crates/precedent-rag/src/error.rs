use precedent_ai::AiError;
use precedent_store::StoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RetrievalError {
    #[error("query embedding failed: {0}")]
    Embedding(#[from] AiError),

    #[error("vector index query failed: {0}")]
    Index(#[from] StoreError),

    #[error("query embedding has dimension {actual}, index expects {expected}")]
    DimensionMismatch { expected: usize, actual: usize },
}

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("internal error: {0}")]
    Internal(String),
}

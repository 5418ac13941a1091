//! Query-to-passages retrieval: embed the question, search the index,
//! rebuild passages from stored metadata.

use std::sync::Arc;

use async_trait::async_trait;
use precedent_ai::EmbeddingService;
use precedent_core::Passage;
use precedent_store::{MetadataFilter, VectorIndex};
use serde::Serialize;
use tracing::{debug, info};

use crate::RetrievalError;

/// Ranked passages plus their mean similarity.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Retrieval {
    pub passages: Vec<Passage>,
    /// Arithmetic mean of passage scores; 0.0 when nothing matched.
    pub average_score: f64,
}

impl Retrieval {
    pub fn from_passages(passages: Vec<Passage>) -> Self {
        let average_score = if passages.is_empty() {
            0.0
        } else {
            passages.iter().map(|p| p.score).sum::<f64>() / passages.len() as f64
        };
        Self {
            passages,
            average_score,
        }
    }
}

/// Reachability report for the backing index.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum IndexHealth {
    Healthy {
        total_vectors: u64,
        dimension: usize,
        index_fullness: f64,
    },
    Unhealthy {
        error: String,
    },
}

impl IndexHealth {
    /// Ask the index for its stats; any failure is reported, not returned.
    pub async fn probe(index: &dyn VectorIndex) -> Self {
        match index.describe_stats().await {
            Ok(stats) => Self::Healthy {
                total_vectors: stats.total_vectors,
                dimension: stats.dimension,
                index_fullness: stats.fullness,
            },
            Err(e) => Self::Unhealthy {
                error: e.to_string(),
            },
        }
    }

    pub fn is_healthy(&self) -> bool {
        matches!(self, Self::Healthy { .. })
    }
}

#[async_trait]
pub trait PassageRetriever: Send + Sync {
    async fn retrieve(
        &self,
        query: &str,
        top_k: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<Retrieval, RetrievalError>;

    async fn health_check(&self) -> IndexHealth;
}

/// Embedding service plus vector index.
pub struct Retriever {
    embedder: Arc<dyn EmbeddingService>,
    index: Arc<dyn VectorIndex>,
}

impl Retriever {
    pub fn new(embedder: Arc<dyn EmbeddingService>, index: Arc<dyn VectorIndex>) -> Self {
        Self { embedder, index }
    }
}

#[async_trait]
impl PassageRetriever for Retriever {
    async fn retrieve(
        &self,
        query: &str,
        top_k: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<Retrieval, RetrievalError> {
        let vector = self.embedder.embed(query).await?;
        let expected = self.embedder.dim();
        if vector.len() != expected {
            return Err(RetrievalError::DimensionMismatch {
                expected,
                actual: vector.len(),
            });
        }

        let matches = self.index.query(&vector, top_k, filter).await?;
        debug!(top_k, hits = matches.len(), "index query complete");

        let passages = matches
            .into_iter()
            .map(|m| Passage::from_metadata(m.id, m.metadata, m.score))
            .collect();
        let retrieval = Retrieval::from_passages(passages);
        info!(
            passages = retrieval.passages.len(),
            avg_score = retrieval.average_score,
            "retrieved passages"
        );
        Ok(retrieval)
    }

    async fn health_check(&self) -> IndexHealth {
        IndexHealth::probe(self.index.as_ref()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use precedent_ai::AiError;
    use precedent_core::PassageMetadata;
    use precedent_store::{IndexStats, MemoryIndex, StoreError, VectorMatch, VectorRecord};

    /// Maps known words onto fixed axes so tests control similarity exactly.
    struct AxisEmbedder {
        dim: usize,
        output_dim: usize,
    }

    #[async_trait]
    impl EmbeddingService for AxisEmbedder {
        fn dim(&self) -> usize {
            self.dim
        }

        async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, AiError> {
            Ok(texts
                .iter()
                .map(|t| {
                    let mut v = vec![0.0; self.output_dim];
                    if t.contains("contract") {
                        v[0] = 1.0;
                    } else {
                        v[1] = 1.0;
                    }
                    v
                })
                .collect())
        }
    }

    struct DownIndex;

    #[async_trait]
    impl VectorIndex for DownIndex {
        async fn upsert(&self, _records: &[VectorRecord]) -> Result<usize, StoreError> {
            Err(StoreError::Other("down".into()))
        }

        async fn query(
            &self,
            _vector: &[f32],
            _top_k: usize,
            _filter: Option<&MetadataFilter>,
        ) -> Result<Vec<VectorMatch>, StoreError> {
            Err(StoreError::Server {
                status: 503,
                body: "unavailable".into(),
            })
        }

        async fn describe_stats(&self) -> Result<IndexStats, StoreError> {
            Err(StoreError::Other("connection refused".into()))
        }
    }

    fn record(name: &str, values: Vec<f32>) -> VectorRecord {
        VectorRecord {
            id: format!("{}_chunk_0", name.replace(' ', "_")),
            values,
            metadata: PassageMetadata {
                case_name: name.into(),
                court: "Court".into(),
                date: "2020-01-01".into(),
                citation: "1 A.2d 1".into(),
                topic: None,
                chunk_index: 0,
                total_chunks: 1,
                text: format!("{name} text"),
            },
        }
    }

    #[test]
    fn average_of_empty_is_zero() {
        assert_eq!(Retrieval::from_passages(vec![]).average_score, 0.0);
    }

    #[tokio::test]
    async fn retrieve_ranks_and_averages() {
        let index = Arc::new(MemoryIndex::new(2));
        index
            .upsert(&[
                record("Smith v. Jones", vec![1.0, 0.0]),
                record("Doe v. Roe", vec![0.6, 0.8]),
            ])
            .await
            .unwrap();
        let retriever = Retriever::new(Arc::new(AxisEmbedder { dim: 2, output_dim: 2 }), index);

        let r = retriever.retrieve("contract formation", 5, None).await.unwrap();
        assert_eq!(r.passages.len(), 2);
        assert_eq!(r.passages[0].case_name, "Smith v. Jones");
        assert!((r.passages[0].score - 1.0).abs() < 1e-6);
        assert!((r.average_score - 0.8).abs() < 1e-6);
        assert_eq!(r.passages[1].text, "Doe v. Roe text");
    }

    #[tokio::test]
    async fn embedding_dimension_checked() {
        let retriever = Retriever::new(
            Arc::new(AxisEmbedder { dim: 3, output_dim: 2 }),
            Arc::new(MemoryIndex::new(3)),
        );
        let err = retriever.retrieve("contract", 5, None).await.unwrap_err();
        assert!(matches!(
            err,
            RetrievalError::DimensionMismatch { expected: 3, actual: 2 }
        ));
    }

    #[tokio::test]
    async fn index_failure_is_typed() {
        let retriever = Retriever::new(
            Arc::new(AxisEmbedder { dim: 2, output_dim: 2 }),
            Arc::new(DownIndex),
        );
        assert!(matches!(
            retriever.retrieve("contract", 5, None).await,
            Err(RetrievalError::Index(_))
        ));
    }

    #[tokio::test]
    async fn health_reports_both_states() {
        let healthy = Retriever::new(
            Arc::new(AxisEmbedder { dim: 2, output_dim: 2 }),
            Arc::new(MemoryIndex::new(2)),
        );
        assert_eq!(
            healthy.health_check().await,
            IndexHealth::Healthy {
                total_vectors: 0,
                dimension: 2,
                index_fullness: 0.0
            }
        );

        let down = Retriever::new(
            Arc::new(AxisEmbedder { dim: 2, output_dim: 2 }),
            Arc::new(DownIndex),
        );
        let health = down.health_check().await;
        assert!(!health.is_healthy());
        let json = serde_json::to_value(&health).unwrap();
        assert_eq!(json["status"], "unhealthy");
        assert_eq!(json["error"], "connection refused");
    }
}

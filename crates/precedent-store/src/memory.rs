//! Brute-force in-process index. Used by tests and small local corpora.

use async_trait::async_trait;
use dashmap::DashMap;
use precedent_core::PassageMetadata;
use tracing::debug;

use crate::{IndexStats, MetadataFilter, StoreError, VectorIndex, VectorMatch, VectorRecord};

pub struct MemoryIndex {
    dim: usize,
    entries: DashMap<String, (Vec<f32>, PassageMetadata)>,
}

impl MemoryIndex {
    pub fn new(dim: usize) -> Self {
        Self {
            dim,
            entries: DashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn check_dim(&self, v: &[f32]) -> Result<(), StoreError> {
        if v.len() == self.dim {
            Ok(())
        } else {
            Err(StoreError::DimensionMismatch {
                expected: self.dim,
                actual: v.len(),
            })
        }
    }
}

#[async_trait]
impl VectorIndex for MemoryIndex {
    async fn upsert(&self, records: &[VectorRecord]) -> Result<usize, StoreError> {
        for r in records {
            self.check_dim(&r.values)?;
        }
        for r in records {
            let mut values = r.values.clone();
            normalize(&mut values);
            self.entries
                .insert(r.id.clone(), (values, r.metadata.clone()));
        }
        debug!(count = records.len(), total = self.entries.len(), "memory index upsert");
        Ok(records.len())
    }

    async fn query(
        &self,
        vector: &[f32],
        top_k: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<VectorMatch>, StoreError> {
        self.check_dim(vector)?;
        let mut query = vector.to_vec();
        normalize(&mut query);

        let mut matches: Vec<VectorMatch> = self
            .entries
            .iter()
            .filter(|e| filter.is_none_or(|f| f.matches(&e.value().1)))
            .map(|e| {
                let (values, metadata) = e.value();
                VectorMatch {
                    id: e.key().clone(),
                    score: f64::from(cosine_sim(&query, values).clamp(0.0, 1.0)),
                    metadata: metadata.clone(),
                }
            })
            .collect();

        matches.sort_by(|a, b| b.score.total_cmp(&a.score).then_with(|| a.id.cmp(&b.id)));
        matches.truncate(top_k);
        Ok(matches)
    }

    async fn describe_stats(&self) -> Result<IndexStats, StoreError> {
        Ok(IndexStats {
            total_vectors: self.entries.len() as u64,
            dimension: self.dim,
            fullness: 0.0,
        })
    }
}

/// Dot product; equals cosine similarity for L2-normalized inputs.
fn cosine_sim(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

fn normalize(v: &mut [f32]) {
    let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in v.iter_mut() {
            *x /= norm;
        }
    }
}

//! The vector-index seam shared by every backend.

use std::collections::BTreeMap;

use async_trait::async_trait;
use precedent_core::PassageMetadata;
use serde::Serialize;
use serde_json::{Value, json};

use crate::StoreError;

/// One vector to write, keyed by its stable id.
#[derive(Debug, Clone, PartialEq)]
pub struct VectorRecord {
    pub id: String,
    pub values: Vec<f32>,
    pub metadata: PassageMetadata,
}

/// A nearest-neighbour hit. `score` is a similarity in [0, 1], higher is closer.
#[derive(Debug, Clone, PartialEq)]
pub struct VectorMatch {
    pub id: String,
    pub score: f64,
    pub metadata: PassageMetadata,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IndexStats {
    pub total_vectors: u64,
    pub dimension: usize,
    /// Fraction of provisioned capacity in use; 0.0 where the backend has no such notion.
    pub fullness: f64,
}

/// Equality constraints on passage metadata, all of which must hold.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetadataFilter {
    fields: BTreeMap<String, String>,
}

impl MetadataFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Require `field` to equal `value`.
    pub fn eq(mut self, field: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.insert(field.into(), value.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Evaluate against stored metadata. Unknown fields never match.
    pub fn matches(&self, metadata: &PassageMetadata) -> bool {
        self.iter().all(|(field, want)| {
            let have = match field {
                "case_name" => Some(metadata.case_name.as_str()),
                "court" => Some(metadata.court.as_str()),
                "date" => Some(metadata.date.as_str()),
                "citation" => Some(metadata.citation.as_str()),
                "topic" => metadata.topic.as_deref(),
                _ => None,
            };
            have == Some(want)
        })
    }

    /// Render as a Pinecone metadata filter: `{"field": {"$eq": value}}`.
    pub fn to_pinecone(&self) -> Value {
        let map = self
            .iter()
            .map(|(k, v)| (k.to_string(), json!({ "$eq": v })))
            .collect::<serde_json::Map<_, _>>();
        Value::Object(map)
    }

    /// Render as a SQL predicate. Field names are restricted to identifiers.
    pub fn to_sql(&self) -> Result<String, StoreError> {
        let mut clauses = Vec::with_capacity(self.fields.len());
        for (field, value) in self.iter() {
            if field.is_empty() || !field.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
                return Err(StoreError::Other(format!("invalid filter field: {field:?}")));
            }
            clauses.push(format!("{field} = '{}'", value.replace('\'', "''")));
        }
        Ok(clauses.join(" AND "))
    }
}

/// A store of embedded passages searchable by vector similarity.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Insert or overwrite records by id.
    async fn upsert(&self, records: &[VectorRecord]) -> Result<usize, StoreError>;

    /// Nearest neighbours of `vector`, best first, at most `top_k`.
    async fn query(
        &self,
        vector: &[f32],
        top_k: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<VectorMatch>, StoreError>;

    async fn describe_stats(&self) -> Result<IndexStats, StoreError>;
}

//! Ingestion pipeline: reads case documents, chunks them, embeds the chunks,
//! and upserts the vectors into the index.

use std::path::Path;
use std::time::Instant;

use anyhow::Context;
use precedent_ai::EmbeddingService;
use precedent_core::{CaseDocument, Chunker, PassageMetadata, vector_id};
use precedent_store::{VectorIndex, VectorRecord};
use tracing::info;

const EMBED_BATCH_SIZE: usize = 64;
const UPSERT_BATCH_SIZE: usize = 100;

#[derive(Debug, Clone, PartialEq)]
pub struct IngestStats {
    pub documents: usize,
    pub chunks: usize,
    pub vectors: usize,
    pub elapsed_secs: f64,
}

/// Read a JSON array of case documents.
pub fn load_documents(path: &Path) -> anyhow::Result<Vec<CaseDocument>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("parsing {}", path.display()))
}

/// Chunk, embed, and upsert `docs`.
pub async fn run_ingest(
    docs: &[CaseDocument],
    chunker: &Chunker,
    embedder: &dyn EmbeddingService,
    index: &dyn VectorIndex,
) -> anyhow::Result<IngestStats> {
    let start = Instant::now();

    let chunks: Vec<PassageMetadata> = docs
        .iter()
        .flat_map(|doc| chunker.chunk_document(doc))
        .collect();
    let total = chunks.len();
    eprintln!("  Split {} documents into {total} chunks", docs.len());

    let mut pending: Vec<VectorRecord> = Vec::with_capacity(UPSERT_BATCH_SIZE);
    let mut embedded = 0usize;
    let mut upserted = 0usize;

    for batch in chunks.chunks(EMBED_BATCH_SIZE) {
        let texts: Vec<&str> = batch.iter().map(|c| c.text.as_str()).collect();
        let vectors = embedder
            .embed_batch(&texts)
            .await
            .context("generating embeddings")?;

        for (meta, values) in batch.iter().zip(vectors) {
            pending.push(VectorRecord {
                id: vector_id(&meta.case_name, meta.chunk_index),
                values,
                metadata: meta.clone(),
            });
            if pending.len() == UPSERT_BATCH_SIZE {
                upserted += index.upsert(&pending).await.context("upserting vectors")?;
                pending.clear();
            }
        }

        embedded += batch.len();
        eprint!(
            "\r  Embedded {embedded}/{total} ({:.1}%)",
            embedded as f64 / total as f64 * 100.0
        );
    }
    if !pending.is_empty() {
        upserted += index.upsert(&pending).await.context("upserting vectors")?;
    }
    if total > 0 {
        eprintln!();
    }

    let stats = IngestStats {
        documents: docs.len(),
        chunks: total,
        vectors: upserted,
        elapsed_secs: start.elapsed().as_secs_f64(),
    };
    info!(
        documents = stats.documents,
        chunks = stats.chunks,
        vectors = stats.vectors,
        "ingestion complete"
    );
    Ok(stats)
}

//! Chunking of case documents for ingestion.
//!
//! Documents are split into overlapping windows of `cl100k_base` tokens, the
//! encoding the OpenAI embedding models use. Each chunk carries its source
//! document's metadata plus its position and the number of sibling chunks,
//! and is stored under a sanitized vector id.
//!
//! # Windowing
//!
//! With `chunk_size = 5` and `chunk_overlap = 2`, tokens `t0..t9` become
//! `t0..t4`, `t3..t7`, `t6..t9`. Chunk text is sliced from the original
//! document by token byte offsets and trimmed, so interior whitespace and
//! line breaks survive.

use std::fmt;
use std::sync::OnceLock;

use serde::{Deserialize, Serialize};
use tiktoken_rs::CoreBPE;

use crate::config::ConfigError;
use crate::types::PassageMetadata;

static CL100K: OnceLock<CoreBPE> = OnceLock::new();

/// The shared `cl100k_base` encoder, loaded on first use.
fn cl100k() -> Result<&'static CoreBPE, ConfigError> {
    if let Some(bpe) = CL100K.get() {
        return Ok(bpe);
    }
    let bpe = tiktoken_rs::cl100k_base()
        .map_err(|e| ConfigError::Invalid(format!("cannot load cl100k_base tokenizer: {e}")))?;
    Ok(CL100K.get_or_init(|| bpe))
}

/// Number of `cl100k_base` tokens in `text`.
pub fn count_tokens(text: &str) -> Result<usize, ConfigError> {
    Ok(cl100k()?.encode_ordinary(text).len())
}

/// A source case as supplied to the ingestion pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaseDocument {
    pub case_name: String,
    pub court: String,
    pub date: String,
    pub citation: String,
    #[serde(default)]
    pub topic: Option<String>,
    pub content: String,
}

/// Token-window splitter.
#[derive(Clone, Copy)]
pub struct Chunker {
    chunk_size: usize,
    chunk_overlap: usize,
    bpe: &'static CoreBPE,
}

impl fmt::Debug for Chunker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Chunker")
            .field("chunk_size", &self.chunk_size)
            .field("chunk_overlap", &self.chunk_overlap)
            .finish_non_exhaustive()
    }
}

impl Chunker {
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Result<Self, ConfigError> {
        if chunk_size == 0 || chunk_overlap >= chunk_size {
            return Err(ConfigError::Invalid(format!(
                "chunk_overlap ({chunk_overlap}) must be smaller than chunk_size ({chunk_size})"
            )));
        }
        Ok(Self {
            chunk_size,
            chunk_overlap,
            bpe: cl100k()?,
        })
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn chunk_overlap(&self) -> usize {
        self.chunk_overlap
    }

    /// Split text into overlapping windows of at most `chunk_size` tokens.
    /// Whitespace-only text yields no chunks.
    pub fn split<'a>(&self, text: &'a str) -> Vec<&'a str> {
        let offsets = self.token_offsets(text);
        let n = offsets.len() - 1;
        let mut chunks = Vec::new();
        if n == 0 {
            return chunks;
        }

        let mut start = 0;
        loop {
            let mut end = (start + self.chunk_size).min(n);
            let mut piece = slice(text, offsets[start], offsets[end]);
            // A window starting mid-word can re-encode longer than it was cut.
            while end > start + 1 && self.bpe.encode_ordinary(piece).len() > self.chunk_size {
                end -= 1;
                piece = slice(text, offsets[start], offsets[end]);
            }
            if !piece.is_empty() {
                chunks.push(piece);
            }
            if end == n {
                break;
            }
            start = end.saturating_sub(self.chunk_overlap).max(start + 1);
        }
        chunks
    }

    /// Chunk a document into index-ready metadata records.
    pub fn chunk_document(&self, doc: &CaseDocument) -> Vec<PassageMetadata> {
        let pieces = self.split(&doc.content);
        let total = pieces.len() as u32;
        pieces
            .into_iter()
            .enumerate()
            .map(|(i, text)| PassageMetadata {
                case_name: doc.case_name.clone(),
                court: doc.court.clone(),
                date: doc.date.clone(),
                citation: doc.citation.clone(),
                topic: doc.topic.clone(),
                chunk_index: i as u32,
                total_chunks: total,
                text: text.to_string(),
            })
            .collect()
    }

    /// Byte offset of every token start, plus `text.len()` at the end.
    fn token_offsets(&self, text: &str) -> Vec<usize> {
        let tokens = self.bpe.encode_ordinary(text);
        let mut offsets = Vec::with_capacity(tokens.len() + 1);
        let mut at = 0;
        offsets.push(at);
        for bytes in self.bpe._decode_native_and_split(tokens) {
            at += bytes.len();
            offsets.push(at.min(text.len()));
        }
        offsets
    }
}

/// Trimmed `text[start..end]`, with both ends pulled inward to char boundaries
/// since a token may hold part of a multi-byte character.
fn slice(text: &str, mut start: usize, mut end: usize) -> &str {
    while start < end && !text.is_char_boundary(start) {
        start += 1;
    }
    while end > start && !text.is_char_boundary(end) {
        end -= 1;
    }
    text[start..end].trim()
}

/// Vector id for a chunk: `{case_name}_chunk_{index}` with spaces turned into
/// underscores and dots removed.
pub fn vector_id(case_name: &str, chunk_index: u32) -> String {
    format!("{case_name}_chunk_{chunk_index}")
        .replace(' ', "_")
        .replace('.', "")
}

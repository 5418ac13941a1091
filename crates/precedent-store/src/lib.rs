//! Storage layer: vector indexes for case-law passages and per-session conversation turns.

mod error;
mod index;
mod memory;
mod pinecone;
mod session;

pub use error::StoreError;
pub use index::{IndexStats, MetadataFilter, VectorIndex, VectorMatch, VectorRecord};
pub use memory::MemoryIndex;
pub use pinecone::{PineconeControlPlane, PineconeIndex, ServerlessSpec};
pub use session::{InMemorySessionStore, SessionStore};

#[cfg(feature = "lancedb")]
mod lance;
#[cfg(feature = "lancedb")]
pub use lance::LanceIndex;

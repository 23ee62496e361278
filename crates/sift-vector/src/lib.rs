//! Embeddings and the brute-force vector index.
//!
//! Provides the embedding service trait with a deterministic hash-based
//! implementation, and an in-memory cosine similarity index that can be
//! saved to and restored from disk.

pub mod embedding;
pub mod index;

pub use embedding::{normalize, DynEmbeddingService, EmbeddingService, HashEmbedding, DEFAULT_DIMENSIONS};
pub use index::{cosine_similarity, dot, SearchHit, VectorIndex};

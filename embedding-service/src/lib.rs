//! Text-embedding service for the catalog deduplicator.
//!
//! Keeps the embedding concern isolated from matching and persistence:
//! - Call an Ollama-style `/api/embeddings` endpoint and return dense vectors.
//! - Apply the `query: ` / `passage: ` task prefixes expected by the model.
//! - Unit-normalize and dimension-check every vector.
//! - Cache by exact input text (bounded LRU, safe for concurrent get/put).
//! - Batch documents with bounded concurrency.
//!
//! A missing vector is a *valid outcome*, not an error: when the backend is
//! down or rate-limited past the retry budget, callers receive `None` and the
//! semantic feature of the matcher degrades to zero for that listing.

pub mod cache;
pub mod config;
pub mod errors;
pub mod http;
pub mod noop;
pub mod service;

pub use cache::EmbeddingCache;
pub use config::EmbeddingConfig;
pub use errors::EmbeddingError;
pub use http::HttpEmbedder;
pub use noop::NoopEmbedder;
pub use service::{
    DisabledVectorizer, EmbeddingBackend, EmbeddingService, Vectorizer, cosine_similarity,
};

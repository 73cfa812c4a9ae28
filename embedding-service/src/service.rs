//! Service wrapper: prefixes, caching, batching, and the engine-facing
//! `Vectorizer` seam.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::cache::EmbeddingCache;
use crate::config::EmbeddingConfig;
use crate::errors::EmbeddingError;

/// Task prefixes expected by e5-family embedding models.
const QUERY_PREFIX: &str = "query: ";
const PASSAGE_PREFIX: &str = "passage: ";

/// Provider interface for embedding generation.
///
/// Implement this trait to plug in your own backend (HTTP server, local
/// model, test fake).
#[async_trait]
pub trait EmbeddingBackend: Send + Sync {
    /// Embed one already-prefixed text.
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError>;

    /// Vector dimensionality this backend produces.
    fn dimension(&self) -> usize;

    /// Best-effort availability check; never fails.
    async fn probe(&self) -> bool;
}

/// The narrow seam the dedup engine consumes.
///
/// A `None` entry means "no vector for this text" and is always tolerated
/// downstream; the semantic feature simply contributes zero.
#[async_trait]
pub trait Vectorizer: Send + Sync {
    /// Embed a batch of document texts, one optional vector per input.
    async fn embed_documents(&self, texts: &[String]) -> Vec<Option<Vec<f32>>>;

    /// Whether the vectorizer is expected to produce vectors at all.
    fn enabled(&self) -> bool;
}

/// High-level embedding service: prefix handling, unit normalization,
/// LRU caching, and bounded-concurrency batching over a backend.
pub struct EmbeddingService {
    backend: Arc<dyn EmbeddingBackend>,
    cache: EmbeddingCache,
    concurrency: usize,
}

impl EmbeddingService {
    pub fn new(backend: Arc<dyn EmbeddingBackend>, cfg: &EmbeddingConfig) -> Self {
        Self {
            backend,
            cache: EmbeddingCache::new(cfg.cache_size),
            concurrency: cfg.concurrency.max(1),
        }
    }

    /// Embed a search query (`query: ` prefix).
    pub async fn generate_query_embedding(&self, text: &str) -> Option<Vec<f32>> {
        self.embed_prefixed(QUERY_PREFIX, text).await
    }

    /// Embed a document (`passage: ` prefix).
    pub async fn generate_document_embedding(&self, text: &str) -> Option<Vec<f32>> {
        self.embed_prefixed(PASSAGE_PREFIX, text).await
    }

    /// Embed many documents with bounded concurrency, preserving order.
    pub async fn generate_batch_document_embeddings(
        &self,
        texts: &[String],
    ) -> Vec<Option<Vec<f32>>> {
        let mut results: Vec<(usize, Option<Vec<f32>>)> = Vec::with_capacity(texts.len());
        for chunk in texts.chunks(self.concurrency) {
            let offset = results.len();
            let mut futs = Vec::with_capacity(chunk.len());
            for text in chunk {
                futs.push(self.generate_document_embedding(text));
            }
            let chunk_results = futures::future::join_all(futs).await;
            for (j, v) in chunk_results.into_iter().enumerate() {
                results.push((offset + j, v));
            }
        }

        let mut out: Vec<Option<Vec<f32>>> = vec![None; texts.len()];
        for (i, v) in results {
            out[i] = v;
        }
        out
    }

    /// Live availability probe of the underlying backend.
    pub async fn is_available(&self) -> bool {
        self.backend.probe().await
    }

    pub fn dimension(&self) -> usize {
        self.backend.dimension()
    }

    async fn embed_prefixed(&self, prefix: &str, text: &str) -> Option<Vec<f32>> {
        let key = format!("{prefix}{text}");
        if let Some(hit) = self.cache.get(&key) {
            return Some(hit.as_ref().clone());
        }

        match self.backend.embed(&key).await {
            Ok(mut v) => {
                normalize_unit(&mut v);
                self.cache.put(key, Arc::new(v.clone()));
                Some(v)
            }
            Err(e) => {
                warn!("embed failed, returning null vector: {e}");
                None
            }
        }
    }
}

#[async_trait]
impl Vectorizer for EmbeddingService {
    async fn embed_documents(&self, texts: &[String]) -> Vec<Option<Vec<f32>>> {
        debug!("vectorizer: embedding batch of {}", texts.len());
        self.generate_batch_document_embeddings(texts).await
    }

    fn enabled(&self) -> bool {
        true
    }
}

/// Vectorizer that produces no vectors; used when embeddings are disabled.
#[derive(Clone, Copy, Default)]
pub struct DisabledVectorizer;

#[async_trait]
impl Vectorizer for DisabledVectorizer {
    async fn embed_documents(&self, texts: &[String]) -> Vec<Option<Vec<f32>>> {
        vec![None; texts.len()]
    }

    fn enabled(&self) -> bool {
        false
    }
}

/// Cosine similarity; safe on mismatched or zero-length inputs (returns 0).
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.is_empty() || a.len() != b.len() {
        return 0.0;
    }
    let mut dot = 0.0f64;
    let mut na = 0.0f64;
    let mut nb = 0.0f64;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += f64::from(*x) * f64::from(*y);
        na += f64::from(*x) * f64::from(*x);
        nb += f64::from(*y) * f64::from(*y);
    }
    if na == 0.0 || nb == 0.0 {
        return 0.0;
    }
    dot / (na.sqrt() * nb.sqrt())
}

fn normalize_unit(v: &mut [f32]) {
    let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in v.iter_mut() {
            *x /= norm;
        }
    }
}

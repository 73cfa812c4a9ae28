//! No-op backend for headless runs and tests.

use async_trait::async_trait;

use crate::errors::EmbeddingError;
use crate::service::EmbeddingBackend;

/// Backend that never produces a vector. The service layer maps its failures
/// to `None`, so the semantic feature degrades to zero everywhere.
#[derive(Clone, Default)]
pub struct NoopEmbedder;

#[async_trait]
impl EmbeddingBackend for NoopEmbedder {
    async fn embed(&self, _text: &str) -> Result<Vec<f32>, EmbeddingError> {
        Err(EmbeddingError::Unavailable("noop backend".into()))
    }

    fn dimension(&self) -> usize {
        768
    }

    async fn probe(&self) -> bool {
        false
    }
}

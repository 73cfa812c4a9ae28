//! Embedding service configuration.

use crate::errors::EmbeddingError;

/// Knobs for the HTTP embedding backend and the service wrapper.
#[derive(Clone, Debug)]
pub struct EmbeddingConfig {
    /// Base URL of the embedding server (e.g. `http://localhost:11434`).
    pub endpoint: String,
    /// Model name or tag (e.g. `multilingual-e5-base`).
    pub model: String,
    /// Expected vector dimensionality.
    pub dim: usize,
    /// Per-call deadline in seconds.
    pub timeout_secs: u64,
    /// Maximum in-flight requests for batch embedding.
    pub concurrency: usize,
    /// Bounded LRU cache capacity (entries), keyed by prefixed input text.
    pub cache_size: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:11434".to_string(),
            model: "multilingual-e5-base".to_string(),
            dim: 768,
            timeout_secs: 60,
            concurrency: 4,
            cache_size: 10_000,
        }
    }
}

impl EmbeddingConfig {
    /// Build from environment variables with defaults.
    ///
    /// Recognized vars: `EMBEDDING_URL`, `EMBEDDING_MODEL`, `EMBEDDING_DIM`,
    /// `EMBEDDING_TIMEOUT_SECS`, `EMBEDDING_CONCURRENCY`,
    /// `EMBEDDING_CACHE_SIZE`.
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            endpoint: env("EMBEDDING_URL", &d.endpoint),
            model: env("EMBEDDING_MODEL", &d.model),
            dim: parse("EMBEDDING_DIM", d.dim),
            timeout_secs: parse("EMBEDDING_TIMEOUT_SECS", d.timeout_secs),
            concurrency: parse("EMBEDDING_CONCURRENCY", d.concurrency),
            cache_size: parse("EMBEDDING_CACHE_SIZE", d.cache_size),
        }
    }

    /// Validates mandatory fields.
    pub fn validate(&self) -> Result<(), EmbeddingError> {
        if !self.endpoint.starts_with("http://") && !self.endpoint.starts_with("https://") {
            return Err(EmbeddingError::Config(format!(
                "endpoint must start with http:// or https://, got {}",
                self.endpoint
            )));
        }
        if self.model.trim().is_empty() {
            return Err(EmbeddingError::Config("empty model name".into()));
        }
        if self.dim == 0 {
            return Err(EmbeddingError::Config("dim must be positive".into()));
        }
        Ok(())
    }
}

fn env(k: &str, dflt: &str) -> String {
    std::env::var(k).unwrap_or_else(|_| dflt.to_string())
}

fn parse<T: std::str::FromStr>(k: &str, dflt: T) -> T {
    std::env::var(k)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(dflt)
}

//! HTTP embedding backend (Ollama-style `/api/embeddings`).

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::EmbeddingConfig;
use crate::errors::EmbeddingError;
use crate::service::EmbeddingBackend;

/// Delay before the single retry on a rate-limit response.
const RATE_LIMIT_RETRY: Duration = Duration::from_secs(2);

#[derive(Debug, Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    prompt: &'a str,
}

#[derive(Debug, Deserialize)]
struct EmbedResponse {
    embedding: Vec<f32>,
}

/// Embedding provider backed by an HTTP server.
#[derive(Clone)]
pub struct HttpEmbedder {
    client: Client,
    cfg: EmbeddingConfig,
}

impl HttpEmbedder {
    /// Construct a new embedder from configuration.
    ///
    /// # Errors
    /// Returns [`EmbeddingError::Config`] on invalid configuration or if the
    /// HTTP client cannot be built.
    pub fn new(cfg: EmbeddingConfig) -> Result<Self, EmbeddingError> {
        cfg.validate()?;
        let client = Client::builder()
            .timeout(Duration::from_secs(cfg.timeout_secs))
            .build()
            .map_err(|e| EmbeddingError::Config(format!("http client build: {e}")))?;
        Ok(Self { client, cfg })
    }

    async fn call_once(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let url = format!("{}/api/embeddings", self.cfg.endpoint);
        let req = EmbedRequest {
            model: &self.cfg.model,
            prompt: text,
        };

        let resp = self.client.post(&url).json(&req).send().await?;

        if resp.status() == StatusCode::TOO_MANY_REQUESTS {
            return Err(EmbeddingError::RateLimited);
        }
        if !resp.status().is_success() {
            let code = resp.status();
            let body = resp
                .text()
                .await
                .unwrap_or_else(|_| "<failed to read body>".into());
            return Err(EmbeddingError::Http(format!(
                "embeddings non-200: {code}; body: {body}"
            )));
        }

        let parsed: EmbedResponse = resp
            .json()
            .await
            .map_err(|e| EmbeddingError::Parse(format!("embeddings json: {e}")))?;

        if parsed.embedding.len() != self.cfg.dim {
            return Err(EmbeddingError::VectorSizeMismatch {
                got: parsed.embedding.len(),
                want: self.cfg.dim,
            });
        }

        Ok(parsed.embedding)
    }
}

#[async_trait]
impl EmbeddingBackend for HttpEmbedder {
    /// Embed one already-prefixed text, retrying once on a rate limit.
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        match self.call_once(text).await {
            Err(EmbeddingError::RateLimited) => {
                warn!("embed: rate limited, retrying once in {RATE_LIMIT_RETRY:?}");
                tokio::time::sleep(RATE_LIMIT_RETRY).await;
                self.call_once(text).await
            }
            other => other,
        }
    }

    fn dimension(&self) -> usize {
        self.cfg.dim
    }

    /// Best-effort availability probe against the model listing endpoint.
    async fn probe(&self) -> bool {
        let url = format!("{}/api/tags", self.cfg.endpoint);
        match self.client.get(&url).send().await {
            Ok(resp) if resp.status().is_success() => {
                debug!("embed probe ok: {url}");
                true
            }
            Ok(resp) => {
                warn!("embed probe non-200: {url} -> {}", resp.status());
                false
            }
            Err(e) => {
                warn!("embed probe failed: {url}: {e}");
                false
            }
        }
    }
}

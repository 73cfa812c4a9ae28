//! Error types used across the embedding library.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum EmbeddingError {
    #[error("config error: {0}")]
    Config(String),

    #[error("backend unavailable: {0}")]
    Unavailable(String),

    #[error("rate limited")]
    RateLimited,

    #[error("http error: {0}")]
    Http(String),

    #[error("parse error: {0}")]
    Parse(String),

    #[error("vector size mismatch: got={got}, want={want}")]
    VectorSizeMismatch { got: usize, want: usize },
}

impl From<reqwest::Error> for EmbeddingError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() || e.is_connect() {
            EmbeddingError::Unavailable(e.to_string())
        } else {
            EmbeddingError::Http(e.to_string())
        }
    }
}

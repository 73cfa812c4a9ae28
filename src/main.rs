use std::error::Error;
use std::sync::Arc;

use tracing::info;
use tracing_subscriber::EnvFilter;

use catalog_store::{JobMode, MemoryRepository};
use dedup_engine::{DedupConfig, JobRunner, ThresholdOracle};
use embedding_service::{
    DisabledVectorizer, EmbeddingConfig, EmbeddingService, HttpEmbedder, Vectorizer,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    // Load environment variables from .env file when present.
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cfg = config_from_env();
    info!(
        "starting dedup job: mode={:?} batch_size={} min_score={}",
        cfg.mode, cfg.batch_size, cfg.min_match_score
    );

    // Local runs go against the in-memory store; the warehouse backend is
    // wired in by the deployment that owns it.
    let repo = Arc::new(MemoryRepository::new());

    let vectorizer: Arc<dyn Vectorizer> = if cfg.embedding_enabled {
        let embed_cfg = EmbeddingConfig::from_env();
        match HttpEmbedder::new(embed_cfg.clone()) {
            Ok(backend) => {
                let service = EmbeddingService::new(Arc::new(backend), &embed_cfg);
                if service.is_available().await {
                    Arc::new(service)
                } else {
                    info!("embedding service unreachable, semantic features disabled");
                    Arc::new(DisabledVectorizer)
                }
            }
            Err(e) => {
                info!("embedding config rejected ({e}), semantic features disabled");
                Arc::new(DisabledVectorizer)
            }
        }
    } else {
        Arc::new(DisabledVectorizer)
    };

    let runner = JobRunner::new(repo, vectorizer, Arc::new(ThresholdOracle::new()), cfg);
    let job = runner.deduplicate().await?;

    info!(
        "job {} finished: {} raw -> {} canonicals, {} mappings, reduction {:.3}",
        job.id,
        job.processed,
        job.canonical_created,
        job.mappings_created,
        job.reduction_rate.unwrap_or(0.0)
    );
    Ok(())
}

fn config_from_env() -> DedupConfig {
    let defaults = DedupConfig::default();
    DedupConfig {
        mode: match env("DEDUP_MODE", "incremental").as_str() {
            "fresh" => JobMode::Fresh,
            _ => JobMode::Incremental,
        },
        batch_size: parse("DEDUP_BATCH_SIZE", defaults.batch_size),
        min_match_score: parse("DEDUP_MIN_SCORE", defaults.min_match_score),
        embedding_enabled: env("DEDUP_EMBEDDING", "true") == "true",
        cross_source_enabled: env("DEDUP_CROSS_SOURCE", "true") == "true",
        stale_after_hours: parse("DEDUP_STALE_AFTER_HOURS", defaults.stale_after_hours),
        intra_source: defaults.intra_source,
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

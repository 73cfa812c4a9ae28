//! Engine configuration.
//!
//! The orchestrator receives a plain config struct; it never reads the
//! environment itself. The binary layer is responsible for assembling one
//! (typically from env) and passing it in.

use catalog_store::JobMode;
use serde::{Deserialize, Serialize};

/// Thresholds for intra-source identity-duplicate collapse.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct IntraSourceThresholds {
    /// Name similarity that, combined with an equal price, marks a duplicate.
    pub name_sim_near: f64,
    /// Name similarity that marks a duplicate on its own (prices absent or
    /// within `price_tol`).
    pub name_sim_high: f64,
    /// Relative price tolerance for the high-similarity rule.
    pub price_tol: f64,
}

impl Default for IntraSourceThresholds {
    fn default() -> Self {
        Self {
            name_sim_near: 0.90,
            name_sim_high: 0.95,
            price_tol: 0.02,
        }
    }
}

/// Configuration for one deduplication run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DedupConfig {
    pub mode: JobMode,
    /// Raw listings per batch.
    pub batch_size: usize,
    /// Floor for cluster admission and cross-source code matching.
    pub min_match_score: f64,
    pub embedding_enabled: bool,
    pub cross_source_enabled: bool,
    /// Crawler staleness window; carried through untouched, never
    /// interpreted by the engine.
    pub stale_after_hours: u32,
    pub intra_source: IntraSourceThresholds,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            mode: JobMode::Incremental,
            batch_size: 500,
            min_match_score: 0.75,
            embedding_enabled: true,
            cross_source_enabled: true,
            stale_after_hours: 24,
            intra_source: IntraSourceThresholds::default(),
        }
    }
}

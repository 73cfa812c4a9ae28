//! Progress reporting for a dedup job.
//!
//! The sink is the only "wire" surface of the engine besides the job row:
//! it fires on every phase change and at every batch boundary. Servers use
//! the no-op sink; dashboards subscribe with their own implementation.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use catalog_store::{JobPhase, MatchMethod, SourceStat};

/// One recently recorded cross-source match, for live dashboards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecentMatch {
    pub raw_1: i64,
    pub raw_2: i64,
    pub source_1: String,
    pub source_2: String,
    pub score: f64,
    pub method: MatchMethod,
}

/// Progress snapshot emitted to the sink.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DedupProgress {
    pub job_id: String,
    pub phase: JobPhase,
    pub total_products: u64,
    pub processed_products: u64,
    pub current_source: Option<String>,
    pub sources_processed: u64,
    pub total_sources: u64,
    pub matches_found: u64,
    pub canonical_created: u64,
    pub mappings_created: u64,
    pub time_elapsed_ms: u64,
    pub estimated_time_remaining_ms: Option<u64>,
    pub current_batch: u64,
    pub total_batches: u64,
    /// Most recent matches, capped at ten.
    pub recent_matches: Vec<RecentMatch>,
    pub source_breakdown: BTreeMap<String, SourceStat>,
}

/// Minimal progress interface used inside the job runner.
pub trait ProgressSink: Send + Sync {
    /// Receive one snapshot. Implementations must not block for long; the
    /// runner awaits nothing here.
    fn emit(&self, _progress: &DedupProgress) {}
}

/// No-op reporter for servers/headless runs.
#[derive(Default, Clone, Copy)]
pub struct NoopProgress;
impl ProgressSink for NoopProgress {}

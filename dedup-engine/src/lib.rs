//! Entity-resolution engine for the Vietnamese e-commerce catalog.
//!
//! Consolidates raw listings harvested from Tiki, Shopee, Lazada, CellphoneS,
//! Điện Máy Xanh, and Thế Giới Di Động into a deduplicated canonical catalog
//! with per-source price offers kept linked.
//!
//! The pipeline, leaves first:
//! - `features` — per-listing derivations (extracted code, category group).
//! - `scoring` — eight-signal pair scorer with hard gates and a
//!   classification ladder.
//! - `collapse` — intra-source identity-duplicate collapse.
//! - `cluster` — greedy single-link clustering per primary block.
//! - `variants` — storage/RAM/color variant separation.
//! - `quality` — 0–100 quality assessment with issue strings.
//! - `thresholds` — adaptive thresholds by category and source pair.
//! - `history` — append-only versioned change log with rollback.
//! - `review` — human-adjudication queue.
//! - `job` — the orchestrator driving everything over the raw store.
//!
//! Collaborators (repository, vectorizer, threshold oracle, progress sink)
//! are passed in on construction; tests swap in fakes. The engine performs
//! no environment reads and no direct I/O beyond those seams.

pub mod cluster;
pub mod collapse;
pub mod config;
pub mod errors;
pub mod features;
pub mod history;
pub mod job;
pub mod progress;
pub mod quality;
pub mod retry;
pub mod review;
pub mod scoring;
pub mod thresholds;
pub mod variants;

pub use config::{DedupConfig, IntraSourceThresholds};
pub use errors::{EngineError, EngineResult};
pub use history::HistoryLog;
pub use job::{CancelFlag, JobRunner};
pub use progress::{DedupProgress, NoopProgress, ProgressSink, RecentMatch};
pub use review::ReviewQueue;
pub use scoring::{Confidence, FeatureVector, FeatureWeights, PairScore, PairScorer};
pub use thresholds::{CategoryGroup, ThresholdOracle, category_group};

//! Catalog entities.
//!
//! Every record the engine touches is an explicit struct with tagged enums
//! for the polymorphic fields; nothing is an ad-hoc key-value bag. Ownership
//! is acyclic: a canonical owns its mappings, variants, and history entries
//! by foreign key; raw listings exist independently and are never deleted by
//! the engine.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One harvesting origin (Tiki, Shopee, …).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Source {
    pub id: i64,
    pub name: String,
    pub is_active: bool,
}

/// Dedup bookkeeping flag on a raw listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DedupStatus {
    Pending,
    Processed,
}

/// A single observation of a product at one source, as harvested.
///
/// Crawlers create these rows; the engine only ever flips `dedup_status`
/// and `last_dedup_at`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawListing {
    pub id: i64,
    pub source_id: i64,
    /// Per-source natural key.
    pub external_id: String,
    pub external_url: Option<String>,
    pub name: String,
    pub name_normalized: String,
    pub brand_raw: Option<String>,
    pub category_raw: Option<String>,
    pub price: Option<f64>,
    pub original_price: Option<f64>,
    pub discount_percent: Option<f64>,
    pub image_url: Option<String>,
    pub images: Vec<String>,
    pub description: Option<String>,
    /// 0–5 star rating as reported by the source.
    pub rating: Option<f64>,
    pub review_count: Option<i64>,
    pub sold_count: Option<i64>,
    pub available: bool,
    pub specs: BTreeMap<String, String>,
    pub shop_id: Option<String>,
    pub dedup_status: DedupStatus,
    pub last_dedup_at: Option<DateTime<Utc>>,
}

/// How a mapping between a raw listing and a canonical was decided.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchMethod {
    ExactMatch,
    CodeExtract,
    MlClassifier,
    HighSimilarity,
    ModerateSimilarity,
    CrossSource,
    /// Scoring outcome only; never persisted on a mapping.
    NoMatch,
}

/// The consolidated representation of one real-world product.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Canonical {
    pub id: i64,
    pub name: String,
    pub name_normalized: String,
    /// Bounded, unique, derived from the canonical code or the name.
    pub slug: String,
    pub brand_id: Option<i64>,
    pub category_id: Option<i64>,
    pub description: Option<String>,
    pub image_url: Option<String>,
    pub images: Vec<String>,
    pub canonical_specs: BTreeMap<String, String>,
    pub min_price: Option<f64>,
    pub max_price: Option<f64>,
    pub avg_rating: Option<f64>,
    pub total_reviews: i64,
    /// Distinct `source_id`s across current mappings.
    pub source_count: i64,
    pub quality_score: Option<f64>,
    pub quality_issues: Vec<String>,
    pub needs_review: bool,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Link between a raw listing and its canonical. Unique on
/// `(canonical_id, raw_id)`; a raw listing has at most one mapping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Mapping {
    pub canonical_id: i64,
    pub raw_id: i64,
    pub source_id: i64,
    pub confidence_score: f64,
    pub matching_method: MatchMethod,
    pub created_at: DateTime<Utc>,
}

/// A spec-differentiated facet of a canonical. Unique on
/// `(canonical_id, variant_key)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Variant {
    pub canonical_id: i64,
    /// `storage|ram|color` with `base` for absent parts.
    pub variant_key: String,
    pub storage_gb: Option<u32>,
    pub ram_gb: Option<u32>,
    pub color: Option<String>,
    pub min_price: Option<f64>,
    pub max_price: Option<f64>,
    pub raw_ids: BTreeSet<i64>,
}

/// Recorded evidence between two raw listings of different sources.
/// Append-only, keyed by `(job_id, raw_1, raw_2)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchingPair {
    pub job_id: String,
    pub raw_1: i64,
    pub raw_2: i64,
    pub source_1: i64,
    pub source_2: i64,
    pub match_score: f64,
    pub match_method: MatchMethod,
    pub canonical_id: Option<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HistoryEvent {
    Created,
    Updated,
    Merged,
    Split,
    Deleted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerSource {
    AutoDedup,
    ManualReview,
    UserFeedback,
    System,
}

/// Per-canonical event with a field-level diff. Versions are 1-based and
/// contiguous per canonical.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub canonical_id: i64,
    pub version: i64,
    pub event: HistoryEvent,
    /// `field → {"old": …, "new": …}`.
    pub changes: serde_json::Map<String, serde_json::Value>,
    pub triggered_by: TriggerSource,
    pub created_by: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewType {
    DubiousMatch,
    LowQuality,
    Conflict,
    Ambiguous,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReviewStatus {
    Pending,
    Approved,
    Rejected,
    Skipped,
}

/// Item waiting for human adjudication.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewItem {
    pub id: i64,
    pub item_type: ReviewType,
    pub payload: serde_json::Value,
    pub reason: String,
    pub priority: i32,
    pub status: ReviewStatus,
    pub reviewer: Option<String>,
    pub created_at: DateTime<Utc>,
    pub reviewed_at: Option<DateTime<Utc>>,
}

/// Review item before insertion (id and timestamps assigned by the store).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewReviewItem {
    pub item_type: ReviewType,
    pub payload: serde_json::Value,
    pub reason: String,
    pub priority: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobMode {
    Incremental,
    Fresh,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Running,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobPhase {
    Init,
    Embedding,
    Clustering,
    Matching,
    Saving,
    Done,
    Error,
}

/// Per-source progress counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceStat {
    pub processed: u64,
    pub matched: u64,
}

/// One deduplication run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub mode: JobMode,
    pub status: JobStatus,
    pub phase: JobPhase,
    pub total_raw: u64,
    pub processed: u64,
    pub canonical_created: u64,
    pub mappings_created: u64,
    pub source_breakdown: BTreeMap<String, SourceStat>,
    /// Symmetric source-name-pair match counts.
    pub cross_source_matrix: BTreeMap<String, BTreeMap<String, u64>>,
    /// `1 − canonical_created / total_raw`; 1.0 on an empty store.
    pub reduction_rate: Option<f64>,
    pub error_message: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

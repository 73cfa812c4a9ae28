//! The repository contract the dedup engine writes through.
//!
//! Backends (warehouse, in-memory) implement this trait; the engine owns
//! call ordering and never relies on cross-method transactions. All mutating
//! operations are idempotent on their natural keys:
//! - canonicals key on `slug`
//! - mappings on `(canonical_id, raw_id)`
//! - variants on `(canonical_id, variant_key)`
//! - matching pairs on `(job_id, raw_1, raw_2)`
//! - history entries on `(canonical_id, version)` (insert-only, conflict on
//!   a taken version so optimistic writers can retry)

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

use crate::entities::{
    Canonical, DedupStatus, HistoryEntry, Job, Mapping, MatchingPair, NewReviewItem, RawListing,
    ReviewItem, ReviewStatus, Source, Variant,
};
use crate::errors::StoreResult;

#[async_trait]
pub trait CatalogRepository: Send + Sync {
    // ---- Sources -----------------------------------------------------------

    async fn list_active_sources(&self) -> StoreResult<Vec<Source>>;

    // ---- Raw listings ------------------------------------------------------

    /// Count raw listings, optionally restricted to one dedup status.
    async fn count_raw_listings(&self, status: Option<DedupStatus>) -> StoreResult<u64>;

    /// Fetch up to `limit` raw listings with the given status, ordered by
    /// `(brand_raw, name_normalized, source_id, external_id)`.
    async fn fetch_raw_batch(
        &self,
        status: Option<DedupStatus>,
        limit: usize,
    ) -> StoreResult<Vec<RawListing>>;

    /// Read raw listings by id; missing ids are skipped, not errors.
    async fn get_raw_listings(&self, ids: &[i64]) -> StoreResult<Vec<RawListing>>;

    /// Case-insensitive `%`-wildcard search on `name_normalized`, excluding
    /// one source. Used by cross-source candidate fetches.
    async fn search_raw_by_name(
        &self,
        pattern: &str,
        exclude_source_id: i64,
        limit: usize,
    ) -> StoreResult<Vec<RawListing>>;

    /// Flip `dedup_status` to processed and stamp `last_dedup_at`.
    async fn mark_raw_processed(&self, ids: &[i64], at: DateTime<Utc>) -> StoreResult<()>;

    /// Reset every raw listing to pending (fresh mode).
    async fn reset_dedup_status(&self) -> StoreResult<()>;

    // ---- Canonicals --------------------------------------------------------

    /// Insert keyed on `slug`: when the slug already exists the existing id
    /// comes back and the row is left untouched.
    async fn insert_canonical(&self, canonical: &Canonical) -> StoreResult<i64>;

    async fn update_canonical(&self, canonical: &Canonical) -> StoreResult<()>;

    async fn get_canonical(&self, id: i64) -> StoreResult<Option<Canonical>>;

    async fn find_canonical_by_slug(&self, slug: &str) -> StoreResult<Option<Canonical>>;

    /// Case-insensitive starts-with lookup on `name_normalized`.
    async fn find_canonicals_by_name_prefix(
        &self,
        prefix: &str,
        limit: usize,
    ) -> StoreResult<Vec<Canonical>>;

    /// Active canonicals whose mappings cover exactly one source.
    async fn list_single_source_canonicals(&self) -> StoreResult<Vec<Canonical>>;

    async fn all_canonicals(&self) -> StoreResult<Vec<Canonical>>;

    // ---- Mappings and variants --------------------------------------------

    /// Upsert on `(canonical_id, raw_id)`. Returns `true` when a new row was
    /// created. A raw listing already mapped to a *different* canonical is
    /// left alone (`false`).
    async fn upsert_mapping(&self, mapping: &Mapping) -> StoreResult<bool>;

    async fn mapping_for_raw(&self, raw_id: i64) -> StoreResult<Option<Mapping>>;

    async fn mappings_for_canonical(&self, canonical_id: i64) -> StoreResult<Vec<Mapping>>;

    /// Upsert on `(canonical_id, variant_key)`; the new row replaces the old.
    async fn upsert_variant(&self, variant: &Variant) -> StoreResult<()>;

    async fn variants_for_canonical(&self, canonical_id: i64) -> StoreResult<Vec<Variant>>;

    /// Append-only insert keyed by `(job_id, raw_1, raw_2)`; replays no-op.
    async fn insert_matching_pair(&self, pair: &MatchingPair) -> StoreResult<()>;

    /// Drop all derived state: canonicals, mappings, variants, matching
    /// pairs. Raw listings and history survive (fresh mode).
    async fn delete_derived(&self) -> StoreResult<()>;

    // ---- History -----------------------------------------------------------

    /// Highest version recorded for a canonical, `0` when none.
    async fn max_history_version(&self, canonical_id: i64) -> StoreResult<i64>;

    /// Insert-only; a taken `(canonical_id, version)` yields
    /// [`crate::StoreError::VersionConflict`].
    async fn insert_history(&self, entry: &HistoryEntry) -> StoreResult<()>;

    /// All entries for a canonical, ascending by version.
    async fn history_for_canonical(&self, canonical_id: i64) -> StoreResult<Vec<HistoryEntry>>;

    /// Entries across all canonicals created at or after `since`.
    async fn recent_history(&self, since: DateTime<Utc>) -> StoreResult<Vec<HistoryEntry>>;

    // ---- Review queue ------------------------------------------------------

    async fn insert_review_items(&self, items: &[NewReviewItem]) -> StoreResult<usize>;

    /// Pending items, priority descending then `created_at` ascending.
    async fn pending_review_items(&self, limit: usize) -> StoreResult<Vec<ReviewItem>>;

    async fn update_review_status(
        &self,
        id: i64,
        status: ReviewStatus,
        reviewer: Option<&str>,
    ) -> StoreResult<()>;

    /// Delete non-pending items reviewed before `cutoff`; returns the count.
    async fn delete_reviewed_before(&self, cutoff: DateTime<Utc>) -> StoreResult<usize>;

    /// Item counts keyed by status name.
    async fn review_stats(&self) -> StoreResult<BTreeMap<String, u64>>;

    // ---- Jobs --------------------------------------------------------------

    async fn create_job(&self, job: &Job) -> StoreResult<()>;

    async fn update_job(&self, job: &Job) -> StoreResult<()>;

    async fn get_job(&self, id: &str) -> StoreResult<Option<Job>>;

    // ---- Reference data ----------------------------------------------------

    /// Resolve a brand id by name, case-insensitive exact then contains.
    async fn resolve_brand_id(&self, name: &str) -> StoreResult<Option<i64>>;

    /// Resolve a category id by name, case-insensitive exact then contains.
    async fn resolve_category_id(&self, name: &str) -> StoreResult<Option<i64>>;
}

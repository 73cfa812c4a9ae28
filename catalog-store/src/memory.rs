//! In-memory repository.
//!
//! Implements the full [`CatalogRepository`] contract with the same
//! idempotence keys as the warehouse, so the engine behaves identically in
//! tests and in local runs without external services. All state sits behind
//! one async `RwLock`; the engine drives a single job at a time, so lock
//! granularity is not a concern here.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::trace;

use crate::entities::{
    Canonical, DedupStatus, HistoryEntry, Job, Mapping, MatchingPair, NewReviewItem, RawListing,
    ReviewItem, ReviewStatus, Source, Variant,
};
use crate::errors::{StoreError, StoreResult};
use crate::repo::CatalogRepository;

#[derive(Default)]
struct State {
    sources: BTreeMap<i64, Source>,
    raw: BTreeMap<i64, RawListing>,
    canonicals: BTreeMap<i64, Canonical>,
    slug_index: BTreeMap<String, i64>,
    mappings: BTreeMap<(i64, i64), Mapping>,
    raw_to_canonical: BTreeMap<i64, i64>,
    variants: BTreeMap<(i64, String), Variant>,
    pairs: BTreeMap<(String, i64, i64), MatchingPair>,
    history: BTreeMap<(i64, i64), HistoryEntry>,
    reviews: BTreeMap<i64, ReviewItem>,
    jobs: BTreeMap<String, Job>,
    brands: BTreeMap<i64, String>,
    categories: BTreeMap<i64, String>,
    next_source_id: i64,
    next_raw_id: i64,
    next_canonical_id: i64,
    next_review_id: i64,
    next_brand_id: i64,
    next_category_id: i64,
}

/// Repository backed by process memory.
#[derive(Default)]
pub struct MemoryRepository {
    state: RwLock<State>,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a source (active by default). Test/seeding helper.
    pub async fn add_source(&self, name: &str) -> Source {
        let mut s = self.state.write().await;
        s.next_source_id += 1;
        let source = Source {
            id: s.next_source_id,
            name: name.to_string(),
            is_active: true,
        };
        s.sources.insert(source.id, source.clone());
        source
    }

    /// Register a brand row for `resolve_brand_id`. Test/seeding helper.
    pub async fn add_brand(&self, name: &str) -> i64 {
        let mut s = self.state.write().await;
        s.next_brand_id += 1;
        let id = s.next_brand_id;
        s.brands.insert(id, name.to_string());
        id
    }

    /// Register a category row for `resolve_category_id`. Test/seeding helper.
    pub async fn add_category(&self, name: &str) -> i64 {
        let mut s = self.state.write().await;
        s.next_category_id += 1;
        let id = s.next_category_id;
        s.categories.insert(id, name.to_string());
        id
    }

    /// Insert a raw listing, assigning an id when `listing.id == 0`.
    /// Crawler stand-in for tests and local runs.
    pub async fn add_raw(&self, mut listing: RawListing) -> i64 {
        let mut s = self.state.write().await;
        if listing.id == 0 {
            s.next_raw_id += 1;
            listing.id = s.next_raw_id;
        } else {
            s.next_raw_id = s.next_raw_id.max(listing.id);
        }
        let id = listing.id;
        s.raw.insert(id, listing);
        id
    }

    /// All matching pairs, for assertions.
    pub async fn matching_pairs(&self) -> Vec<MatchingPair> {
        self.state.read().await.pairs.values().cloned().collect()
    }
}

/// Case-insensitive SQL-`LIKE` with `%` wildcards only.
fn ilike(text: &str, pattern: &str) -> bool {
    let text = text.to_lowercase();
    let pattern = pattern.to_lowercase();
    let anchored_start = !pattern.starts_with('%');
    let anchored_end = !pattern.ends_with('%');
    let parts: Vec<&str> = pattern.split('%').filter(|p| !p.is_empty()).collect();
    if parts.is_empty() {
        return true;
    }

    let mut pos = 0usize;
    for (i, part) in parts.iter().enumerate() {
        match text[pos..].find(part) {
            Some(found) => {
                let at = pos + found;
                if i == 0 && anchored_start && at != 0 {
                    return false;
                }
                pos = at + part.len();
            }
            None => return false,
        }
    }

    // Anchored tail: the final part must also close out the string.
    if anchored_end {
        let last = parts[parts.len() - 1];
        if !text.ends_with(last) {
            return false;
        }
    }
    true
}

fn batch_sort_key(r: &RawListing) -> (String, String, i64, String) {
    (
        r.brand_raw.clone().unwrap_or_default(),
        r.name_normalized.clone(),
        r.source_id,
        r.external_id.clone(),
    )
}

#[async_trait]
impl CatalogRepository for MemoryRepository {
    async fn list_active_sources(&self) -> StoreResult<Vec<Source>> {
        let s = self.state.read().await;
        Ok(s.sources.values().filter(|x| x.is_active).cloned().collect())
    }

    async fn count_raw_listings(&self, status: Option<DedupStatus>) -> StoreResult<u64> {
        let s = self.state.read().await;
        Ok(s.raw
            .values()
            .filter(|r| status.is_none_or(|want| r.dedup_status == want))
            .count() as u64)
    }

    async fn fetch_raw_batch(
        &self,
        status: Option<DedupStatus>,
        limit: usize,
    ) -> StoreResult<Vec<RawListing>> {
        let s = self.state.read().await;
        let mut rows: Vec<RawListing> = s
            .raw
            .values()
            .filter(|r| status.is_none_or(|want| r.dedup_status == want))
            .cloned()
            .collect();
        rows.sort_by_key(batch_sort_key);
        rows.truncate(limit);
        trace!("fetch_raw_batch: {} rows", rows.len());
        Ok(rows)
    }

    async fn get_raw_listings(&self, ids: &[i64]) -> StoreResult<Vec<RawListing>> {
        let s = self.state.read().await;
        Ok(ids.iter().filter_map(|id| s.raw.get(id).cloned()).collect())
    }

    async fn search_raw_by_name(
        &self,
        pattern: &str,
        exclude_source_id: i64,
        limit: usize,
    ) -> StoreResult<Vec<RawListing>> {
        let s = self.state.read().await;
        let mut rows: Vec<RawListing> = s
            .raw
            .values()
            .filter(|r| r.source_id != exclude_source_id && ilike(&r.name_normalized, pattern))
            .cloned()
            .collect();
        rows.sort_by_key(|r| r.id);
        rows.truncate(limit);
        Ok(rows)
    }

    async fn mark_raw_processed(&self, ids: &[i64], at: DateTime<Utc>) -> StoreResult<()> {
        let mut s = self.state.write().await;
        for id in ids {
            if let Some(r) = s.raw.get_mut(id) {
                r.dedup_status = DedupStatus::Processed;
                r.last_dedup_at = Some(at);
            }
        }
        Ok(())
    }

    async fn reset_dedup_status(&self) -> StoreResult<()> {
        let mut s = self.state.write().await;
        for r in s.raw.values_mut() {
            r.dedup_status = DedupStatus::Pending;
            r.last_dedup_at = None;
        }
        Ok(())
    }

    async fn insert_canonical(&self, canonical: &Canonical) -> StoreResult<i64> {
        let mut s = self.state.write().await;
        if let Some(existing) = s.slug_index.get(&canonical.slug) {
            return Ok(*existing);
        }
        s.next_canonical_id += 1;
        let id = s.next_canonical_id;
        let mut row = canonical.clone();
        row.id = id;
        s.slug_index.insert(row.slug.clone(), id);
        s.canonicals.insert(id, row);
        Ok(id)
    }

    async fn update_canonical(&self, canonical: &Canonical) -> StoreResult<()> {
        let mut s = self.state.write().await;
        if let Some(holder) = s.slug_index.get(&canonical.slug) {
            if *holder != canonical.id {
                return Err(StoreError::SlugConflict(canonical.slug.clone()));
            }
        }
        let old_slug = match s.canonicals.get(&canonical.id) {
            Some(existing) => existing.slug.clone(),
            None => return Err(StoreError::NotFound(format!("canonical {}", canonical.id))),
        };
        if old_slug != canonical.slug {
            s.slug_index.remove(&old_slug);
            s.slug_index.insert(canonical.slug.clone(), canonical.id);
        }
        s.canonicals.insert(canonical.id, canonical.clone());
        Ok(())
    }

    async fn get_canonical(&self, id: i64) -> StoreResult<Option<Canonical>> {
        Ok(self.state.read().await.canonicals.get(&id).cloned())
    }

    async fn find_canonical_by_slug(&self, slug: &str) -> StoreResult<Option<Canonical>> {
        let s = self.state.read().await;
        Ok(s.slug_index
            .get(slug)
            .and_then(|id| s.canonicals.get(id))
            .cloned())
    }

    async fn find_canonicals_by_name_prefix(
        &self,
        prefix: &str,
        limit: usize,
    ) -> StoreResult<Vec<Canonical>> {
        let s = self.state.read().await;
        let needle = prefix.to_lowercase();
        let mut rows: Vec<Canonical> = s
            .canonicals
            .values()
            .filter(|c| c.is_active && c.name_normalized.to_lowercase().starts_with(&needle))
            .cloned()
            .collect();
        rows.sort_by_key(|c| c.id);
        rows.truncate(limit);
        Ok(rows)
    }

    async fn list_single_source_canonicals(&self) -> StoreResult<Vec<Canonical>> {
        let s = self.state.read().await;
        let mut rows: Vec<Canonical> = s
            .canonicals
            .values()
            .filter(|c| c.is_active && c.source_count == 1)
            .cloned()
            .collect();
        rows.sort_by_key(|c| c.id);
        Ok(rows)
    }

    async fn all_canonicals(&self) -> StoreResult<Vec<Canonical>> {
        let s = self.state.read().await;
        let mut rows: Vec<Canonical> = s.canonicals.values().cloned().collect();
        rows.sort_by_key(|c| c.id);
        Ok(rows)
    }

    async fn upsert_mapping(&self, mapping: &Mapping) -> StoreResult<bool> {
        let mut s = self.state.write().await;
        match s.raw_to_canonical.get(&mapping.raw_id) {
            Some(owner) if *owner != mapping.canonical_id => {
                // A raw listing carries at most one mapping; keep the first.
                return Ok(false);
            }
            Some(_) => {
                s.mappings
                    .insert((mapping.canonical_id, mapping.raw_id), mapping.clone());
                return Ok(false);
            }
            None => {}
        }
        s.raw_to_canonical
            .insert(mapping.raw_id, mapping.canonical_id);
        s.mappings
            .insert((mapping.canonical_id, mapping.raw_id), mapping.clone());
        Ok(true)
    }

    async fn mapping_for_raw(&self, raw_id: i64) -> StoreResult<Option<Mapping>> {
        let s = self.state.read().await;
        Ok(s.raw_to_canonical
            .get(&raw_id)
            .and_then(|c| s.mappings.get(&(*c, raw_id)))
            .cloned())
    }

    async fn mappings_for_canonical(&self, canonical_id: i64) -> StoreResult<Vec<Mapping>> {
        let s = self.state.read().await;
        Ok(s.mappings
            .range((canonical_id, i64::MIN)..=(canonical_id, i64::MAX))
            .map(|(_, m)| m.clone())
            .collect())
    }

    async fn upsert_variant(&self, variant: &Variant) -> StoreResult<()> {
        let mut s = self.state.write().await;
        s.variants.insert(
            (variant.canonical_id, variant.variant_key.clone()),
            variant.clone(),
        );
        Ok(())
    }

    async fn variants_for_canonical(&self, canonical_id: i64) -> StoreResult<Vec<Variant>> {
        let s = self.state.read().await;
        Ok(s.variants
            .values()
            .filter(|v| v.canonical_id == canonical_id)
            .cloned()
            .collect())
    }

    async fn insert_matching_pair(&self, pair: &MatchingPair) -> StoreResult<()> {
        let mut s = self.state.write().await;
        let key = (pair.job_id.clone(), pair.raw_1, pair.raw_2);
        s.pairs.entry(key).or_insert_with(|| pair.clone());
        Ok(())
    }

    async fn delete_derived(&self) -> StoreResult<()> {
        let mut s = self.state.write().await;
        s.canonicals.clear();
        s.slug_index.clear();
        s.mappings.clear();
        s.raw_to_canonical.clear();
        s.variants.clear();
        s.pairs.clear();
        Ok(())
    }

    async fn max_history_version(&self, canonical_id: i64) -> StoreResult<i64> {
        let s = self.state.read().await;
        Ok(s.history
            .range((canonical_id, i64::MIN)..=(canonical_id, i64::MAX))
            .map(|((_, v), _)| *v)
            .max()
            .unwrap_or(0))
    }

    async fn insert_history(&self, entry: &HistoryEntry) -> StoreResult<()> {
        let mut s = self.state.write().await;
        let key = (entry.canonical_id, entry.version);
        if s.history.contains_key(&key) {
            return Err(StoreError::VersionConflict {
                canonical_id: entry.canonical_id,
                version: entry.version,
            });
        }
        s.history.insert(key, entry.clone());
        Ok(())
    }

    async fn history_for_canonical(&self, canonical_id: i64) -> StoreResult<Vec<HistoryEntry>> {
        let s = self.state.read().await;
        Ok(s.history
            .range((canonical_id, i64::MIN)..=(canonical_id, i64::MAX))
            .map(|(_, e)| e.clone())
            .collect())
    }

    async fn recent_history(&self, since: DateTime<Utc>) -> StoreResult<Vec<HistoryEntry>> {
        let s = self.state.read().await;
        let mut rows: Vec<HistoryEntry> = s
            .history
            .values()
            .filter(|e| e.created_at >= since)
            .cloned()
            .collect();
        rows.sort_by_key(|e| (e.created_at, e.canonical_id, e.version));
        Ok(rows)
    }

    async fn insert_review_items(&self, items: &[NewReviewItem]) -> StoreResult<usize> {
        let mut s = self.state.write().await;
        let now = Utc::now();
        for item in items {
            s.next_review_id += 1;
            let id = s.next_review_id;
            s.reviews.insert(
                id,
                ReviewItem {
                    id,
                    item_type: item.item_type,
                    payload: item.payload.clone(),
                    reason: item.reason.clone(),
                    priority: item.priority,
                    status: ReviewStatus::Pending,
                    reviewer: None,
                    created_at: now,
                    reviewed_at: None,
                },
            );
        }
        Ok(items.len())
    }

    async fn pending_review_items(&self, limit: usize) -> StoreResult<Vec<ReviewItem>> {
        let s = self.state.read().await;
        let mut rows: Vec<ReviewItem> = s
            .reviews
            .values()
            .filter(|r| r.status == ReviewStatus::Pending)
            .cloned()
            .collect();
        rows.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then(a.created_at.cmp(&b.created_at))
                .then(a.id.cmp(&b.id))
        });
        rows.truncate(limit);
        Ok(rows)
    }

    async fn update_review_status(
        &self,
        id: i64,
        status: ReviewStatus,
        reviewer: Option<&str>,
    ) -> StoreResult<()> {
        let mut s = self.state.write().await;
        let item = s
            .reviews
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound(format!("review item {id}")))?;
        item.status = status;
        item.reviewer = reviewer.map(str::to_string);
        item.reviewed_at = Some(Utc::now());
        Ok(())
    }

    async fn delete_reviewed_before(&self, cutoff: DateTime<Utc>) -> StoreResult<usize> {
        let mut s = self.state.write().await;
        let doomed: Vec<i64> = s
            .reviews
            .values()
            .filter(|r| {
                r.status != ReviewStatus::Pending
                    && r.reviewed_at.is_some_and(|at| at < cutoff)
            })
            .map(|r| r.id)
            .collect();
        for id in &doomed {
            s.reviews.remove(id);
        }
        Ok(doomed.len())
    }

    async fn review_stats(&self) -> StoreResult<BTreeMap<String, u64>> {
        let s = self.state.read().await;
        let mut stats: BTreeMap<String, u64> = BTreeMap::new();
        for item in s.reviews.values() {
            let key = match item.status {
                ReviewStatus::Pending => "pending",
                ReviewStatus::Approved => "approved",
                ReviewStatus::Rejected => "rejected",
                ReviewStatus::Skipped => "skipped",
            };
            *stats.entry(key.to_string()).or_default() += 1;
        }
        Ok(stats)
    }

    async fn create_job(&self, job: &Job) -> StoreResult<()> {
        let mut s = self.state.write().await;
        s.jobs.insert(job.id.clone(), job.clone());
        Ok(())
    }

    async fn update_job(&self, job: &Job) -> StoreResult<()> {
        let mut s = self.state.write().await;
        if !s.jobs.contains_key(&job.id) {
            return Err(StoreError::NotFound(format!("job {}", job.id)));
        }
        s.jobs.insert(job.id.clone(), job.clone());
        Ok(())
    }

    async fn get_job(&self, id: &str) -> StoreResult<Option<Job>> {
        Ok(self.state.read().await.jobs.get(id).cloned())
    }

    async fn resolve_brand_id(&self, name: &str) -> StoreResult<Option<i64>> {
        let s = self.state.read().await;
        Ok(resolve_by_name(&s.brands, name))
    }

    async fn resolve_category_id(&self, name: &str) -> StoreResult<Option<i64>> {
        let s = self.state.read().await;
        Ok(resolve_by_name(&s.categories, name))
    }
}

/// Case-insensitive exact match first, then substring containment.
fn resolve_by_name(table: &BTreeMap<i64, String>, name: &str) -> Option<i64> {
    let needle = name.to_lowercase();
    if needle.is_empty() {
        return None;
    }
    if let Some((id, _)) = table.iter().find(|(_, v)| v.to_lowercase() == needle) {
        return Some(*id);
    }
    table
        .iter()
        .find(|(_, v)| {
            let hay = v.to_lowercase();
            hay.contains(&needle) || needle.contains(&hay)
        })
        .map(|(id, _)| *id)
}

//! Human-adjudication queue.
//!
//! Dubious pairs, low-quality canonicals, consistency conflicts, and
//! ambiguous clusters land here with type-specific priorities; reviewers
//! drain the queue ordered by priority, oldest first within a priority.

use std::sync::Arc;

use chrono::{Duration, Utc};
use serde_json::json;
use tracing::debug;

use catalog_store::{
    CatalogRepository, MatchMethod, NewReviewItem, ReviewItem, ReviewStatus, ReviewType,
};

use crate::errors::EngineResult;

/// Priority floor for conflicts: they block convergence, so they outrank
/// most score-derived priorities.
const CONFLICT_PRIORITY: i32 = 80;
const AMBIGUOUS_PRIORITY: i32 = 60;

/// A scored pair that fell short of its threshold.
#[derive(Debug, Clone)]
pub struct DubiousPair {
    pub raw_1: i64,
    pub raw_2: i64,
    pub score: f64,
    pub method: MatchMethod,
}

/// Review queue bound to a repository.
pub struct ReviewQueue {
    repo: Arc<dyn CatalogRepository>,
}

impl ReviewQueue {
    pub fn new(repo: Arc<dyn CatalogRepository>) -> Self {
        Self { repo }
    }

    /// Bulk insert pre-built items.
    pub async fn queue_for_review(&self, items: Vec<NewReviewItem>) -> EngineResult<usize> {
        if items.is_empty() {
            return Ok(0);
        }
        let n = self.repo.insert_review_items(&items).await?;
        debug!("review: queued {n} items");
        Ok(n)
    }

    /// Enqueue every pair scoring below `threshold` with priority
    /// `100 − round(score × 100)`: the closer the miss, the lower the
    /// urgency.
    pub async fn flag_dubious_matches(
        &self,
        pairs: &[DubiousPair],
        threshold: f64,
    ) -> EngineResult<usize> {
        let items: Vec<NewReviewItem> = pairs
            .iter()
            .filter(|p| p.score < threshold)
            .map(|p| NewReviewItem {
                item_type: ReviewType::DubiousMatch,
                payload: json!({
                    "raw_1": p.raw_1,
                    "raw_2": p.raw_2,
                    "score": p.score,
                    "method": p.method,
                    "threshold": threshold,
                }),
                reason: format!(
                    "pair ({}, {}) scored {:.2}, below threshold {:.2}",
                    p.raw_1, p.raw_2, p.score, threshold
                ),
                priority: 100 - (p.score * 100.0).round() as i32,
            })
            .collect();
        self.queue_for_review(items).await
    }

    /// Enqueue a low-quality canonical; urgency grows as the score drops.
    pub async fn flag_quality_issues(
        &self,
        canonical_id: i64,
        quality_score: f64,
        issues: &[String],
    ) -> EngineResult<usize> {
        self.queue_for_review(vec![NewReviewItem {
            item_type: ReviewType::LowQuality,
            payload: json!({
                "canonical_id": canonical_id,
                "quality_score": quality_score,
                "issues": issues,
            }),
            reason: format!(
                "canonical {canonical_id} quality {quality_score:.0} with {} issues",
                issues.len()
            ),
            priority: (100.0 - quality_score).round() as i32,
        }])
        .await
    }

    /// Enqueue a consistency conflict (history version race, slug
    /// collision) the engine could not resolve by retrying.
    pub async fn flag_conflicts(&self, detail: &str, payload: serde_json::Value) -> EngineResult<usize> {
        self.queue_for_review(vec![NewReviewItem {
            item_type: ReviewType::Conflict,
            payload,
            reason: detail.to_string(),
            priority: CONFLICT_PRIORITY,
        }])
        .await
    }

    /// Enqueue a cluster that looked real but could not be persisted.
    pub async fn flag_ambiguous(
        &self,
        detail: &str,
        payload: serde_json::Value,
    ) -> EngineResult<usize> {
        self.queue_for_review(vec![NewReviewItem {
            item_type: ReviewType::Ambiguous,
            payload,
            reason: detail.to_string(),
            priority: AMBIGUOUS_PRIORITY,
        }])
        .await
    }

    /// Pending items, priority descending then oldest first.
    pub async fn get_pending(&self, limit: usize) -> EngineResult<Vec<ReviewItem>> {
        Ok(self.repo.pending_review_items(limit).await?)
    }

    pub async fn update_status(
        &self,
        id: i64,
        status: ReviewStatus,
        reviewer: Option<&str>,
    ) -> EngineResult<()> {
        self.repo.update_review_status(id, status, reviewer).await?;
        Ok(())
    }

    /// Drop non-pending items reviewed more than `days` ago.
    pub async fn clear_old_reviewed(&self, days: i64) -> EngineResult<usize> {
        let cutoff = Utc::now() - Duration::days(days);
        Ok(self.repo.delete_reviewed_before(cutoff).await?)
    }

    pub async fn get_stats(&self) -> EngineResult<std::collections::BTreeMap<String, u64>> {
        Ok(self.repo.review_stats().await?)
    }
}

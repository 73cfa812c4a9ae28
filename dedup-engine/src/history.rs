//! Append-only per-canonical change history with rollback.
//!
//! Every entry carries a field-level diff `{field: {old, new}}` and a
//! version allocated as `max(version) + 1`. The allocation is optimistic:
//! a lost race surfaces as a version conflict and is retried once after
//! re-reading. Keys starting with `_` are markers, not fields, and are
//! skipped during replay and diffing.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::{Map, Value, json};
use tracing::{debug, warn};

use catalog_store::{
    Canonical, CatalogRepository, HistoryEntry, HistoryEvent, StoreError, TriggerSource,
};

use crate::errors::{EngineError, EngineResult};

/// History tracker bound to a repository.
pub struct HistoryLog {
    repo: Arc<dyn CatalogRepository>,
}

impl HistoryLog {
    pub fn new(repo: Arc<dyn CatalogRepository>) -> Self {
        Self { repo }
    }

    /// Append one event, allocating the next version. Retries a version
    /// conflict once; a second conflict maps to
    /// [`EngineError::Consistency`] so the caller can enqueue a conflict
    /// review item.
    pub async fn track_change(
        &self,
        canonical_id: i64,
        event: HistoryEvent,
        changes: Map<String, Value>,
        triggered_by: TriggerSource,
        created_by: Option<&str>,
    ) -> EngineResult<i64> {
        match self
            .try_insert(canonical_id, event, &changes, triggered_by, created_by)
            .await
        {
            Err(EngineError::Store(StoreError::VersionConflict { .. })) => {
                warn!("history: version conflict on canonical {canonical_id}, retrying once");
                match self
                    .try_insert(canonical_id, event, &changes, triggered_by, created_by)
                    .await
                {
                    Err(EngineError::Store(StoreError::VersionConflict { version, .. })) => {
                        Err(EngineError::Consistency(format!(
                            "history version {version} contended twice on canonical {canonical_id}"
                        )))
                    }
                    other => other,
                }
            }
            other => other,
        }
    }

    async fn try_insert(
        &self,
        canonical_id: i64,
        event: HistoryEvent,
        changes: &Map<String, Value>,
        triggered_by: TriggerSource,
        created_by: Option<&str>,
    ) -> EngineResult<i64> {
        let version = self.repo.max_history_version(canonical_id).await? + 1;
        let entry = HistoryEntry {
            canonical_id,
            version,
            event,
            changes: changes.clone(),
            triggered_by,
            created_by: created_by.map(str::to_string),
            created_at: Utc::now(),
        };
        self.repo.insert_history(&entry).await?;
        debug!("history: canonical {canonical_id} v{version} {event:?}");
        Ok(version)
    }

    /// Full history, ascending by version.
    pub async fn get_history(&self, canonical_id: i64) -> EngineResult<Vec<HistoryEntry>> {
        Ok(self.repo.history_for_canonical(canonical_id).await?)
    }

    /// Reconstructed field snapshot at `version`, replaying `new` values
    /// from v1 upward.
    pub async fn get_version(
        &self,
        canonical_id: i64,
        version: i64,
    ) -> EngineResult<Map<String, Value>> {
        let entries = self.repo.history_for_canonical(canonical_id).await?;
        if entries.iter().all(|e| e.version != version) {
            return Err(EngineError::Store(StoreError::NotFound(format!(
                "canonical {canonical_id} version {version}"
            ))));
        }
        let mut snapshot = Map::new();
        for entry in entries.into_iter().filter(|e| e.version <= version) {
            for (field, delta) in &entry.changes {
                if field.starts_with('_') {
                    continue;
                }
                if let Some(new) = delta.get("new") {
                    snapshot.insert(field.clone(), new.clone());
                }
            }
        }
        Ok(snapshot)
    }

    /// Entries across all canonicals created at or after `since`.
    pub async fn get_recent_changes(
        &self,
        since: DateTime<Utc>,
    ) -> EngineResult<Vec<HistoryEntry>> {
        Ok(self.repo.recent_history(since).await?)
    }

    /// Roll a canonical back to `version`.
    ///
    /// Replays v1..=`version` into a snapshot, diffs it against the live
    /// row, writes the delta as a new `updated` entry carrying a
    /// `_rollback_to` marker, and updates the canonical row. Returns the
    /// updated canonical.
    pub async fn rollback_to_version(
        &self,
        canonical_id: i64,
        version: i64,
        user: Option<&str>,
    ) -> EngineResult<Canonical> {
        let snapshot = self.get_version(canonical_id, version).await?;
        let mut live = self
            .repo
            .get_canonical(canonical_id)
            .await?
            .ok_or_else(|| {
                EngineError::Store(StoreError::NotFound(format!("canonical {canonical_id}")))
            })?;

        let mut changes = Map::new();
        for (field, wanted) in &snapshot {
            let current = read_field(&live, field);
            if current.as_ref() != Some(wanted) {
                changes.insert(
                    field.clone(),
                    json!({ "old": current.unwrap_or(Value::Null), "new": wanted }),
                );
                apply_field(&mut live, field, wanted);
            }
        }
        changes.insert("_rollback_to".to_string(), json!({ "old": Value::Null, "new": version }));

        live.updated_at = Utc::now();
        self.repo.update_canonical(&live).await?;
        self.track_change(
            canonical_id,
            HistoryEvent::Updated,
            changes,
            TriggerSource::ManualReview,
            user,
        )
        .await?;
        Ok(live)
    }
}

/// Current value of a tracked field as JSON; `None` for unknown fields.
fn read_field(c: &Canonical, field: &str) -> Option<Value> {
    let v = match field {
        "name" => json!(c.name),
        "name_normalized" => json!(c.name_normalized),
        "slug" => json!(c.slug),
        "description" => json!(c.description),
        "image_url" => json!(c.image_url),
        "min_price" => json!(c.min_price),
        "max_price" => json!(c.max_price),
        "avg_rating" => json!(c.avg_rating),
        "total_reviews" => json!(c.total_reviews),
        "source_count" => json!(c.source_count),
        "quality_score" => json!(c.quality_score),
        "needs_review" => json!(c.needs_review),
        "is_active" => json!(c.is_active),
        _ => return None,
    };
    Some(v)
}

/// Write a tracked field back from JSON; unknown fields and type mismatches
/// are ignored, never fatal.
fn apply_field(c: &mut Canonical, field: &str, value: &Value) {
    match field {
        "name" => {
            if let Some(s) = value.as_str() {
                c.name = s.to_string();
            }
        }
        "name_normalized" => {
            if let Some(s) = value.as_str() {
                c.name_normalized = s.to_string();
            }
        }
        "slug" => {
            if let Some(s) = value.as_str() {
                c.slug = s.to_string();
            }
        }
        "description" => c.description = value.as_str().map(str::to_string),
        "image_url" => c.image_url = value.as_str().map(str::to_string),
        "min_price" => c.min_price = value.as_f64(),
        "max_price" => c.max_price = value.as_f64(),
        "avg_rating" => c.avg_rating = value.as_f64(),
        "total_reviews" => {
            if let Some(n) = value.as_i64() {
                c.total_reviews = n;
            }
        }
        "source_count" => {
            if let Some(n) = value.as_i64() {
                c.source_count = n;
            }
        }
        "quality_score" => c.quality_score = value.as_f64(),
        "needs_review" => {
            if let Some(b) = value.as_bool() {
                c.needs_review = b;
            }
        }
        "is_active" => {
            if let Some(b) = value.as_bool() {
                c.is_active = b;
            }
        }
        _ => {}
    }
}

/// Build a `{field: {old, new}}` diff map from pairs.
pub fn diff(pairs: &[(&str, Value, Value)]) -> Map<String, Value> {
    let mut changes = Map::new();
    for (field, old, new) in pairs {
        if old != new {
            changes.insert((*field).to_string(), json!({ "old": old, "new": new }));
        }
    }
    changes
}

#[cfg(test)]
mod tests {
    use super::*;
    use catalog_store::MemoryRepository;
    use std::collections::BTreeMap;

    fn canonical(slug: &str, description: &str) -> Canonical {
        let now = Utc::now();
        Canonical {
            id: 0,
            name: slug.to_string(),
            name_normalized: slug.to_string(),
            slug: slug.to_string(),
            brand_id: None,
            category_id: None,
            description: Some(description.to_string()),
            image_url: None,
            images: Vec::new(),
            canonical_specs: BTreeMap::new(),
            min_price: None,
            max_price: None,
            avg_rating: None,
            total_reviews: 0,
            source_count: 1,
            quality_score: None,
            quality_issues: Vec::new(),
            needs_review: false,
            is_active: true,
            created_at: now,
            updated_at: now,
        }
    }

    async fn setup() -> (Arc<MemoryRepository>, HistoryLog, i64) {
        let repo = Arc::new(MemoryRepository::new());
        let log = HistoryLog::new(repo.clone());
        let id = repo
            .insert_canonical(&canonical("p-1", "A"))
            .await
            .unwrap();
        (repo, log, id)
    }

    #[tokio::test]
    async fn versions_are_contiguous() {
        let (_, log, id) = setup().await;
        let v1 = log
            .track_change(
                id,
                HistoryEvent::Created,
                diff(&[("description", Value::Null, json!("A"))]),
                TriggerSource::AutoDedup,
                None,
            )
            .await
            .unwrap();
        let v2 = log
            .track_change(
                id,
                HistoryEvent::Updated,
                diff(&[("description", json!("A"), json!("B"))]),
                TriggerSource::AutoDedup,
                None,
            )
            .await
            .unwrap();
        assert_eq!((v1, v2), (1, 2));
        let history = log.get_history(id).await.unwrap();
        let versions: Vec<i64> = history.iter().map(|e| e.version).collect();
        assert_eq!(versions, vec![1, 2]);
    }

    #[tokio::test]
    async fn snapshots_replay_new_values() {
        let (_, log, id) = setup().await;
        log.track_change(
            id,
            HistoryEvent::Created,
            diff(&[
                ("description", Value::Null, json!("A")),
                ("min_price", Value::Null, json!(100.0)),
            ]),
            TriggerSource::AutoDedup,
            None,
        )
        .await
        .unwrap();
        log.track_change(
            id,
            HistoryEvent::Updated,
            diff(&[("description", json!("A"), json!("B"))]),
            TriggerSource::AutoDedup,
            None,
        )
        .await
        .unwrap();

        let v1 = log.get_version(id, 1).await.unwrap();
        assert_eq!(v1.get("description"), Some(&json!("A")));
        let v2 = log.get_version(id, 2).await.unwrap();
        assert_eq!(v2.get("description"), Some(&json!("B")));
        assert_eq!(v2.get("min_price"), Some(&json!(100.0)));
    }

    #[tokio::test]
    async fn rollback_restores_and_marks() {
        let (repo, log, id) = setup().await;
        log.track_change(
            id,
            HistoryEvent::Created,
            diff(&[("description", Value::Null, json!("A"))]),
            TriggerSource::AutoDedup,
            None,
        )
        .await
        .unwrap();

        let mut live = repo.get_canonical(id).await.unwrap().unwrap();
        live.description = Some("B".into());
        repo.update_canonical(&live).await.unwrap();
        log.track_change(
            id,
            HistoryEvent::Updated,
            diff(&[("description", json!("A"), json!("B"))]),
            TriggerSource::AutoDedup,
            None,
        )
        .await
        .unwrap();

        let rolled = log.rollback_to_version(id, 1, Some("qa")).await.unwrap();
        assert_eq!(rolled.description.as_deref(), Some("A"));

        let history = log.get_history(id).await.unwrap();
        assert_eq!(history.len(), 3);
        let last = &history[2];
        assert_eq!(last.version, 3);
        assert_eq!(
            last.changes.get("_rollback_to").and_then(|m| m.get("new")),
            Some(&json!(1))
        );

        // Rolling forward again restores the pre-rollback snapshot.
        let forward = log.rollback_to_version(id, 2, Some("qa")).await.unwrap();
        assert_eq!(forward.description.as_deref(), Some("B"));
    }

    #[tokio::test]
    async fn get_version_rejects_unknown_versions() {
        let (_, log, id) = setup().await;
        assert!(log.get_version(id, 3).await.is_err());
    }
}

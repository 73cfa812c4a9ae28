//! Per-listing derived data shared by the scorer, clusterer, and splitter.

use catalog_store::RawListing;
use match_core::{ExtractedCode, extract, normalize_name, primary_key};

use crate::collapse::CollapsedListing;
use crate::thresholds::{CategoryGroup, category_group};

/// A collapsed listing plus everything derived from it once per batch:
/// extracted code, category group, normalized name, and the optional
/// embedding attached after the batch embed call.
#[derive(Debug, Clone)]
pub struct ListingFeatures {
    pub raw: RawListing,
    pub name_normalized: String,
    pub code: ExtractedCode,
    pub category: Option<CategoryGroup>,
    pub embedding: Option<Vec<f32>>,
    /// Ids of intra-source duplicates folded into this representative.
    pub duplicate_ids: Vec<i64>,
    pub duplicate_shop_ids: Vec<String>,
}

impl ListingFeatures {
    pub fn from_collapsed(collapsed: CollapsedListing) -> Self {
        let raw = collapsed.representative;
        // Crawlers usually fill name_normalized; recompute when they did not.
        let name_normalized = if raw.name_normalized.is_empty() {
            normalize_name(&raw.name)
        } else {
            raw.name_normalized.clone()
        };
        let code = extract(&raw.name);
        let category = raw.category_raw.as_deref().and_then(category_group);
        Self {
            raw,
            name_normalized,
            code,
            category,
            embedding: None,
            duplicate_ids: collapsed.duplicate_ids,
            duplicate_shop_ids: collapsed.duplicate_shop_ids,
        }
    }

    /// Primary blocking key (§ blocking): `brand|model` or `brand|prefix`.
    pub fn block_key(&self) -> String {
        primary_key(&self.code, self.raw.brand_raw.as_deref(), &self.name_normalized)
    }

    /// All raw ids this representative stands for, itself included.
    pub fn all_raw_ids(&self) -> Vec<i64> {
        let mut ids = Vec::with_capacity(1 + self.duplicate_ids.len());
        ids.push(self.raw.id);
        ids.extend(&self.duplicate_ids);
        ids
    }

    /// Fixed traversal key: `(brand_raw, name_normalized, source_id,
    /// external_id)`. Clustering walks listings in this order so re-runs
    /// produce identical clusters.
    pub fn traversal_key(&self) -> (String, String, i64, String) {
        (
            self.raw.brand_raw.clone().unwrap_or_default(),
            self.name_normalized.clone(),
            self.raw.source_id,
            self.raw.external_id.clone(),
        )
    }
}

//! Adaptive match thresholds by category and source pair.
//!
//! Lookup order: source-pair override → category override → default. The
//! oracle is read-mostly; runtime overrides swap a copy-on-write snapshot so
//! readers always observe a consistent table.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use match_core::normalize_name;

/// Default threshold when neither override applies.
pub const DEFAULT_THRESHOLD: f64 = 0.75;

/// Coarse category groups the thresholds (and the pair scorer's category
/// feature) operate on. Vietnamese and English synonyms collapse here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CategoryGroup {
    Phone,
    Laptop,
    Tablet,
    Audio,
    Watch,
    Tv,
    Appliance,
}

const CATEGORY_SYNONYMS: &[(CategoryGroup, &[&str])] = &[
    (
        CategoryGroup::Phone,
        &["điện thoại", "smartphone", "phone", "di động", "dien thoai"],
    ),
    (
        CategoryGroup::Laptop,
        &["laptop", "máy tính xách tay", "notebook", "macbook"],
    ),
    (
        CategoryGroup::Tablet,
        &["máy tính bảng", "tablet", "ipad"],
    ),
    (
        CategoryGroup::Audio,
        &["tai nghe", "loa", "âm thanh", "audio", "headphone", "speaker"],
    ),
    (
        CategoryGroup::Watch,
        &["đồng hồ", "watch", "smartwatch"],
    ),
    (CategoryGroup::Tv, &["tivi", "tv", "television"]),
    (
        CategoryGroup::Appliance,
        &[
            "tủ lạnh",
            "máy giặt",
            "điều hòa",
            "máy lạnh",
            "máy sấy",
            "lò vi sóng",
            "gia dụng",
            "điện máy",
            "appliance",
        ],
    ),
];

/// Resolve a raw category string to its group, `None` when unrecognized.
pub fn category_group(category_raw: &str) -> Option<CategoryGroup> {
    let normalized = normalize_name(category_raw);
    if normalized.is_empty() {
        return None;
    }
    for (group, synonyms) in CATEGORY_SYNONYMS {
        if synonyms.iter().any(|s| {
            normalized.contains(s) || (normalized.chars().count() >= 2 && s.contains(normalized.as_str()))
        }) {
            return Some(*group);
        }
    }
    None
}

#[derive(Debug, Clone)]
struct ThresholdTable {
    default: f64,
    categories: BTreeMap<CategoryGroup, f64>,
    source_pairs: BTreeMap<(String, String), f64>,
}

impl ThresholdTable {
    fn builtin() -> Self {
        let categories = BTreeMap::from([
            (CategoryGroup::Phone, 0.80),
            (CategoryGroup::Laptop, 0.78),
            (CategoryGroup::Tablet, 0.78),
            (CategoryGroup::Audio, 0.72),
            (CategoryGroup::Watch, 0.75),
            (CategoryGroup::Tv, 0.80),
            (CategoryGroup::Appliance, 0.82),
        ]);
        let source_pairs = BTreeMap::from([
            (pair_key("tiki", "shopee"), 0.72),
            (pair_key("tiki", "lazada"), 0.70),
            (pair_key("shopee", "lazada"), 0.68),
            (pair_key("cellphones", "dienmayxanh"), 0.78),
        ]);
        Self {
            default: DEFAULT_THRESHOLD,
            categories,
            source_pairs,
        }
    }
}

/// Canonical unordered key for a source-name pair: lowercase alphanumerics,
/// lexicographically sorted.
fn pair_key(a: &str, b: &str) -> (String, String) {
    let fold = |s: &str| -> String {
        s.chars()
            .filter(|c| c.is_alphanumeric())
            .flat_map(char::to_lowercase)
            .collect()
    };
    let (x, y) = (fold(a), fold(b));
    if x <= y { (x, y) } else { (y, x) }
}

/// Threshold oracle with copy-on-write runtime overrides.
pub struct ThresholdOracle {
    table: RwLock<Arc<ThresholdTable>>,
}

impl Default for ThresholdOracle {
    fn default() -> Self {
        Self::new()
    }
}

impl ThresholdOracle {
    pub fn new() -> Self {
        Self {
            table: RwLock::new(Arc::new(ThresholdTable::builtin())),
        }
    }

    /// Pure lookup over the current snapshot: source-pair override, then
    /// category, then default.
    pub async fn threshold_for(
        &self,
        category_raw: Option<&str>,
        source_pair: Option<(&str, &str)>,
    ) -> f64 {
        let table = self.snapshot().await;
        if let Some((a, b)) = source_pair {
            if let Some(t) = table.source_pairs.get(&pair_key(a, b)) {
                return *t;
            }
        }
        if let Some(group) = category_raw.and_then(category_group) {
            if let Some(t) = table.categories.get(&group) {
                return *t;
            }
        }
        table.default
    }

    pub async fn set_default(&self, threshold: f64) {
        self.mutate(|t| t.default = threshold).await;
    }

    pub async fn set_category_threshold(&self, group: CategoryGroup, threshold: f64) {
        self.mutate(|t| {
            t.categories.insert(group, threshold);
        })
        .await;
    }

    pub async fn set_source_pair_threshold(&self, a: &str, b: &str, threshold: f64) {
        self.mutate(|t| {
            t.source_pairs.insert(pair_key(a, b), threshold);
        })
        .await;
    }

    async fn snapshot(&self) -> Arc<ThresholdTable> {
        self.table.read().await.clone()
    }

    async fn mutate(&self, f: impl FnOnce(&mut ThresholdTable)) {
        let mut guard = self.table.write().await;
        let mut next = (**guard).clone();
        f(&mut next);
        *guard = Arc::new(next);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vietnamese_and_english_categories_collapse() {
        assert_eq!(category_group("Điện thoại"), Some(CategoryGroup::Phone));
        assert_eq!(category_group("smartphone"), Some(CategoryGroup::Phone));
        assert_eq!(category_group("Tai nghe bluetooth"), Some(CategoryGroup::Audio));
        assert_eq!(category_group("Máy giặt"), Some(CategoryGroup::Appliance));
        assert_eq!(category_group("đồ chơi"), None);
    }

    #[tokio::test]
    async fn lookup_order_is_pair_then_category_then_default() {
        let oracle = ThresholdOracle::new();
        assert_eq!(
            oracle
                .threshold_for(Some("Điện thoại"), Some(("tiki", "shopee")))
                .await,
            0.72
        );
        assert_eq!(oracle.threshold_for(Some("Điện thoại"), None).await, 0.80);
        assert_eq!(
            oracle.threshold_for(Some("đồ chơi"), None).await,
            DEFAULT_THRESHOLD
        );
        assert_eq!(oracle.threshold_for(None, None).await, DEFAULT_THRESHOLD);
    }

    #[tokio::test]
    async fn source_pairs_are_unordered() {
        let oracle = ThresholdOracle::new();
        assert_eq!(
            oracle.threshold_for(None, Some(("shopee", "tiki"))).await,
            oracle.threshold_for(None, Some(("tiki", "shopee"))).await
        );
    }

    #[tokio::test]
    async fn runtime_overrides_are_visible_to_readers() {
        let oracle = ThresholdOracle::new();
        oracle.set_category_threshold(CategoryGroup::Audio, 0.60).await;
        assert_eq!(oracle.threshold_for(Some("tai nghe"), None).await, 0.60);
        oracle.set_default(0.50).await;
        assert_eq!(oracle.threshold_for(None, None).await, 0.50);
    }

    #[tokio::test]
    async fn audio_and_appliance_spread_matches_the_table() {
        let oracle = ThresholdOracle::new();
        assert_eq!(oracle.threshold_for(Some("tai nghe"), None).await, 0.72);
        assert_eq!(oracle.threshold_for(Some("máy giặt"), None).await, 0.82);
    }
}

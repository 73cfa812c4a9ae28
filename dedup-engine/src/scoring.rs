//! Pairwise scoring: eight feature signals, three hard gates (type,
//! category group, price gap), and the classification ladder that turns a
//! weighted sum into a match method.

use serde::{Deserialize, Serialize};

use catalog_store::MatchMethod;
use embedding_service::cosine_similarity;
use match_core::{
    SimilarityWeights, combined_similarity, compare, levenshtein_similarity, normalize_name,
};

use crate::features::ListingFeatures;

/// Scorer confidence bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    High,
    Medium,
    Low,
}

/// All eight feature signals, each in `[0, 1]`, kept for evidence records.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct FeatureVector {
    pub name_string: f64,
    pub semantic: f64,
    pub brand: f64,
    pub code: f64,
    pub price: f64,
    pub specs: f64,
    pub category: f64,
    pub rating: f64,
}

/// Feature weights. Rating is reported but carries no weight.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct FeatureWeights {
    pub name_string: f64,
    pub semantic: f64,
    pub brand: f64,
    pub code: f64,
    pub price: f64,
    pub specs: f64,
    pub category: f64,
    pub rating: f64,
}

impl Default for FeatureWeights {
    fn default() -> Self {
        Self {
            name_string: 0.25,
            semantic: 0.20,
            brand: 0.10,
            code: 0.25,
            price: 0.15,
            specs: 0.05,
            category: 0.05,
            rating: 0.0,
        }
    }
}

/// Scoring verdict for one pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PairScore {
    pub score: f64,
    pub method: MatchMethod,
    pub confidence: Confidence,
    pub features: FeatureVector,
}

/// Deterministic, side-effect-free pair scorer.
#[derive(Debug, Clone, Default)]
pub struct PairScorer {
    weights: FeatureWeights,
    sim_weights: SimilarityWeights,
}

impl PairScorer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn score(&self, a: &ListingFeatures, b: &ListingFeatures) -> PairScore {
        let features = self.features(a, b);

        // Hard gate: a device never matches an accessory.
        if device_vs_accessory(a, b) {
            return PairScore {
                score: 0.1,
                method: MatchMethod::NoMatch,
                confidence: Confidence::High,
                features,
            };
        }

        // Hard gate: both categories resolved, to different groups.
        if let (Some(ca), Some(cb)) = (a.category, b.category) {
            if ca != cb {
                return PairScore {
                    score: 0.1,
                    method: MatchMethod::NoMatch,
                    confidence: Confidence::High,
                    features,
                };
            }
        }

        // Hard gate: price gap beyond 30%.
        let prices_present = price_of(a).is_some() && price_of(b).is_some();
        if prices_present && features.price == 0.0 {
            return PairScore {
                score: 0.2,
                method: MatchMethod::NoMatch,
                confidence: Confidence::High,
                features,
            };
        }

        let w = &self.weights;
        let weight_total = w.name_string
            + w.semantic
            + w.brand
            + w.code
            + w.price
            + w.specs
            + w.category
            + w.rating;
        let s = (w.name_string * features.name_string
            + w.semantic * features.semantic
            + w.brand * features.brand
            + w.code * features.code
            + w.price * features.price
            + w.specs * features.specs
            + w.category * features.category
            + w.rating * features.rating)
            / weight_total;

        let brand_exact = features.brand >= 0.999;
        let (score, method, confidence) = if features.code >= 0.999
            && brand_exact
            && features.price > 0.8
        {
            (s.max(0.98), MatchMethod::CodeExtract, Confidence::High)
        } else if brand_exact && (features.name_string >= 0.85 || features.semantic >= 0.96) {
            (s.max(0.90), MatchMethod::ExactMatch, Confidence::High)
        } else if features.code >= 0.8 && features.price > 0.7 {
            (s.max(0.85), MatchMethod::CodeExtract, Confidence::High)
        } else if s > 0.75 {
            (s, MatchMethod::MlClassifier, Confidence::High)
        } else if s > 0.65 {
            (s, MatchMethod::HighSimilarity, Confidence::Medium)
        } else if s > 0.50 {
            (s, MatchMethod::ModerateSimilarity, Confidence::Low)
        } else {
            (s, MatchMethod::NoMatch, Confidence::Low)
        };

        PairScore {
            score,
            method,
            confidence,
            features,
        }
    }

    fn features(&self, a: &ListingFeatures, b: &ListingFeatures) -> FeatureVector {
        FeatureVector {
            name_string: combined_similarity(
                &a.name_normalized,
                &b.name_normalized,
                &self.sim_weights,
            ),
            semantic: semantic_feature(a, b),
            brand: brand_feature(a, b),
            code: compare(&a.code, &b.code),
            price: price_feature(price_of(a), price_of(b)),
            specs: specs_feature(a, b),
            category: category_feature(a, b),
            rating: rating_feature(a, b),
        }
    }
}

fn price_of(f: &ListingFeatures) -> Option<f64> {
    f.raw.price.filter(|p| *p > 0.0)
}

fn device_vs_accessory(a: &ListingFeatures, b: &ListingFeatures) -> bool {
    use match_core::ProductType;
    matches!(
        (a.code.product_type, b.code.product_type),
        (ProductType::Device, ProductType::Accessory)
            | (ProductType::Accessory, ProductType::Device)
    )
}

/// Cosine of precomputed vectors, clamped to `[0, 1]`; zero when either
/// side has no vector.
fn semantic_feature(a: &ListingFeatures, b: &ListingFeatures) -> f64 {
    match (&a.embedding, &b.embedding) {
        (Some(va), Some(vb)) => cosine_similarity(va, vb).max(0.0),
        _ => 0.0,
    }
}

/// Brand agreement: exact alias-normalized match 1.0, containment 0.8,
/// either side unknown 0.5, disagreement 0.0.
fn brand_feature(a: &ListingFeatures, b: &ListingFeatures) -> f64 {
    let resolve = |f: &ListingFeatures| -> Option<String> {
        f.code
            .brand
            .clone()
            .or_else(|| f.raw.brand_raw.as_deref().map(normalize_name))
            .filter(|s| !s.is_empty())
    };
    match (resolve(a), resolve(b)) {
        (Some(x), Some(y)) if x == y => 1.0,
        (Some(x), Some(y)) if x.contains(&y) || y.contains(&x) => 0.8,
        (Some(_), Some(_)) => 0.0,
        _ => 0.5,
    }
}

/// Tiered relative price agreement; `0.5` when either price is missing.
fn price_feature(a: Option<f64>, b: Option<f64>) -> f64 {
    let (pa, pb) = match (a, b) {
        (Some(x), Some(y)) => (x, y),
        _ => return 0.5,
    };
    let gap = (pa - pb).abs() / pa.max(pb);
    if gap <= 0.02 {
        1.0
    } else if gap <= 0.05 {
        0.95
    } else if gap <= 0.10 {
        0.85
    } else if gap <= 0.20 {
        0.70
    } else if gap <= 0.30 {
        0.50
    } else {
        0.0
    }
}

/// Key-by-key agreement over shared spec keys; `0.5` when either side has
/// no specs or no keys are shared.
fn specs_feature(a: &ListingFeatures, b: &ListingFeatures) -> f64 {
    if a.raw.specs.is_empty() || b.raw.specs.is_empty() {
        return 0.5;
    }
    let mut total = 0usize;
    let mut score = 0.0;
    for (key, va) in &a.raw.specs {
        if let Some(vb) = b.raw.specs.get(key) {
            total += 1;
            let na = normalize_name(va);
            let nb = normalize_name(vb);
            if na == nb {
                score += 1.0;
            } else if levenshtein_similarity(&na, &nb) >= 0.8 {
                score += 0.8;
            }
        }
    }
    if total == 0 { 0.5 } else { score / total as f64 }
}

/// Normalized category agreement with group fallback.
fn category_feature(a: &ListingFeatures, b: &ListingFeatures) -> f64 {
    let (ra, rb) = match (a.raw.category_raw.as_deref(), b.raw.category_raw.as_deref()) {
        (Some(x), Some(y)) => (normalize_name(x), normalize_name(y)),
        _ => return 0.5,
    };
    if ra.is_empty() || rb.is_empty() {
        return 0.5;
    }
    if ra == rb {
        return 1.0;
    }
    if ra.contains(&rb) || rb.contains(&ra) {
        return 0.9;
    }
    match (a.category, b.category) {
        (Some(ga), Some(gb)) if ga == gb => 1.0,
        (Some(_), Some(_)) => 0.0,
        _ => 0.5,
    }
}

/// Reported but unweighted rating agreement.
fn rating_feature(a: &ListingFeatures, b: &ListingFeatures) -> f64 {
    match (a.raw.rating, b.raw.rating) {
        (Some(x), Some(y)) => 1.0 - (x - y).abs() / 5.0,
        _ => 0.5,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use catalog_store::{DedupStatus, RawListing};
    use std::collections::BTreeMap;

    use crate::collapse::CollapsedListing;

    fn listing(name: &str, category: &str, price: f64, source_id: i64) -> ListingFeatures {
        let raw = RawListing {
            id: 0,
            source_id,
            external_id: format!("x-{name}"),
            external_url: None,
            name: name.to_string(),
            name_normalized: String::new(),
            brand_raw: None,
            category_raw: Some(category.to_string()),
            price: (price > 0.0).then_some(price),
            original_price: None,
            discount_percent: None,
            image_url: None,
            images: Vec::new(),
            description: None,
            rating: None,
            review_count: None,
            sold_count: None,
            available: true,
            specs: BTreeMap::new(),
            shop_id: None,
            dedup_status: DedupStatus::Pending,
            last_dedup_at: None,
        };
        ListingFeatures::from_collapsed(CollapsedListing::single(raw))
    }

    #[test]
    fn cross_source_iphone_pairs_hit_the_code_rule() {
        let scorer = PairScorer::new();
        let a = listing(
            "iPhone 15 Pro Max 256GB Titanium Xanh Chính Hãng VN/A",
            "Điện thoại",
            34_990_000.0,
            1,
        );
        let b = listing(
            "Điện Thoại iPhone 15 ProMax 256G Xanh — Chính Hãng Apple",
            "Điện thoại",
            35_500_000.0,
            2,
        );
        let score = scorer.score(&a, &b);
        assert!(score.score >= 0.98);
        assert_eq!(score.method, MatchMethod::CodeExtract);
        assert_eq!(score.confidence, Confidence::High);
    }

    #[test]
    fn price_gate_rejects_wide_gaps() {
        let scorer = PairScorer::new();
        // Two devices, identical name, but half the price: the >30% price
        // gate fires before any weighting.
        let a = listing(
            "Điện Thoại iPhone 15 128GB Chính Hãng",
            "Điện thoại",
            20_000_000.0,
            1,
        );
        let b = listing(
            "Điện Thoại iPhone 15 128GB Chính Hãng",
            "Điện thoại",
            10_000_000.0,
            2,
        );
        let score = scorer.score(&a, &b);
        assert_eq!(score.score, 0.2);
        assert_eq!(score.method, MatchMethod::NoMatch);
        assert_eq!(score.confidence, Confidence::High);
    }

    #[test]
    fn accessory_pairs_with_price_gaps_stay_rejected() {
        let scorer = PairScorer::new();
        let phone = listing(
            "Apple iPhone 16 Pro 128GB Chính Hãng VN/A",
            "Điện thoại",
            30_990_000.0,
            1,
        );
        let case = listing(
            "Ốp Lưng Sạc Từ Tính cho iPhone 16 Pro",
            "Phụ kiện",
            630_000.0,
            2,
        );
        let score = scorer.score(&phone, &case);
        assert!(score.score <= 0.2);
        assert_eq!(score.method, MatchMethod::NoMatch);
    }

    #[test]
    fn category_group_gate_fires_before_weighting() {
        let scorer = PairScorer::new();
        let a = listing("Sony WH-1000XM5", "Tai nghe", 6_990_000.0, 1);
        let b = listing("Sony WH-1000XM5", "Máy giặt", 6_990_000.0, 2);
        let score = scorer.score(&a, &b);
        assert_eq!(score.score, 0.1);
        assert_eq!(score.method, MatchMethod::NoMatch);
    }

    #[test]
    fn near_identical_names_with_same_brand_are_exact_matches() {
        let scorer = PairScorer::new();
        let a = listing(
            "iPhone 15 Pro Max 256GB Chính Hãng VN/A Blue",
            "Điện thoại",
            34_990_000.0,
            1,
        );
        let b = listing(
            "iPhone 15 Pro Max 128GB Chính Hãng VN/A Blue",
            "Điện thoại",
            32_990_000.0,
            2,
        );
        let score = scorer.score(&a, &b);
        assert!(score.score >= 0.90);
        assert_eq!(score.method, MatchMethod::ExactMatch);
    }

    #[test]
    fn type_gate_caps_device_accessory_pairs() {
        let scorer = PairScorer::new();
        // Same category label and close prices: only the type gate separates
        // them.
        let phone = listing(
            "Điện Thoại iPhone 16 Pro 128GB Chính Hãng",
            "Apple",
            30_990_000.0,
            1,
        );
        let case = listing(
            "Ốp Lưng Sạc Từ Tính cho iPhone 16 Pro Chính Hãng",
            "Apple",
            30_500_000.0,
            2,
        );
        let score = scorer.score(&phone, &case);
        assert_eq!(score.features.code, 0.0);
        assert_eq!(score.score, 0.1);
        assert_eq!(score.method, MatchMethod::NoMatch);
    }

    #[test]
    fn missing_prices_leave_the_price_feature_neutral() {
        let scorer = PairScorer::new();
        let a = listing("iPhone 15 Pro Max 256GB", "Điện thoại", 0.0, 1);
        let b = listing("iPhone 15 Pro Max 256GB", "Điện thoại", 0.0, 2);
        let score = scorer.score(&a, &b);
        assert_eq!(score.features.price, 0.5);
        assert_ne!(score.method, MatchMethod::NoMatch);
    }

    #[test]
    fn semantic_feature_zero_without_vectors() {
        let scorer = PairScorer::new();
        let a = listing("iPhone 15", "Điện thoại", 20_000_000.0, 1);
        let b = listing("iPhone 15", "Điện thoại", 20_000_000.0, 2);
        assert_eq!(scorer.score(&a, &b).features.semantic, 0.0);
    }

    #[test]
    fn semantic_match_can_carry_the_exact_rule() {
        let scorer = PairScorer::new();
        // Prices 13.6% apart keep the code rules out of the way; only the
        // semantic arm of the exact rule can fire.
        let mut a = listing("iPhone 15 Plus Xanh", "Điện thoại", 22_000_000.0, 1);
        let mut b = listing(
            "Điện thoại Apple iPhone 15 Plus màu xanh dương",
            "Điện thoại",
            19_000_000.0,
            2,
        );
        a.embedding = Some(vec![0.6, 0.8, 0.0]);
        b.embedding = Some(vec![0.6, 0.8, 0.0]);
        let score = scorer.score(&a, &b);
        assert!(score.features.semantic >= 0.96);
        assert!(score.score >= 0.90);
        assert_eq!(score.method, MatchMethod::ExactMatch);
    }
}

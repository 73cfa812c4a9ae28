//! Variant separation within a cluster.
//!
//! Members partition by their `(storage, ram, color)` triple; two or more
//! distinct triples make the canonical a variant group. The canonical's main
//! product is the member the market trusts most.

use std::collections::{BTreeMap, BTreeSet};

use match_core::ExtractedCode;

use crate::features::ListingFeatures;

/// One variant row before persistence.
#[derive(Debug, Clone, PartialEq)]
pub struct VariantDraft {
    pub key: String,
    pub storage_gb: Option<u32>,
    pub ram_gb: Option<u32>,
    pub color: Option<String>,
    pub min_price: Option<f64>,
    pub max_price: Option<f64>,
    pub raw_ids: BTreeSet<i64>,
}

/// `storage|ram|color` key with `base` for absent parts, e.g.
/// `256gb|base|blue`.
pub fn variant_key(code: &ExtractedCode) -> String {
    let storage = code
        .storage_gb
        .map(|s| format!("{s}gb"))
        .unwrap_or_else(|| "base".to_string());
    let ram = code
        .ram_gb
        .map(|r| format!("{r}gb"))
        .unwrap_or_else(|| "base".to_string());
    let color = code.color.clone().unwrap_or_else(|| "base".to_string());
    format!("{storage}|{ram}|{color}")
}

/// Partition a cluster into variant rows. Returns an empty vector when the
/// cluster carries fewer than two distinct variant keys.
pub fn detect_variants(members: &[&ListingFeatures]) -> Vec<VariantDraft> {
    let mut groups: BTreeMap<String, Vec<&ListingFeatures>> = BTreeMap::new();
    for member in members {
        groups.entry(variant_key(&member.code)).or_default().push(*member);
    }
    if groups.len() < 2 {
        return Vec::new();
    }

    groups
        .into_iter()
        .map(|(key, group)| {
            let prices: Vec<f64> = group
                .iter()
                .filter_map(|m| m.raw.price)
                .filter(|p| *p > 0.0)
                .collect();
            let raw_ids: BTreeSet<i64> =
                group.iter().flat_map(|m| m.all_raw_ids()).collect();
            let code = &group[0].code;
            VariantDraft {
                key,
                storage_gb: code.storage_gb,
                ram_gb: code.ram_gb,
                color: code.color.clone(),
                min_price: prices.iter().cloned().reduce(f64::min),
                max_price: prices.iter().cloned().reduce(f64::max),
                raw_ids,
            }
        })
        .collect()
}

/// Main product for the canonical: best across the cluster by
/// `(review_count, rating, available)`.
pub fn select_main(members: &[&ListingFeatures]) -> usize {
    let mut best = 0usize;
    for (i, member) in members.iter().enumerate().skip(1) {
        let cur = (
            member.raw.review_count.unwrap_or(0),
            member.raw.rating.unwrap_or(0.0),
            member.raw.available,
        );
        let incumbent = (
            members[best].raw.review_count.unwrap_or(0),
            members[best].raw.rating.unwrap_or(0.0),
            members[best].raw.available,
        );
        let better = cur.0 > incumbent.0
            || (cur.0 == incumbent.0
                && (cur.1 > incumbent.1 || (cur.1 == incumbent.1 && cur.2 && !incumbent.2)));
        if better {
            best = i;
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collapse::CollapsedListing;
    use catalog_store::{DedupStatus, RawListing};
    use std::collections::BTreeMap as Map;

    fn feat(id: i64, name: &str, price: f64, reviews: i64) -> ListingFeatures {
        let raw = RawListing {
            id,
            source_id: 1,
            external_id: format!("e{id}"),
            external_url: None,
            name: name.to_string(),
            name_normalized: String::new(),
            brand_raw: Some("Apple".into()),
            category_raw: Some("Điện thoại".into()),
            price: Some(price),
            original_price: None,
            discount_percent: None,
            image_url: None,
            images: Vec::new(),
            description: None,
            rating: Some(4.5),
            review_count: Some(reviews),
            sold_count: None,
            available: true,
            specs: Map::new(),
            shop_id: None,
            dedup_status: DedupStatus::Pending,
            last_dedup_at: None,
        };
        ListingFeatures::from_collapsed(CollapsedListing::single(raw))
    }

    #[test]
    fn storage_and_color_split_into_variant_rows() {
        let members = vec![
            feat(1, "iPhone 15 Pro Max 128GB Blue", 32_990_000.0, 10),
            feat(2, "iPhone 15 Pro Max 256GB Blue", 34_990_000.0, 20),
            feat(3, "iPhone 15 Pro Max 256GB Black", 34_990_000.0, 15),
            feat(4, "iPhone 15 Pro Max 512GB Blue", 40_990_000.0, 5),
        ];
        let refs: Vec<&ListingFeatures> = members.iter().collect();
        let variants = detect_variants(&refs);
        let keys: Vec<&str> = variants.iter().map(|v| v.key.as_str()).collect();
        assert_eq!(
            keys,
            vec![
                "128gb|base|blue",
                "256gb|base|black",
                "256gb|base|blue",
                "512gb|base|blue"
            ]
        );
        let v128 = &variants[0];
        assert_eq!(v128.min_price, Some(32_990_000.0));
        assert_eq!(v128.max_price, Some(32_990_000.0));
        assert!(v128.raw_ids.contains(&1));
    }

    #[test]
    fn uniform_clusters_are_not_variant_groups() {
        let members = vec![
            feat(1, "iPhone 15 Pro Max 256GB Blue", 34_990_000.0, 10),
            feat(2, "iPhone 15 ProMax 256G Xanh", 34_800_000.0, 20),
        ];
        let refs: Vec<&ListingFeatures> = members.iter().collect();
        assert!(detect_variants(&refs).is_empty());
    }

    #[test]
    fn main_product_is_review_count_first() {
        let members = vec![
            feat(1, "iPhone 15 Pro Max 128GB Blue", 32_990_000.0, 10),
            feat(2, "iPhone 15 Pro Max 256GB Blue", 34_990_000.0, 90),
            feat(3, "iPhone 15 Pro Max 512GB Blue", 40_990_000.0, 40),
        ];
        let refs: Vec<&ListingFeatures> = members.iter().collect();
        assert_eq!(select_main(&refs), 1);
    }
}

//! Intra-source identity-duplicate collapse.
//!
//! Within one source, the same shop (or several resellers) often posts the
//! same offer multiple times. Before cross-source clustering, those postings
//! fold into a single representative so one marketplace cannot outvote the
//! others.

use match_core::{SimilarityWeights, combined_similarity, normalize_name, quick_check};

use catalog_store::RawListing;
use tracing::trace;

use crate::config::IntraSourceThresholds;

/// A representative listing plus everything that folded into it.
#[derive(Debug, Clone)]
pub struct CollapsedListing {
    pub representative: RawListing,
    /// Number of postings folded away (cluster size minus one).
    pub duplicate_count: usize,
    pub duplicate_ids: Vec<i64>,
    /// Distinct shop ids across the whole duplicate cluster, the
    /// representative's included.
    pub duplicate_shop_ids: Vec<String>,
}

impl CollapsedListing {
    /// A listing with no duplicates.
    pub fn single(representative: RawListing) -> Self {
        let duplicate_shop_ids = representative.shop_id.iter().cloned().collect();
        Self {
            representative,
            duplicate_count: 0,
            duplicate_ids: Vec::new(),
            duplicate_shop_ids,
        }
    }
}

/// Collapse one source partition into representatives via single-link
/// clustering over the identity-duplicate relation.
///
/// Two listings of the same source are duplicates iff any of:
/// - same `external_id`
/// - same `external_url`
/// - equal price and combined name similarity above `name_sim_near`
/// - name similarity above `name_sim_high` and either no prices or a
///   relative price gap below `price_tol`
pub fn collapse_source(
    listings: Vec<RawListing>,
    thresholds: &IntraSourceThresholds,
    sim_weights: &SimilarityWeights,
) -> Vec<CollapsedListing> {
    let n = listings.len();
    if n <= 1 {
        return listings.into_iter().map(CollapsedListing::single).collect();
    }

    let normalized: Vec<String> = listings
        .iter()
        .map(|l| {
            if l.name_normalized.is_empty() {
                normalize_name(&l.name)
            } else {
                l.name_normalized.clone()
            }
        })
        .collect();

    // Single-link via union-find.
    let mut parent: Vec<usize> = (0..n).collect();
    fn find(parent: &mut [usize], i: usize) -> usize {
        let mut root = i;
        while parent[root] != root {
            root = parent[root];
        }
        let mut cur = i;
        while parent[cur] != root {
            let next = parent[cur];
            parent[cur] = root;
            cur = next;
        }
        root
    }

    for i in 0..n {
        for j in (i + 1)..n {
            if is_duplicate(
                &listings[i],
                &listings[j],
                &normalized[i],
                &normalized[j],
                thresholds,
                sim_weights,
            ) {
                let (ri, rj) = (find(&mut parent, i), find(&mut parent, j));
                if ri != rj {
                    parent[rj] = ri;
                }
            }
        }
    }

    let mut groups: std::collections::BTreeMap<usize, Vec<usize>> = Default::default();
    for i in 0..n {
        let root = find(&mut parent, i);
        groups.entry(root).or_default().push(i);
    }

    let mut out = Vec::with_capacity(groups.len());
    for members in groups.into_values() {
        let rep = *members
            .iter()
            .max_by(|&&a, &&b| {
                let la = &listings[a];
                let lb = &listings[b];
                la.rating
                    .unwrap_or(0.0)
                    .total_cmp(&lb.rating.unwrap_or(0.0))
                    .then(la.review_count.unwrap_or(0).cmp(&lb.review_count.unwrap_or(0)))
                    .then(la.available.cmp(&lb.available))
                    // Deterministic final tie-break.
                    .then(lb.id.cmp(&la.id))
            })
            .unwrap_or(&members[0]);

        let duplicate_ids: Vec<i64> = members
            .iter()
            .filter(|&&m| m != rep)
            .map(|&m| listings[m].id)
            .collect();
        let mut shop_ids: Vec<String> = members
            .iter()
            .filter_map(|&m| listings[m].shop_id.clone())
            .collect();
        shop_ids.sort();
        shop_ids.dedup();

        if !duplicate_ids.is_empty() {
            trace!(
                "collapse: {} duplicates folded into raw {}",
                duplicate_ids.len(),
                listings[rep].id
            );
        }

        out.push(CollapsedListing {
            duplicate_count: members.len() - 1,
            duplicate_ids,
            duplicate_shop_ids: shop_ids,
            representative: listings[rep].clone(),
        });
    }
    out
}

fn is_duplicate(
    a: &RawListing,
    b: &RawListing,
    name_a: &str,
    name_b: &str,
    thresholds: &IntraSourceThresholds,
    sim_weights: &SimilarityWeights,
) -> bool {
    if a.source_id != b.source_id {
        return false;
    }
    if !a.external_id.is_empty() && a.external_id == b.external_id {
        return true;
    }
    if let (Some(ua), Some(ub)) = (&a.external_url, &b.external_url) {
        if !ua.is_empty() && ua == ub {
            return true;
        }
    }

    // Name-based rules: prefilter first, the full suite is not free.
    if !quick_check(name_a, name_b, 0.3) {
        return false;
    }
    let sim = combined_similarity(name_a, name_b, sim_weights);

    match (a.price, b.price) {
        (Some(pa), Some(pb)) if pa > 0.0 && pb > 0.0 => {
            if pa == pb && sim > thresholds.name_sim_near {
                return true;
            }
            let gap = (pa - pb).abs() / pa.max(pb);
            sim > thresholds.name_sim_high && gap < thresholds.price_tol
        }
        _ => sim > thresholds.name_sim_high,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use catalog_store::DedupStatus;
    use std::collections::BTreeMap;

    fn listing(id: i64, name: &str, price: Option<f64>, shop: &str) -> RawListing {
        RawListing {
            id,
            source_id: 2,
            external_id: format!("sp-{id}"),
            external_url: None,
            name: name.to_string(),
            name_normalized: String::new(),
            brand_raw: Some("Apple".into()),
            category_raw: Some("Điện thoại".into()),
            price,
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
            shop_id: Some(shop.to_string()),
            dedup_status: DedupStatus::Pending,
            last_dedup_at: None,
        }
    }

    #[test]
    fn same_external_id_always_collapses() {
        let mut a = listing(1, "iPhone 15 Pro Max", Some(30_000_000.0), "shop-a");
        let mut b = listing(2, "Hàng khác hẳn tên", Some(1_000_000.0), "shop-b");
        a.external_id = "same".into();
        b.external_id = "same".into();
        let out = collapse_source(
            vec![a, b],
            &IntraSourceThresholds::default(),
            &SimilarityWeights::default(),
        );
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].duplicate_count, 1);
    }

    #[test]
    fn near_identical_names_with_equal_price_collapse() {
        let a = listing(
            1,
            "Điện Thoại iPhone 15 Pro Max 256GB Xanh Chính Hãng VN/A",
            Some(34_990_000.0),
            "shop-a",
        );
        let b = listing(
            2,
            "Điện Thoại iPhone 15 Pro Max 256GB Xanh Chính Hãng VN/A Mới",
            Some(34_990_000.0),
            "shop-b",
        );
        let out = collapse_source(
            vec![a, b],
            &IntraSourceThresholds::default(),
            &SimilarityWeights::default(),
        );
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].duplicate_ids.len(), 1);
        assert_eq!(out[0].duplicate_shop_ids, vec!["shop-a", "shop-b"]);
    }

    #[test]
    fn different_storage_size_does_not_collapse() {
        let a = listing(1, "iPhone 15 Pro Max 256GB Xanh", Some(34_990_000.0), "s");
        let b = listing(2, "iPhone 15 Pro Max 512GB Xanh", Some(40_990_000.0), "s");
        let out = collapse_source(
            vec![a, b],
            &IntraSourceThresholds::default(),
            &SimilarityWeights::default(),
        );
        assert_eq!(out.len(), 2);
    }

    #[test]
    fn representative_has_the_best_rating() {
        let mut a = listing(1, "iPhone 15 Pro Max 256GB Xanh", Some(34_990_000.0), "s1");
        let mut b = listing(2, "iPhone 15 Pro Max 256GB Xanh", Some(34_990_000.0), "s2");
        a.rating = Some(4.2);
        b.rating = Some(4.8);
        let out = collapse_source(
            vec![a, b],
            &IntraSourceThresholds::default(),
            &SimilarityWeights::default(),
        );
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].representative.id, 2);
        assert_eq!(out[0].duplicate_ids, vec![1]);
    }

    #[test]
    fn duplicate_chains_link_transitively() {
        // Single-link: one cluster even when only adjacent pairs clear the
        // similarity bar.
        let a = listing(1, "iPhone 15 Pro Max 256GB Xanh Chính Hãng", Some(34_990_000.0), "x");
        let b = listing(2, "iPhone 15 Pro Max 256GB Xanh Chính Hãng VN", Some(34_990_000.0), "y");
        let c = listing(3, "iPhone 15 Pro Max 256GB Xanh Chính Hãng VN A", Some(34_990_000.0), "z");
        let out = collapse_source(
            vec![a, b, c],
            &IntraSourceThresholds::default(),
            &SimilarityWeights::default(),
        );
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].duplicate_count, 2);
    }
}

//! Quality assessment of a canonical and its cluster.
//!
//! Starts at 100 and subtracts per rule, recording a human-readable issue
//! string for every deduction. The result drives `needs_review` and the
//! low-quality review flags.

use std::collections::BTreeSet;

use catalog_store::Canonical;

use crate::features::ListingFeatures;

/// Sources a catalog aims to cover; coverage below this costs points.
const FULL_COVERAGE: usize = 5;

#[derive(Debug, Clone)]
pub struct QualityReport {
    /// 0–100.
    pub score: f64,
    pub issues: Vec<String>,
    /// `excellent` / `good` / `fair` / `poor`.
    pub confidence: &'static str,
    pub needs_review: bool,
}

/// Assess a canonical against the cluster it was built from.
pub fn assess(members: &[&ListingFeatures], canonical: &Canonical) -> QualityReport {
    let mut score = 100.0;
    let mut issues: Vec<String> = Vec::new();

    // Source coverage.
    let sources: BTreeSet<i64> = members.iter().map(|m| m.raw.source_id).collect();
    if sources.len() < FULL_COVERAGE {
        score -= 10.0 * (FULL_COVERAGE - sources.len()) as f64 / FULL_COVERAGE as f64;
        if sources.len() == 1 {
            issues.push("single source listing".to_string());
        }
    }

    // Price variance across the cluster.
    let prices: Vec<f64> = members
        .iter()
        .filter_map(|m| m.raw.price)
        .filter(|p| *p > 0.0)
        .collect();
    if prices.len() >= 2 {
        let mean = prices.iter().sum::<f64>() / prices.len() as f64;
        let var = prices.iter().map(|p| (p - mean).powi(2)).sum::<f64>() / prices.len() as f64;
        let cv = if mean > 0.0 { var.sqrt() / mean } else { 0.0 };
        if cv > 0.30 {
            score -= 15.0;
            issues.push("high price variance".to_string());
        } else if cv > 0.15 {
            score -= 5.0;
            issues.push("moderate price variance".to_string());
        }
    }

    // Spec consistency over extracted storage/RAM.
    let consistency = spec_consistency(members);
    if let Some(consistency) = consistency {
        if consistency < 0.70 {
            score -= 15.0;
            issues.push("inconsistent specifications".to_string());
        } else if consistency < 0.85 {
            score -= 7.0;
            issues.push("minor specification drift".to_string());
        }
    }

    // Review depth.
    let total_reviews: i64 = members.iter().filter_map(|m| m.raw.review_count).sum();
    if total_reviews < 5 {
        score -= 10.0;
        issues.push("very few reviews".to_string());
    } else if total_reviews < 20 {
        score -= 5.0;
        issues.push("few reviews".to_string());
    }

    // Availability rate.
    let available = members.iter().filter(|m| m.raw.available).count();
    let availability = available as f64 / members.len().max(1) as f64;
    if availability < 0.30 {
        score -= 10.0;
        issues.push("mostly unavailable".to_string());
    } else if availability < 0.50 {
        score -= 5.0;
        issues.push("low availability".to_string());
    }

    // Field completeness on the canonical itself.
    let completeness = completeness_ratio(canonical);
    if completeness < 0.50 {
        score -= 15.0;
        issues.push("incomplete product data".to_string());
    } else if completeness < 0.70 {
        score -= 7.0;
        issues.push("partially incomplete product data".to_string());
    }

    // Rating confidence from review depth.
    let rating_confidence = match total_reviews {
        n if n >= 500 => 1.0,
        n if n >= 100 => 0.9,
        n if n >= 50 => 0.7,
        n if n >= 20 => 0.5,
        n if n >= 5 => 0.3,
        _ => 0.1,
    };
    if rating_confidence < 0.3 {
        score -= 7.0;
        issues.push("low rating confidence".to_string());
    } else if rating_confidence < 0.5 {
        score -= 3.0;
        issues.push("modest rating confidence".to_string());
    }

    // Name quality, a [0, 1] sub-score scaled into the 100-point budget.
    let name_quality = name_quality(canonical, members);
    score -= (1.0 - name_quality) * 10.0;
    if name_quality < 0.5 {
        issues.push("poor name quality".to_string());
    }

    let score = score.clamp(0.0, 100.0);
    let confidence = match score {
        s if s >= 85.0 => "excellent",
        s if s >= 70.0 => "good",
        s if s >= 50.0 => "fair",
        _ => "poor",
    };
    let needs_review = score < 60.0 || issues.len() > 2;

    QualityReport {
        score,
        issues,
        confidence,
        needs_review,
    }
}

/// Agreement with the modal storage and RAM values, averaged over the
/// fields that were extracted at all. `None` when neither field appears.
fn spec_consistency(members: &[&ListingFeatures]) -> Option<f64> {
    let storage: Vec<u32> = members.iter().filter_map(|m| m.code.storage_gb).collect();
    let ram: Vec<u32> = members.iter().filter_map(|m| m.code.ram_gb).collect();

    let agreement = |values: &[u32]| -> Option<f64> {
        if values.is_empty() {
            return None;
        }
        let mut counts: std::collections::BTreeMap<u32, usize> = Default::default();
        for v in values {
            *counts.entry(*v).or_default() += 1;
        }
        let modal = counts.values().max().copied().unwrap_or(0);
        Some(modal as f64 / values.len() as f64)
    };

    match (agreement(&storage), agreement(&ram)) {
        (Some(s), Some(r)) => Some((s + r) / 2.0),
        (Some(s), None) => Some(s),
        (None, Some(r)) => Some(r),
        (None, None) => None,
    }
}

fn completeness_ratio(canonical: &Canonical) -> f64 {
    let present = [
        !canonical.name.is_empty(),
        canonical.brand_id.is_some(),
        canonical.category_id.is_some(),
        canonical.description.as_deref().is_some_and(|d| !d.is_empty()),
        canonical.min_price.is_some(),
        canonical.max_price.is_some(),
        canonical.avg_rating.is_some(),
        canonical.image_url.as_deref().is_some_and(|u| !u.is_empty()),
    ];
    present.iter().filter(|p| **p).count() as f64 / present.len() as f64
}

/// Name quality sub-score in `[0, 1]`: penalties for noisy or short names,
/// bonuses for extractable structure.
fn name_quality(canonical: &Canonical, members: &[&ListingFeatures]) -> f64 {
    let name = &canonical.name;
    let mut q: f64 = 1.0;

    let total_chars = name.chars().count().max(1);
    let special = name
        .chars()
        .filter(|c| !c.is_alphanumeric() && !c.is_whitespace())
        .count();
    if special as f64 / total_chars as f64 > 0.2 {
        q -= 0.3;
    }

    let letters: Vec<char> = name.chars().filter(|c| c.is_alphabetic()).collect();
    if !letters.is_empty() {
        let upper = letters.iter().filter(|c| c.is_uppercase()).count();
        if upper as f64 / letters.len() as f64 > 0.8 {
            q -= 0.2;
        }
    }

    if total_chars < 20 {
        q -= 0.2;
    }

    // Reward structure the extractor can recover from the representative.
    if let Some(main) = members.first() {
        if main.code.brand.is_some() {
            q += 0.1;
        }
        if main.code.model.is_some() {
            q += 0.1;
        }
        if main.code.storage_gb.is_some() {
            q += 0.1;
        }
        if main.code.color.is_some() {
            q += 0.1;
        }
    }

    q.clamp(0.0, 1.0)
}

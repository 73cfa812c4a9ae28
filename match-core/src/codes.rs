//! Structured code extraction from product names.
//!
//! A raw listing name like `"Điện Thoại iPhone 15 ProMax 256G Xanh"` is
//! reduced to an [`ExtractedCode`]: brand, model, storage, RAM, color, year,
//! variant tags, and a device/accessory classification. The extraction is a
//! pure function of the name; the same input always yields the same code.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::normalize::normalize_name;
use crate::similarity::levenshtein_similarity;
use crate::tables::{
    ACCESSORY_KEYWORDS, BRAND_ALIASES, COLOR_SYNONYMS, DEVICE_KEYWORDS, MODEL_PATTERNS, RAM_DUAL,
    RAM_EXPLICIT, STORAGE_GB, STORAGE_TB, VARIANT_TAGS, YEAR, contains_word,
};

/// Device-versus-accessory classification of a listing name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProductType {
    Device,
    Accessory,
    Unknown,
}

/// Structured fields parsed out of a product name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedCode {
    /// Canonical brand id (`apple`, `samsung`, …) resolved via the alias table.
    pub brand: Option<String>,
    /// Human-readable model segment, whitespace-folded (`15 pro max`).
    pub model: Option<String>,
    /// Compact model key used in canonical codes (`15promax`).
    pub model_number: Option<String>,
    /// Storage normalized to gigabytes (TB forms multiplied out).
    pub storage_gb: Option<u32>,
    /// RAM in gigabytes.
    pub ram_gb: Option<u32>,
    /// Canonical color label (`blue`, `black`, …).
    pub color: Option<String>,
    /// Four-digit release year, 2010–2029.
    pub year: Option<u16>,
    /// Connectivity / market tags (`5g`, `vn a`, …).
    pub variant_tags: BTreeSet<String>,
    pub product_type: ProductType,
    /// Field-presence confidence in `[0, 1]`.
    pub confidence: f64,
}

/// Parse a raw name into an [`ExtractedCode`]. Total: unparseable names come
/// back with all fields empty and `confidence = 0`.
pub fn extract(name: &str) -> ExtractedCode {
    let normalized = normalize_name(name);

    let mut brand = BRAND_ALIASES
        .iter()
        .find(|(alias, _)| contains_word(&normalized, alias))
        .map(|(_, canonical)| canonical.to_string());

    let mut model = None;
    for (pattern_brand, re) in MODEL_PATTERNS.iter() {
        if let Some(existing) = brand.as_deref() {
            if existing != *pattern_brand {
                continue;
            }
        }
        if let Some(caps) = re.captures(&normalized) {
            model = caps.get(1).map(|m| fold_whitespace(m.as_str()));
            if brand.is_none() {
                brand = Some(pattern_brand.to_string());
            }
            break;
        }
    }
    let model_number = model.as_deref().map(canonical_model_number);

    let (storage_gb, ram_gb) = extract_memory(&normalized);

    let color = COLOR_SYNONYMS
        .iter()
        .find(|(_, synonyms)| synonyms.iter().any(|s| contains_word(&normalized, s)))
        .map(|(canonical, _)| canonical.to_string());

    let year = YEAR
        .captures(&normalized)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse::<u16>().ok());

    let variant_tags: BTreeSet<String> = VARIANT_TAGS
        .iter()
        .filter(|tag| contains_word(&normalized, tag))
        .map(|tag| tag.to_string())
        .collect();

    let product_type = if ACCESSORY_KEYWORDS.iter().any(|k| contains_word(&normalized, k)) {
        ProductType::Accessory
    } else if DEVICE_KEYWORDS.iter().any(|k| contains_word(&normalized, k)) {
        ProductType::Device
    } else if model.is_some() && storage_gb.is_some() {
        // A recognized model with a storage size is a device even when the
        // name carries no device noun.
        ProductType::Device
    } else {
        ProductType::Unknown
    };

    let confidence = field_confidence(
        brand.is_some(),
        model.is_some(),
        storage_gb.is_some(),
        ram_gb.is_some(),
        color.is_some(),
        !variant_tags.is_empty(),
        year.is_some(),
    );

    trace!(
        "extract: brand={brand:?} model={model:?} storage={storage_gb:?} confidence={confidence:.2}"
    );

    ExtractedCode {
        brand,
        model,
        model_number,
        storage_gb,
        ram_gb,
        color,
        year,
        variant_tags,
        product_type,
        confidence,
    }
}

/// Canonical code string: `brand-modelnumber-storage[-ramN]`, or `unknown`
/// when nothing was extracted.
pub fn to_canonical_code(code: &ExtractedCode) -> String {
    let mut parts: Vec<String> = Vec::with_capacity(4);
    if let Some(b) = &code.brand {
        parts.push(b.clone());
    }
    if let Some(m) = &code.model_number {
        parts.push(m.clone());
    }
    if let Some(s) = code.storage_gb {
        parts.push(format!("{s}gb"));
    }
    if let Some(r) = code.ram_gb {
        parts.push(format!("ram{r}"));
    }
    if parts.is_empty() {
        "unknown".to_string()
    } else {
        parts.join("-")
    }
}

const COMPARE_WEIGHTS: [(f64, &str); 5] = [
    (0.20, "brand"),
    (0.35, "model"),
    (0.25, "storage"),
    (0.10, "ram"),
    (0.10, "color"),
];

/// Weighted partial match between two extracted codes, `[0, 1]`.
///
/// Only fields present on *both* sides participate; the score is normalized
/// by the participating weight. A device compared against an accessory is
/// always `0` regardless of field agreement.
pub fn compare(a: &ExtractedCode, b: &ExtractedCode) -> f64 {
    let device_vs_accessory = matches!(
        (a.product_type, b.product_type),
        (ProductType::Device, ProductType::Accessory)
            | (ProductType::Accessory, ProductType::Device)
    );
    if device_vs_accessory {
        return 0.0;
    }

    let mut num = 0.0;
    let mut denom = 0.0;
    for (weight, field) in COMPARE_WEIGHTS {
        let sim = match field {
            "brand" => match (&a.brand, &b.brand) {
                (Some(x), Some(y)) => Some(if x == y { 1.0 } else { 0.0 }),
                _ => None,
            },
            "model" => match (&a.model_number, &b.model_number) {
                (Some(x), Some(y)) => Some(if x == y {
                    1.0
                } else {
                    levenshtein_similarity(x, y)
                }),
                _ => None,
            },
            "storage" => match (a.storage_gb, b.storage_gb) {
                (Some(x), Some(y)) => Some(if x == y { 1.0 } else { 0.0 }),
                _ => None,
            },
            "ram" => match (a.ram_gb, b.ram_gb) {
                (Some(x), Some(y)) => Some(if x == y { 1.0 } else { 0.0 }),
                _ => None,
            },
            "color" => match (&a.color, &b.color) {
                (Some(x), Some(y)) => Some(if x == y { 1.0 } else { 0.0 }),
                _ => None,
            },
            _ => unreachable!(),
        };
        if let Some(sim) = sim {
            num += weight * sim;
            denom += weight;
        }
    }

    if denom == 0.0 { 0.0 } else { num / denom }
}

/// Storage and RAM, disambiguated.
///
/// Order of precedence: explicit `RAM NGB` declarations, then the dual
/// `NGB/MMGB` form (smaller side is RAM), then TB sizes, then the largest
/// remaining GB figure.
fn extract_memory(normalized: &str) -> (Option<u32>, Option<u32>) {
    let mut ram: Option<u32> = None;
    if let Some(caps) = RAM_EXPLICIT.captures(normalized) {
        ram = caps
            .get(1)
            .or_else(|| caps.get(2))
            .and_then(|m| m.as_str().parse().ok());
    }

    let mut storage: Option<u32> = None;
    if let Some(caps) = RAM_DUAL.captures(normalized) {
        let first: Option<u32> = caps.get(1).and_then(|m| m.as_str().parse().ok());
        let second: Option<u32> = caps.get(2).and_then(|m| m.as_str().parse().ok());
        if let (Some(x), Some(y)) = (first, second) {
            let (lo, hi) = if x <= y { (x, y) } else { (y, x) };
            if lo <= 24 && hi >= 32 {
                ram = ram.or(Some(lo));
                storage = Some(hi);
            }
        }
    }

    if storage.is_none() {
        storage = STORAGE_TB
            .captures(normalized)
            .and_then(|c| c.get(1))
            .and_then(|m| m.as_str().parse::<u32>().ok())
            .map(|tb| tb * 1024);
    }

    if storage.is_none() {
        let mut candidates: Vec<u32> = STORAGE_GB
            .captures_iter(normalized)
            .filter_map(|c| c.get(1).and_then(|m| m.as_str().parse().ok()))
            .collect();
        if let Some(r) = ram {
            if let Some(pos) = candidates.iter().position(|v| *v == r) {
                candidates.remove(pos);
            }
        }
        storage = candidates.into_iter().max();
    }

    (storage, ram)
}

fn field_confidence(
    brand: bool,
    model: bool,
    storage: bool,
    ram: bool,
    color: bool,
    variant: bool,
    year: bool,
) -> f64 {
    let mut sum: f64 = 0.0;
    if brand {
        sum += 0.20;
    }
    if model {
        sum += 0.25;
    }
    if storage {
        sum += 0.20;
    }
    if ram {
        sum += 0.10;
    }
    if color {
        sum += 0.10;
    }
    if variant {
        sum += 0.05;
    }
    if year {
        sum += 0.10;
    }
    sum.min(1.0)
}

fn fold_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Compact model key: whitespace removed, `+` folded to `plus`, so
/// `15 pro max`, `15 promax`, and `15promax` all collide.
fn canonical_model_number(model: &str) -> String {
    model.replace('+', "plus").split_whitespace().collect()
}

//! Multi-level blocking keys.
//!
//! Blocking is a grouping device only: the clusterer compares pairs solely
//! inside a shared primary-key bucket, and the coarser levels exist for
//! diagnostics and candidate recall. Keys are cheap string compositions over
//! the extracted code and the normalized name.

use serde::{Deserialize, Serialize};

use crate::codes::ExtractedCode;
use crate::normalize::{char_prefix, normalize_name};

/// How a block key was derived.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockKind {
    Brand,
    BrandModel,
    BrandStorage,
    CategoryPrice,
}

/// One blocking key at one level. Two listings share a block at minimum
/// level `L` iff any of their keys at level ≥ `L` match.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockKey {
    pub level: u8,
    pub kind: BlockKind,
    pub key: String,
}

/// Price band label used in the level-4 key.
pub fn price_band(price: Option<f64>) -> &'static str {
    match price {
        None => "unknown",
        Some(p) if p <= 0.0 => "unknown",
        Some(p) if p < 3_000_000.0 => "budget",
        Some(p) if p < 10_000_000.0 => "mid",
        Some(p) if p < 25_000_000.0 => "premium",
        Some(_) => "flagship",
    }
}

/// Primary partition key for the clusterer: `brand|model` when a model was
/// extracted, `brand|name-prefix` (25 chars) otherwise.
pub fn primary_key(code: &ExtractedCode, brand_raw: Option<&str>, name_normalized: &str) -> String {
    let brand = block_brand(code, brand_raw);
    match &code.model_number {
        Some(model) => format!("{brand}|{model}"),
        None => format!("{brand}|{}", char_prefix(name_normalized, 25)),
    }
}

/// Up to four blocking keys for one listing, finest level last.
pub fn generate_blocks(
    code: &ExtractedCode,
    brand_raw: Option<&str>,
    category_raw: Option<&str>,
    price: Option<f64>,
) -> Vec<BlockKey> {
    let brand = block_brand(code, brand_raw);
    let mut keys = Vec::with_capacity(4);

    keys.push(BlockKey {
        level: 1,
        kind: BlockKind::Brand,
        key: brand.clone(),
    });

    if let Some(model) = &code.model_number {
        keys.push(BlockKey {
            level: 2,
            kind: BlockKind::BrandModel,
            key: format!("{brand}|{model}"),
        });
    }

    if let Some(storage) = code.storage_gb {
        keys.push(BlockKey {
            level: 3,
            kind: BlockKind::BrandStorage,
            key: format!("{brand}|{storage}gb"),
        });
    }

    let category = category_raw
        .map(normalize_name)
        .filter(|c| !c.is_empty())
        .unwrap_or_else(|| "unknown".to_string());
    keys.push(BlockKey {
        level: 4,
        kind: BlockKind::CategoryPrice,
        key: format!("{category}|{}", price_band(price)),
    });

    keys
}

fn block_brand(code: &ExtractedCode, brand_raw: Option<&str>) -> String {
    if let Some(b) = &code.brand {
        return b.clone();
    }
    let raw = brand_raw.map(normalize_name).unwrap_or_default();
    if raw.is_empty() { "unknown".to_string() } else { raw }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codes::extract;
    use crate::normalize::normalize_name;

    #[test]
    fn primary_key_prefers_the_model() {
        let name = "iPhone 15 Pro Max 256GB Titanium Xanh";
        let code = extract(name);
        let key = primary_key(&code, Some("Apple"), &normalize_name(name));
        assert_eq!(key, "apple|15promax");
    }

    #[test]
    fn primary_key_falls_back_to_name_prefix() {
        let name = "Tủ Lạnh Toshiba Inverter 180 Lít GR-B22VU";
        let code = extract(name);
        let normalized = normalize_name(name);
        let key = primary_key(&code, Some("Toshiba"), &normalized);
        assert!(key.starts_with("toshiba|tủ lạnh toshiba"));
    }

    #[test]
    fn promax_variants_share_a_primary_block() {
        let a = extract("iPhone 15 Pro Max 256GB");
        let b = extract("Điện Thoại iPhone 15 ProMax 256G");
        let ka = primary_key(&a, None, "iphone 15 pro max 256gb");
        let kb = primary_key(&b, None, "điện thoại iphone 15 promax 256g");
        assert_eq!(ka, kb);
    }

    #[test]
    fn four_levels_when_fully_extracted() {
        let name = "Samsung Galaxy S24 Ultra 12GB 256GB";
        let code = extract(name);
        let keys = generate_blocks(&code, Some("Samsung"), Some("Điện thoại"), Some(28_990_000.0));
        assert_eq!(keys.len(), 4);
        assert_eq!(keys[0].key, "samsung");
        assert_eq!(keys[1].key, "samsung|s24ultra");
        assert_eq!(keys[2].key, "samsung|256gb");
        assert_eq!(keys[3].key, "điện thoại|flagship");
    }

    #[test]
    fn price_bands_partition_the_range() {
        assert_eq!(price_band(Some(1_500_000.0)), "budget");
        assert_eq!(price_band(Some(9_999_999.0)), "mid");
        assert_eq!(price_band(Some(10_000_000.0)), "premium");
        assert_eq!(price_band(Some(40_000_000.0)), "flagship");
        assert_eq!(price_band(Some(0.0)), "unknown");
        assert_eq!(price_band(None), "unknown");
    }
}

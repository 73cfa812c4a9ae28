//! Static matching tables: brand aliases, per-brand model patterns, color
//! synonyms, product-type keywords, and variant tags.
//!
//! All entries are written against the *normalized* name form (lowercase,
//! punctuation stripped, NFC). Regexes compile once at first use. Table order
//! is significant: earlier rows win.

use lazy_static::lazy_static;
use regex::Regex;

/// Ordered alias → canonical brand id table.
///
/// Product-line aliases (e.g. `iphone`) come before the brand's own name so a
/// listing that never mentions "Apple" still resolves.
pub const BRAND_ALIASES: &[(&str, &str)] = &[
    ("iphone", "apple"),
    ("ipad", "apple"),
    ("macbook", "apple"),
    ("airpods", "apple"),
    ("imac", "apple"),
    ("apple", "apple"),
    ("galaxy", "samsung"),
    ("samsung", "samsung"),
    ("redmi", "xiaomi"),
    ("poco", "xiaomi"),
    ("xiaomi", "xiaomi"),
    ("honor", "huawei"),
    ("huawei", "huawei"),
    ("reno", "oppo"),
    ("oppo", "oppo"),
    ("vivo", "vivo"),
    ("oneplus", "oneplus"),
    ("pixel", "google"),
    ("realme", "realme"),
    ("nokia", "nokia"),
    ("sony", "sony"),
    ("jbl", "jbl"),
    ("anker", "anker"),
    ("baseus", "baseus"),
    ("logitech", "logitech"),
    ("asus", "asus"),
    ("acer", "acer"),
    ("lenovo", "lenovo"),
    ("dell", "dell"),
    ("msi", "msi"),
    ("lg", "lg"),
    ("toshiba", "toshiba"),
    ("panasonic", "panasonic"),
    ("sharp", "sharp"),
    ("electrolux", "electrolux"),
    ("daikin", "daikin"),
    ("aqua", "aqua"),
    ("casper", "casper"),
];

lazy_static! {
    /// Model regex families, tried in order. Each regex yields the raw model
    /// string in capture group 1 (already brand-scoped by its prefix).
    pub static ref MODEL_PATTERNS: Vec<(&'static str, Regex)> = vec![
        (
            "apple",
            Regex::new(r"\biphone\s*((?:\d{1,2}|se|xs|xr|x)(?:\s*(?:pro\s*max|promax|pro|plus|mini|max))?)").unwrap(),
        ),
        (
            "apple",
            Regex::new(r"\bipad\s*((?:pro|air|mini|gen)\s*\d{0,2}|\d{1,2})").unwrap(),
        ),
        (
            "samsung",
            Regex::new(r"\bgalaxy\s*((?:z\s*fold|z\s*flip|note|tab\s*[sa]|[samz])\s*\d{1,3}(?:\s*(?:ultra|plus|fe|lite|5g))?)").unwrap(),
        ),
        (
            "xiaomi",
            Regex::new(r"\b(?:redmi\s*note|redmi|poco|xiaomi|mi)\s*([a-z]?\d{1,2}[a-z]?(?:\s*(?:pro\s*max|pro\s*plus|pro|ultra|lite|gt|[stx]))?)").unwrap(),
        ),
        (
            "oppo",
            Regex::new(r"\breno\s*(\d{1,2}(?:\s*(?:pro\s*plus|pro|5g|[fz]))?)").unwrap(),
        ),
        (
            "oppo",
            Regex::new(r"\bfind\s*(x\s*\d(?:\s*(?:pro|ultra|lite))?)").unwrap(),
        ),
        (
            "oppo",
            Regex::new(r"\boppo\s*(a\d{2,3})").unwrap(),
        ),
        (
            "vivo",
            Regex::new(r"\bvivo\s*([yxv]\d{1,3}[a-z]?(?:\s*(?:pro|plus|5g))?)").unwrap(),
        ),
        (
            "oneplus",
            Regex::new(r"\boneplus\s*(nord(?:\s*ce)?\s*\d?|\d{1,2}(?:\s*(?:pro|rt|[tr]))?)").unwrap(),
        ),
        (
            "google",
            Regex::new(r"\bpixel\s*(\d{1,2}a?(?:\s*(?:pro\s*xl|pro|xl))?)").unwrap(),
        ),
    ];

    /// Storage: `NNN GB` (2–4 digits, `256G` shorthand included) and `N TB`.
    pub static ref STORAGE_GB: Regex = Regex::new(r"\b(\d{2,4})\s*gb?\b").unwrap();
    pub static ref STORAGE_TB: Regex = Regex::new(r"\b(\d{1,2})\s*tb\b").unwrap();

    /// Explicit RAM declarations.
    pub static ref RAM_EXPLICIT: Regex =
        Regex::new(r"\bram\s*(\d{1,2})\s*gb\b|\b(\d{1,2})\s*gb\s*ram\b").unwrap();
    /// Dual-memory form `8GB/256GB` (slash is a space after normalization).
    pub static ref RAM_DUAL: Regex =
        Regex::new(r"\b(\d{1,2})\s*gb\s+(\d{2,4})\s*gb\b").unwrap();

    /// Four-digit release year, 2010–2029.
    pub static ref YEAR: Regex = Regex::new(r"\b(20[12][0-9])\b").unwrap();
}

/// Color synonym table. Hue rows come before finish rows (`titan`) so
/// `titan xanh` resolves to the hue. Within a row, longer synonyms first.
pub const COLOR_SYNONYMS: &[(&str, &[&str])] = &[
    ("green", &["xanh lá", "xanh rêu", "green", "mint"]),
    (
        "blue",
        &["xanh dương", "xanh da trời", "navy", "blue", "xanh"],
    ),
    (
        "black",
        &["than chì", "đen", "black", "midnight", "graphite"],
    ),
    (
        "white",
        &["trắng", "white", "silver", "bạc", "starlight", "kem"],
    ),
    ("red", &["đỏ", "red", "crimson"]),
    ("purple", &["deep purple", "tím", "purple", "lavender"]),
    ("pink", &["hồng", "pink", "rose"]),
    ("gray", &["space gray", "space grey", "xám", "gray", "grey"]),
    ("orange", &["cam", "orange", "coral"]),
    ("gold", &["vàng gold", "gold", "vàng", "champagne"]),
    ("yellow", &["yellow"]),
    ("titanium", &["titanium", "titan"]),
];

/// Accessory keywords, checked before device keywords.
pub const ACCESSORY_KEYWORDS: &[&str] = &[
    "ốp lưng",
    "ốp",
    "case",
    "kính cường lực",
    "cường lực",
    "dán màn hình",
    "miếng dán",
    "bao da",
    "sạc dự phòng",
    "pin dự phòng",
    "củ sạc",
    "sạc",
    "adapter",
    "cáp",
    "cable",
    "đế sạc",
    "đế",
    "dock",
    "stand",
    "giá đỡ",
    "chuột",
    "bàn phím",
    "tai nghe",
    "airpods",
    "buds",
    "headphone",
    "earbuds",
    "thẻ nhớ",
    "usb",
    "hub",
    "túi chống sốc",
    "gậy selfie",
];

/// Device keywords, checked after the accessory set.
pub const DEVICE_KEYWORDS: &[&str] = &[
    "điện thoại",
    "smartphone",
    "phone",
    "máy tính bảng",
    "tablet",
    "ipad",
    "laptop",
    "macbook",
    "máy tính",
    "tivi",
    "tv",
    "tủ lạnh",
    "máy giặt",
    "máy sấy",
    "điều hòa",
    "máy lạnh",
    "lò vi sóng",
    "nồi chiên",
    "bếp từ",
    "robot hút bụi",
    "máy hút bụi",
    "đồng hồ thông minh",
    "smartwatch",
    "máy ảnh",
    "camera",
    "loa",
];

/// Variant tags worth keeping on the extracted code.
pub const VARIANT_TAGS: &[&str] = &[
    "5g",
    "4g",
    "wifi",
    "cellular",
    "esim",
    "vn a",
    "quốc tế",
    "like new",
    "cũ",
];

/// True when `needle` occurs in `normalized` on word boundaries.
pub fn contains_word(normalized: &str, needle: &str) -> bool {
    let padded = format!(" {normalized} ");
    let target = format!(" {needle} ");
    padded.contains(&target)
}

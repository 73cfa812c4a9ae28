//! Name normalization shared by extraction, blocking, and similarity.
//!
//! The normalized form is the common currency of the whole matcher: every
//! regex table, similarity measure, and blocking key operates on it. Raw
//! listing names mix Vietnamese diacritics, vendor punctuation, and decorative
//! casing; normalization keeps the diacritics (they carry meaning in
//! Vietnamese) and strips the rest.

use unicode_normalization::UnicodeNormalization;

/// Normalize a raw product name.
///
/// - NFC-normalizes so Vietnamese diacritics compare byte-for-byte.
/// - Lowercases.
/// - Replaces every non-alphanumeric character with a space.
/// - Collapses whitespace runs and trims.
///
/// The function is idempotent: `normalize_name(normalize_name(s)) ==
/// normalize_name(s)`.
pub fn normalize_name(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut pending_space = false;

    for ch in s.nfc() {
        if ch.is_alphanumeric() {
            if pending_space && !out.is_empty() {
                out.push(' ');
            }
            pending_space = false;
            for lower in ch.to_lowercase() {
                out.push(lower);
            }
        } else {
            pending_space = true;
        }
    }

    out
}

/// Split an already-normalized name into word tokens.
///
/// Tokens follow Unicode letter/number boundaries; normalization has already
/// reduced separators to single spaces, so a plain whitespace split suffices.
pub fn word_tokens(normalized: &str) -> Vec<&str> {
    normalized.split_whitespace().collect()
}

/// First `max` characters of a normalized name, on a char boundary.
pub fn char_prefix(normalized: &str, max: usize) -> &str {
    match normalized.char_indices().nth(max) {
        Some((idx, _)) => &normalized[..idx],
        None => normalized,
    }
}

//! String similarity suite over normalized names.
//!
//! Five measures with complementary failure modes feed a weighted combined
//! score; `quick_check` is the cheap prefilter that lets callers skip the
//! full computation for obviously unrelated pairs.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

/// Weights for [`combined_similarity`]. The combined score divides by the
/// weight sum, so the table does not need to add up to one.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SimilarityWeights {
    pub levenshtein: f64,
    pub jaccard: f64,
    pub dice: f64,
    pub ngram: f64,
    pub word_order: f64,
}

impl Default for SimilarityWeights {
    fn default() -> Self {
        Self {
            levenshtein: 0.25,
            jaccard: 0.25,
            dice: 0.20,
            ngram: 0.20,
            word_order: 0.10,
        }
    }
}

/// Edit-distance similarity: `1 − dist / max(len)` over chars.
pub fn levenshtein_similarity(a: &str, b: &str) -> f64 {
    let a_chars: Vec<char> = a.chars().collect();
    let b_chars: Vec<char> = b.chars().collect();
    let max_len = a_chars.len().max(b_chars.len());
    if max_len == 0 {
        return 1.0;
    }
    1.0 - levenshtein(&a_chars, &b_chars) as f64 / max_len as f64
}

/// Two-row Levenshtein over char slices.
fn levenshtein(a: &[char], b: &[char]) -> usize {
    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }

    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut cur = vec![0usize; b.len() + 1];

    for (i, ca) in a.iter().enumerate() {
        cur[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let cost = usize::from(ca != cb);
            cur[j + 1] = (prev[j + 1] + 1).min(cur[j] + 1).min(prev[j] + cost);
        }
        std::mem::swap(&mut prev, &mut cur);
    }
    prev[b.len()]
}

/// Jaccard similarity over word tokens of length > 1.
pub fn jaccard_similarity(a: &str, b: &str) -> f64 {
    let sa = token_set(a);
    let sb = token_set(b);
    set_jaccard(&sa, &sb)
}

/// Dice coefficient over the same token sets as [`jaccard_similarity`].
pub fn dice_similarity(a: &str, b: &str) -> f64 {
    let sa = token_set(a);
    let sb = token_set(b);
    if sa.is_empty() && sb.is_empty() {
        return 1.0;
    }
    if sa.is_empty() || sb.is_empty() {
        return 0.0;
    }
    let inter = sa.intersection(&sb).count();
    2.0 * inter as f64 / (sa.len() + sb.len()) as f64
}

/// Jaccard similarity over character n-grams (default callers use `n = 2`).
pub fn ngram_similarity(a: &str, b: &str, n: usize) -> f64 {
    let sa = ngram_set(a, n);
    let sb = ngram_set(b, n);
    set_jaccard(&sa, &sb)
}

/// Word-order similarity: shared consecutive token pairs over the geometric
/// mean of candidate pair counts.
pub fn word_order_similarity(a: &str, b: &str) -> f64 {
    let pa = pair_set(a);
    let pb = pair_set(b);
    if pa.is_empty() || pb.is_empty() {
        return 0.0;
    }
    let matching = pa.intersection(&pb).count();
    matching as f64 / ((pa.len() * pb.len()) as f64).sqrt()
}

/// Weighted blend of all five measures, normalized by the weight sum.
pub fn combined_similarity(a: &str, b: &str, weights: &SimilarityWeights) -> f64 {
    let total = weights.levenshtein
        + weights.jaccard
        + weights.dice
        + weights.ngram
        + weights.word_order;
    if total == 0.0 {
        return 0.0;
    }

    let sum = weights.levenshtein * levenshtein_similarity(a, b)
        + weights.jaccard * jaccard_similarity(a, b)
        + weights.dice * dice_similarity(a, b)
        + weights.ngram * ngram_similarity(a, b, 2)
        + weights.word_order * word_order_similarity(a, b);
    sum / total
}

/// Cheap prefilter: `false` means the pair cannot plausibly match and the
/// full similarity computation can be skipped.
///
/// Rejects when one string is more than twice the length of the other, or
/// when the first five tokens of each side overlap below `threshold`.
pub fn quick_check(a: &str, b: &str, threshold: f64) -> bool {
    if a.is_empty() || b.is_empty() {
        return a == b;
    }

    let (la, lb) = (a.chars().count(), b.chars().count());
    let ratio = la.max(lb) as f64 / la.min(lb).max(1) as f64;
    if ratio > 2.0 {
        return false;
    }

    let head_a: HashSet<&str> = a.split_whitespace().take(5).collect();
    let head_b: HashSet<&str> = b.split_whitespace().take(5).collect();
    set_jaccard(&head_a, &head_b) >= threshold
}

fn token_set(s: &str) -> HashSet<&str> {
    s.split_whitespace().filter(|t| t.len() > 1).collect()
}

fn ngram_set(s: &str, n: usize) -> HashSet<String> {
    let chars: Vec<char> = s.chars().collect();
    if chars.len() < n {
        return HashSet::new();
    }
    chars.windows(n).map(|w| w.iter().collect()).collect()
}

fn pair_set(s: &str) -> HashSet<(&str, &str)> {
    let tokens: Vec<&str> = s.split_whitespace().collect();
    tokens.windows(2).map(|w| (w[0], w[1])).collect()
}

fn set_jaccard<T: std::hash::Hash + Eq>(a: &HashSet<T>, b: &HashSet<T>) -> f64 {
    if a.is_empty() && b.is_empty() {
        return 1.0;
    }
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let inter = a.intersection(b).count();
    let union = a.len() + b.len() - inter;
    inter as f64 / union as f64
}

//! Pure matching primitives for the product catalog deduplicator.
//!
//! Everything in this crate is synchronous, deterministic, and free of I/O:
//! - `normalize` — Vietnamese-aware name normalization and tokenization.
//! - `codes` — brand / model / spec extraction from raw listing names.
//! - `similarity` — string similarity suite with a weighted combined score.
//! - `blocking` — multi-level blocking keys that bound pairwise comparison.
//!
//! Higher layers (scoring, clustering, the job runner) live in `dedup-engine`
//! and treat these functions as total: malformed input yields safe defaults,
//! never errors.

pub mod blocking;
pub mod codes;
pub mod normalize;
pub mod similarity;
mod tables;

pub use blocking::{BlockKey, BlockKind, generate_blocks, price_band, primary_key};
pub use codes::{ExtractedCode, ProductType, compare, extract, to_canonical_code};
pub use normalize::{normalize_name, word_tokens};
pub use similarity::{
    SimilarityWeights, combined_similarity, levenshtein_similarity, quick_check,
};

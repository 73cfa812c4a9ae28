//! Field-length bounds of the persistent layout.
//!
//! Violating inputs are silently truncated, never rejected; truncation cuts
//! on char boundaries so Vietnamese text cannot be split mid-codepoint.

pub const MAX_NAME_LEN: usize = 500;
pub const MAX_SLUG_LEN: usize = 200;
pub const MAX_IMAGE_URL_LEN: usize = 999;
pub const MAX_DESCRIPTION_LEN: usize = 10_000;
pub const MAX_IMAGES: usize = 10;

/// Truncate to at most `max` characters.
pub fn truncate_chars(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}

/// Truncate in place when over the limit, leaving short strings untouched.
pub fn clamp_in_place(s: &mut String, max: usize) {
    if s.chars().count() > max {
        *s = truncate_chars(s, max);
    }
}

/// Keep at most [`MAX_IMAGES`] entries.
pub fn clamp_images(images: &mut Vec<String>) {
    images.truncate(MAX_IMAGES);
}

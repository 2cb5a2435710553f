//! Similarity scoring and vector encoding helpers.
//!
//! Shared by the SQLite index in the app crate and the in-memory index
//! here, so both rank items the same way.

/// Encode a float vector as a BLOB (little-endian f32 bytes).
///
/// ```rust
/// use gap_harness_core::scoring::{blob_to_vec, vec_to_blob};
///
/// let v = vec![1.0f32, -2.5, 3.125];
/// let blob = vec_to_blob(&v);
/// assert_eq!(blob.len(), 12);
/// assert_eq!(blob_to_vec(&blob), v);
/// ```
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for &v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Decode a BLOB written by [`vec_to_blob`].
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// Cosine similarity in `[-1.0, 1.0]`.
///
/// Returns `0.0` for empty vectors or vectors of different lengths.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }

    dot / denom
}

/// Fraction of distinct query terms (length > 2) whose stem appears in `text`.
///
/// Used when no embedding provider is configured. Returns `0.0` when the
/// query has no usable terms.
pub fn keyword_score(query: &str, text: &str) -> f64 {
    let query_lower = query.to_lowercase();
    let mut terms: Vec<&str> = query_lower
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.len() > 2)
        .map(stem)
        .collect();
    terms.sort_unstable();
    terms.dedup();
    if terms.is_empty() {
        return 0.0;
    }

    let text_lower = text.to_lowercase();
    let hits = terms.iter().filter(|t| text_lower.contains(**t)).count();
    hits as f64 / terms.len() as f64
}

/// Strip one plural or verb suffix, keeping at least three characters.
fn stem(term: &str) -> &str {
    for suffix in ["ing", "ed", "s"] {
        if let Some(base) = term.strip_suffix(suffix) {
            if base.len() >= 3 && !base.ends_with('s') {
                return base;
            }
        }
    }
    term
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cosine_identical() {
        let v = vec![1.0, 2.0, 3.0];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_orthogonal() {
        let a = vec![1.0, 0.0, 0.0];
        let b = vec![0.0, 1.0, 0.0];
        assert!(cosine_similarity(&a, &b).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_mismatched() {
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
        assert_eq!(cosine_similarity(&[1.0, 2.0], &[1.0]), 0.0);
    }

    #[test]
    fn test_keyword_score_counts_distinct_terms() {
        let text = "Access logs are retained for twelve months";
        assert_eq!(keyword_score("access logs", text), 1.0);
        assert_eq!(keyword_score("logs logs backups", text), 0.5);
        assert_eq!(keyword_score("a of", text), 0.0);
    }

    #[test]
    fn test_keyword_score_matches_simple_inflections() {
        assert_eq!(keyword_score("logs", "Log retention control"), 1.0);
        assert_eq!(keyword_score("retained", "must retain records"), 1.0);
        assert_eq!(keyword_score("access", "Access review"), 1.0);
        assert_eq!(stem("process"), "process");
    }
}

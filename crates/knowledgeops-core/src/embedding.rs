//! Embedding backend trait and vector math.
//!
//! Concrete embedders (OpenAI, Ollama, fastembed) live in the
//! `knowledgeops` app crate; this module only defines the contract and the
//! helpers every [`VectorIndex`](crate::index::VectorIndex) needs.

use async_trait::async_trait;

use crate::backend::BackendError;

/// Turns text into fixed-dimension vectors.
///
/// `embed` must return exactly one vector per input, in input order.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Model identifier, e.g. `"all-minilm-l6-v2"`.
    fn model_name(&self) -> &str;
    /// Vector dimensionality, e.g. `384`.
    fn dims(&self) -> usize;
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, BackendError>;
}

/// Encode a vector as little-endian `f32` bytes for BLOB storage.
///
/// ```rust
/// use knowledgeops_core::embedding::{blob_to_vec, vec_to_blob};
///
/// let v = vec![0.5f32, -1.0];
/// assert_eq!(vec_to_blob(&v).len(), 8);
/// assert_eq!(blob_to_vec(&vec_to_blob(&v)), v);
/// ```
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    vec.iter().flat_map(|v| v.to_le_bytes()).collect()
}

/// Inverse of [`vec_to_blob`]. Trailing bytes that do not form a whole
/// `f32` are ignored.
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect()
}

/// Cosine similarity in `[-1, 1]`; `0.0` for empty, mismatched, or
/// zero-magnitude vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let (dot, norm_a, norm_b) = a
        .iter()
        .zip(b)
        .fold((0.0f32, 0.0f32, 0.0f32), |(d, na, nb), (x, y)| {
            (d + x * y, na + x * x, nb + y * y)
        });

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }
    dot / denom
}

/// Retrieval score: `1 - cosine_distance`, clamped to `[0, 1]`.
pub fn similarity_score(query: &[f32], candidate: &[f32]) -> f32 {
    let distance = 1.0 - cosine_similarity(query, candidate);
    (1.0 - distance).clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blob_ignores_trailing_bytes() {
        let mut blob = vec_to_blob(&[1.0, 2.0]);
        blob.push(0xff);
        assert_eq!(blob_to_vec(&blob), vec![1.0, 2.0]);
    }

    #[test]
    fn test_cosine_identical_and_orthogonal() {
        let v = [3.0, 4.0];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_degenerate_inputs() {
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
        assert_eq!(cosine_similarity(&[1.0, 2.0], &[1.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 1.0]), 0.0);
    }

    #[test]
    fn test_score_clamped() {
        assert!((similarity_score(&[1.0, 1.0], &[2.0, 2.0]) - 1.0).abs() < 1e-6);
        assert_eq!(similarity_score(&[1.0, 0.0], &[-1.0, 0.0]), 0.0);
        let s = similarity_score(&[1.0, 0.0], &[1.0, 1.0]);
        assert!(s > 0.7 && s < 0.71);
    }
}

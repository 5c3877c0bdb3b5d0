//! Embedding vector math
//!
//! The embedding model itself lives behind the [`crate::oracle::Embedder`]
//! trait; this module only owns the similarity helpers the vector index, the
//! graph store, the scorer and the inferencer agree on.

// ============================================================================
// SIMILARITY FUNCTIONS
// ============================================================================

/// Cosine similarity between two vectors
///
/// `dot(a,b) / (||a|| * ||b|| + 1e-9)` - the epsilon keeps a degenerate
/// zero vector at score 0 instead of NaN. Mismatched lengths score 0.
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
    dot / (norm_a.sqrt() * norm_b.sqrt() + 1e-9)
}

/// Dot product of two vectors (0 on length mismatch)
pub fn dot_product(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

/// Element-wise mean of a set of vectors; `None` when the set is empty or
/// the lengths disagree
pub fn centroid(vectors: &[&[f32]]) -> Option<Vec<f32>> {
    let first = vectors.first()?;
    let dims = first.len();
    if dims == 0 || vectors.iter().any(|v| v.len() != dims) {
        return None;
    }
    let mut sum = vec![0.0f32; dims];
    for vector in vectors {
        for (acc, x) in sum.iter_mut().zip(vector.iter()) {
            *acc += x;
        }
    }
    let count = vectors.len() as f32;
    for acc in sum.iter_mut() {
        *acc /= count;
    }
    Some(sum)
}

// ============================================================================
// TESTS
// ============================================================================

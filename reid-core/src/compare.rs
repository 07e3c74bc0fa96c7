use crate::embed::Embedding;

/// Cosine similarity between two raw (not necessarily normalized) embeddings.
///
/// A zero-length vector has no direction; its similarity to anything is 0.
/// Mismatched lengths also score 0 rather than panicking inside `dot`.
pub fn cosine_similarity(a: &Embedding, b: &Embedding) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }

    let norm_a = a.dot(a).sqrt();
    let norm_b = b.dot(b).sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    a.dot(b) / (norm_a * norm_b)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::arr1;

    #[test]
    fn test_cosine_similarity() {
        let a = arr1(&[1.0, 0.0, 0.0]);
        let b = arr1(&[1.0, 0.0, 0.0]);
        assert!((cosine_similarity(&a, &b) - 1.0).abs() < 1e-6);

        let c = arr1(&[0.0, 1.0, 0.0]);
        assert!(cosine_similarity(&a, &c).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_similarity_ignores_magnitude() {
        let a = arr1(&[3.0, 4.0]);
        let b = arr1(&[30.0, 40.0]);
        assert!((cosine_similarity(&a, &b) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_similarity_is_not_clamped() {
        let a = arr1(&[1.0, 2.0]);
        let b = arr1(&[-1.0, -2.0]);
        assert!((cosine_similarity(&a, &b) + 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_degenerate_vectors_score_zero() {
        let zero = arr1(&[0.0, 0.0, 0.0]);
        let a = arr1(&[1.0, 2.0, 3.0]);
        assert_eq!(cosine_similarity(&zero, &a), 0.0);

        let short = arr1(&[1.0, 2.0]);
        assert_eq!(cosine_similarity(&short, &a), 0.0);
    }
}

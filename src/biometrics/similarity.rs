//! Vector similarity and enrollment quality scoring.

use serde::{Deserialize, Serialize};

/// `dot(a, b) / (‖a‖·‖b‖)`.
///
/// Returns 0.0 when the vectors differ in length, are empty, or either one is all zeros.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let dot: f64 = a.iter().zip(b).map(|(x, y)| *x as f64 * *y as f64).sum();
    let norm_a: f64 = a.iter().map(|x| (*x as f64).powi(2)).sum::<f64>().sqrt();
    let norm_b: f64 = b.iter().map(|x| (*x as f64).powi(2)).sum::<f64>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}

/// Highest similarity between `embedding` and any of `candidates`, or 0.0 if there are none.
pub fn best_match(embedding: &[f32], candidates: &[Vec<f32>]) -> f64 {
    candidates
        .iter()
        .map(|candidate| cosine_similarity(embedding, candidate))
        .fold(0.0, f64::max)
}

/// How a profile's quality score is derived from its embeddings.
///
/// The score is the mean pairwise cosine similarity. A mean above `duplicate_ceiling`
/// usually means the same recording was submitted several times, so it is replaced by
/// the flat `duplicate_score` instead of being rewarded.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct QualityPolicy {
    pub duplicate_ceiling: f64,
    pub duplicate_score: f64,
    /// Enrollment fails below this.
    pub minimum: f64,
}

impl Default for QualityPolicy {
    fn default() -> Self {
        Self {
            duplicate_ceiling: 0.95,
            duplicate_score: 0.8,
            minimum: 0.7,
        }
    }
}

impl QualityPolicy {
    /// Fewer than two embeddings have nothing to compare, so they score a neutral 0.5.
    pub fn score(&self, embeddings: &[Vec<f32>]) -> f64 {
        if embeddings.len() < 2 {
            return 0.5;
        }

        let mut total = 0.0;
        let mut pairs = 0usize;
        for (i, a) in embeddings.iter().enumerate() {
            for b in &embeddings[i + 1..] {
                total += cosine_similarity(a, b);
                pairs += 1;
            }
        }

        let mean = total / pairs as f64;
        if mean > self.duplicate_ceiling {
            self.duplicate_score
        } else {
            mean.clamp(0.0, 1.0)
        }
    }

    pub fn is_acceptable(&self, score: f64) -> bool {
        score >= self.minimum
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_self_similarity_is_one() {
        let v = vec![0.3, -1.2, 4.0, 0.01];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_similarity_is_symmetric() {
        let a = vec![1.0, 2.0, 3.0];
        let b = vec![-2.0, 0.5, 1.0];
        assert_eq!(cosine_similarity(&a, &b), cosine_similarity(&b, &a));
    }

    #[test]
    fn test_degenerate_inputs_score_zero() {
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 1.0]), 0.0);
        assert_eq!(cosine_similarity(&[1.0, 2.0], &[1.0, 2.0, 3.0]), 0.0);
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
    }

    #[test]
    fn test_orthogonal_vectors() {
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-12);
    }

    #[test]
    fn test_best_match() {
        let stored = vec![vec![1.0, 0.0], vec![0.6, 0.8]];
        assert!((best_match(&[0.6, 0.8], &stored) - 1.0).abs() < 1e-9);
        assert_eq!(best_match(&[1.0, 0.0], &[]), 0.0);
    }

    #[test]
    fn test_quality_clamps_near_duplicates() {
        let policy = QualityPolicy::default();
        let same = vec![vec![1.0, 2.0, 3.0]; 3];
        assert_eq!(policy.score(&same), 0.8);
        assert!(policy.is_acceptable(policy.score(&same)));
    }

    #[test]
    fn test_quality_is_mean_pairwise_similarity() {
        let policy = QualityPolicy::default();
        let embeddings = vec![vec![1.0, 0.0], vec![0.0, 1.0]];
        assert!(policy.score(&embeddings).abs() < 1e-12);
        assert!(!policy.is_acceptable(policy.score(&embeddings)));

        assert_eq!(policy.score(&[vec![1.0]]), 0.5);
    }
}

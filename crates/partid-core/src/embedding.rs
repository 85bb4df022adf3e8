// crates/partid-core/src/embedding.rs
//
// Validated embedding vectors and the similarity math shared by every crate.

use serde::{Deserialize, Serialize};

use crate::error::PartIdError;

/// Allowed deviation of an embedding's L2 norm from 1.0.
pub const NORM_TOLERANCE: f32 = 1e-3;

/// An L2-normalized embedding vector.
///
/// Construction is the only validation point: a value of this type always has
/// finite components and unit norm (within `NORM_TOLERANCE`). Dimension is
/// checked against the store dimension where the embedding enters the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<f32>", into = "Vec<f32>")]
pub struct Embedding(Vec<f32>);

impl Embedding {
    /// Wrap an already-normalized vector, rejecting anything off the unit sphere.
    pub fn new(values: Vec<f32>) -> Result<Self, PartIdError> {
        if values.is_empty() {
            return Err(PartIdError::InvalidEmbedding("empty vector".to_string()));
        }
        if values.iter().any(|v| !v.is_finite()) {
            return Err(PartIdError::InvalidEmbedding(
                "non-finite component".to_string(),
            ));
        }
        let norm = l2_norm(&values);
        if (norm - 1.0).abs() > NORM_TOLERANCE {
            return Err(PartIdError::InvalidEmbedding(format!(
                "norm {:.5} outside 1.0 ± {}",
                norm, NORM_TOLERANCE
            )));
        }
        Ok(Self(values))
    }

    /// L2-normalize a raw vector. Zero vectors are rejected.
    pub fn normalize(mut values: Vec<f32>) -> Result<Self, PartIdError> {
        if values.iter().any(|v| !v.is_finite()) {
            return Err(PartIdError::InvalidEmbedding(
                "non-finite component".to_string(),
            ));
        }
        let norm = l2_norm(&values);
        if norm == 0.0 {
            return Err(PartIdError::InvalidEmbedding("zero vector".to_string()));
        }
        for v in values.iter_mut() {
            *v /= norm;
        }
        Self::new(values)
    }

    /// Check this embedding against the configured dimension.
    pub fn check_dimension(&self, expected: usize) -> Result<(), PartIdError> {
        if self.0.len() != expected {
            return Err(PartIdError::DimensionMismatch {
                expected,
                got: self.0.len(),
            });
        }
        Ok(())
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.0
    }

    pub fn dimension(&self) -> usize {
        self.0.len()
    }
}

impl TryFrom<Vec<f32>> for Embedding {
    type Error = PartIdError;

    fn try_from(values: Vec<f32>) -> Result<Self, Self::Error> {
        Embedding::new(values)
    }
}

impl From<Embedding> for Vec<f32> {
    fn from(e: Embedding) -> Self {
        e.0
    }
}

impl AsRef<[f32]> for Embedding {
    fn as_ref(&self) -> &[f32] {
        &self.0
    }
}

fn l2_norm(values: &[f32]) -> f32 {
    values.iter().map(|x| x * x).sum::<f32>().sqrt()
}

/// Compute cosine similarity between two vectors.
///
/// Returns a value in [-1.0, 1.0]. Returns 0.0 if either vector has zero
/// magnitude or the lengths differ.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }

    let mut dot = 0.0_f64;
    let mut norm_a = 0.0_f64;
    let mut norm_b = 0.0_f64;

    for (x, y) in a.iter().zip(b.iter()) {
        let x = *x as f64;
        let y = *y as f64;
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom == 0.0 {
        return 0.0;
    }

    ((dot / denom) as f32).clamp(-1.0, 1.0)
}

/// Deterministic pseudo-embedding: hash text + dimension index to produce a
/// reproducible float vector, then L2-normalize. Identical text always yields
/// an identical vector. Used for fixtures and smoke runs; no model required.
pub fn hash_embedding(text: &str, dimensions: usize) -> Embedding {
    use sha2::{Digest, Sha256};

    let mut raw = Vec::with_capacity(dimensions.max(1));
    for i in 0..dimensions.max(1) {
        let mut hasher = Sha256::new();
        hasher.update(text.as_bytes());
        hasher.update(i.to_le_bytes());
        let hash = hasher.finalize();
        // First 4 bytes as u32, mapped to [-1, 1]
        let bits = u32::from_le_bytes([hash[0], hash[1], hash[2], hash[3]]);
        let val = (bits as f64 / u32::MAX as f64) * 2.0 - 1.0;
        raw.push(val as f32);
    }

    let norm = l2_norm(&raw);
    if norm > 0.0 {
        for v in raw.iter_mut() {
            *v /= norm;
        }
    } else {
        raw[0] = 1.0;
    }
    Embedding(raw)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_produces_unit_norm() {
        let e = Embedding::normalize(vec![3.0, 4.0]).unwrap();
        assert!((e.as_slice()[0] - 0.6).abs() < 1e-6);
        assert!((e.as_slice()[1] - 0.8).abs() < 1e-6);
    }

    #[test]
    fn test_new_rejects_unnormalized() {
        let err = Embedding::new(vec![3.0, 4.0]).unwrap_err();
        assert!(matches!(err, PartIdError::InvalidEmbedding(_)));
    }

    #[test]
    fn test_normalize_rejects_zero_vector() {
        assert!(Embedding::normalize(vec![0.0, 0.0, 0.0]).is_err());
    }

    #[test]
    fn test_new_rejects_nan() {
        assert!(Embedding::new(vec![f32::NAN, 1.0]).is_err());
    }

    #[test]
    fn test_check_dimension() {
        let e = Embedding::normalize(vec![1.0, 0.0, 0.0]).unwrap();
        assert!(e.check_dimension(3).is_ok());
        match e.check_dimension(4) {
            Err(PartIdError::DimensionMismatch { expected, got }) => {
                assert_eq!(expected, 4);
                assert_eq!(got, 3);
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_deserialize_validates() {
        let ok: Result<Embedding, _> = serde_json::from_str("[1.0, 0.0]");
        assert!(ok.is_ok());
        let bad: Result<Embedding, _> = serde_json::from_str("[2.0, 0.0]");
        assert!(bad.is_err());
    }

    #[test]
    fn test_cosine_similarity_identical() {
        let v = vec![1.0, 2.0, 3.0];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_similarity_orthogonal_and_opposite() {
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
        assert!((cosine_similarity(&[1.0, 0.0], &[-1.0, 0.0]) + 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_similarity_different_lengths() {
        assert_eq!(cosine_similarity(&[1.0, 2.0, 3.0], &[1.0, 2.0]), 0.0);
    }

    #[test]
    fn test_hash_embedding_deterministic_and_normalized() {
        let a = hash_embedding("hex bolt m6", 16);
        let b = hash_embedding("hex bolt m6", 16);
        let c = hash_embedding("washer", 16);
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.dimension(), 16);
        assert!(Embedding::new(a.as_slice().to_vec()).is_ok());
    }
}

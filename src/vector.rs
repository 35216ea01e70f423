//! Dense vectors and the distance kernels used by the index.
//!
//! The index works in squared Euclidean space. Embeddings are unit-normalized
//! before they reach the index, so squared L2 distance `d` and cosine
//! similarity are related by `cos = 1 - d / 2`.

use serde::{Deserialize, Serialize};
use wide::f32x8;

use crate::error::{RagError, Result};

/// A dense embedding vector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Vector {
    /// The vector dimensions as floating point values.
    pub data: Vec<f32>,
}

impl Vector {
    /// Create a new vector with the given dimensions.
    pub fn new(data: Vec<f32>) -> Self {
        Self { data }
    }

    /// Get the dimensionality of this vector.
    pub fn dimension(&self) -> usize {
        self.data.len()
    }

    /// Calculate the L2 norm (magnitude) of this vector.
    pub fn norm(&self) -> f32 {
        dot(&self.data, &self.data).sqrt()
    }

    /// Normalize this vector to unit length.
    pub fn normalize(&mut self) {
        let norm = self.norm();
        if norm > 0.0 {
            for value in &mut self.data {
                *value /= norm;
            }
        }
    }

    /// Get a normalized copy of this vector.
    pub fn normalized(mut self) -> Self {
        self.normalize();
        self
    }

    /// Validate that this vector has the expected dimension.
    pub fn validate_dimension(&self, expected_dim: usize) -> Result<()> {
        if self.data.len() != expected_dim {
            return Err(RagError::InvalidOperation(format!(
                "Vector dimension mismatch: expected {}, got {}",
                expected_dim,
                self.data.len()
            )));
        }
        Ok(())
    }

    /// Check if this vector contains any NaN or infinite values.
    pub fn is_valid(&self) -> bool {
        self.data.iter().all(|x| x.is_finite())
    }
}

impl From<Vec<f32>> for Vector {
    fn from(data: Vec<f32>) -> Self {
        Vector::new(data)
    }
}

/// Squared Euclidean distance between two equal-length slices.
#[inline]
pub fn l2_squared(a: &[f32], b: &[f32]) -> f32 {
    debug_assert_eq!(a.len(), b.len());
    let chunks_a = a.chunks_exact(8);
    let chunks_b = b.chunks_exact(8);
    let tail: f32 = chunks_a
        .remainder()
        .iter()
        .zip(chunks_b.remainder())
        .map(|(x, y)| (x - y) * (x - y))
        .sum();

    let mut acc = f32x8::ZERO;
    for (ca, cb) in chunks_a.zip(chunks_b) {
        let diff = lanes(ca) - lanes(cb);
        acc += diff * diff;
    }
    acc.reduce_add() + tail
}

/// Dot product of two equal-length slices.
#[inline]
pub fn dot(a: &[f32], b: &[f32]) -> f32 {
    debug_assert_eq!(a.len(), b.len());
    let chunks_a = a.chunks_exact(8);
    let chunks_b = b.chunks_exact(8);
    let tail: f32 = chunks_a
        .remainder()
        .iter()
        .zip(chunks_b.remainder())
        .map(|(x, y)| x * y)
        .sum();

    let mut acc = f32x8::ZERO;
    for (ca, cb) in chunks_a.zip(chunks_b) {
        acc += lanes(ca) * lanes(cb);
    }
    acc.reduce_add() + tail
}

/// Convert a squared L2 distance between unit vectors to cosine similarity.
#[inline]
pub fn similarity_from_l2(distance: f32) -> f32 {
    1.0 - distance / 2.0
}

#[inline]
fn lanes(chunk: &[f32]) -> f32x8 {
    f32x8::new([
        chunk[0], chunk[1], chunk[2], chunk[3], chunk[4], chunk[5], chunk[6], chunk[7],
    ])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scalar_l2(a: &[f32], b: &[f32]) -> f32 {
        a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum()
    }

    #[test]
    fn test_l2_matches_scalar_for_odd_lengths() {
        for len in [1, 7, 8, 9, 17, 384] {
            let a: Vec<f32> = (0..len).map(|i| (i as f32 * 0.37).sin()).collect();
            let b: Vec<f32> = (0..len).map(|i| (i as f32 * 0.11).cos()).collect();
            let simd = l2_squared(&a, &b);
            let scalar = scalar_l2(&a, &b);
            assert!((simd - scalar).abs() < 1e-3, "len {len}: {simd} vs {scalar}");
        }
    }

    #[test]
    fn test_normalize_and_similarity() {
        let v = Vector::new(vec![3.0, 4.0]).normalized();
        assert!((v.norm() - 1.0).abs() < 1e-6);
        assert!((similarity_from_l2(l2_squared(&v.data, &v.data)) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_validate_dimension() {
        let v = Vector::new(vec![0.0; 4]);
        assert!(v.validate_dimension(4).is_ok());
        assert!(v.validate_dimension(5).is_err());
        assert!(v.is_valid());
        assert!(!Vector::new(vec![f32::NAN]).is_valid());
    }
}

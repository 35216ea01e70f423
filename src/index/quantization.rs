//! Product quantization.
//!
//! A vector of `dim` floats is split into `m` contiguous sub-vectors of
//! `dsub = dim / m` floats. Each sub-space has its own codebook of `ksub`
//! centroids trained with k-means, and a vector is stored as `m` one-byte
//! codebook indices. At 384 dimensions with `m = 48` this is 48 bytes per
//! vector instead of 1536.
//!
//! Distances use asymmetric distance computation: the query stays in full
//! precision and a per-query [`ProductQuantizer::distance_table`] holds the
//! squared distance from each query sub-vector to every codeword.

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::{RagError, Result};
use crate::index::kmeans::{KMeansConfig, kmeans, nearest};
use crate::vector::l2_squared;

/// Trained product quantizer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductQuantizer {
    dim: usize,
    m: usize,
    ksub: usize,
    dsub: usize,
    /// `m * ksub * dsub` floats, sub-space major.
    codebooks: Vec<f32>,
}

impl ProductQuantizer {
    /// Train codebooks on `data`, `n` rows of `dim` floats.
    ///
    /// `ksub` is `2^bits`, reduced to the number of training rows when the
    /// sample is smaller.
    pub fn train(
        data: &[f32],
        dim: usize,
        m: usize,
        bits: u8,
        iterations: usize,
        seed: u64,
    ) -> Result<Self> {
        if m == 0 || dim % m != 0 {
            return Err(RagError::invalid_config(format!(
                "dimension {dim} is not divisible by {m} sub-quantizers"
            )));
        }
        if !(1..=8).contains(&bits) {
            return Err(RagError::invalid_config(format!(
                "pq_bits must be within 1..=8, got {bits}"
            )));
        }
        if data.is_empty() || data.len() % dim != 0 {
            return Err(RagError::invalid_operation(
                "product quantizer needs a non-empty training set",
            ));
        }

        let n = data.len() / dim;
        let dsub = dim / m;
        let ksub = (1usize << bits).min(n);

        let codebooks: Vec<Vec<f32>> = (0..m)
            .into_par_iter()
            .map(|j| {
                let sub: Vec<f32> = data
                    .chunks_exact(dim)
                    .flat_map(|row| row[j * dsub..(j + 1) * dsub].iter().copied())
                    .collect();
                let config = KMeansConfig {
                    k: ksub,
                    max_iterations: iterations,
                    seed: seed.wrapping_add(j as u64),
                };
                kmeans(&sub, dsub, &config)
            })
            .collect::<Result<_>>()?;

        Ok(Self {
            dim,
            m,
            ksub,
            dsub,
            codebooks: codebooks.into_iter().flatten().collect(),
        })
    }

    pub fn dimension(&self) -> usize {
        self.dim
    }

    /// Number of sub-quantizers, which is also the code length in bytes.
    pub fn code_len(&self) -> usize {
        self.m
    }

    pub fn ksub(&self) -> usize {
        self.ksub
    }

    #[inline]
    fn codebook(&self, j: usize) -> &[f32] {
        let len = self.ksub * self.dsub;
        &self.codebooks[j * len..(j + 1) * len]
    }

    /// Encode one vector into `m` codes.
    pub fn encode(&self, v: &[f32]) -> Result<Vec<u8>> {
        self.check_dim(v)?;
        let mut codes = Vec::with_capacity(self.m);
        self.encode_into(v, &mut codes);
        Ok(codes)
    }

    /// Append the codes of `v` to `out`. `v` must have the quantizer dimension.
    pub(crate) fn encode_into(&self, v: &[f32], out: &mut Vec<u8>) {
        for j in 0..self.m {
            let sub = &v[j * self.dsub..(j + 1) * self.dsub];
            let (code, _) = nearest(self.codebook(j), self.dsub, sub);
            out.push(code as u8);
        }
    }

    /// Approximate vector for `codes`.
    pub fn decode(&self, codes: &[u8]) -> Result<Vec<f32>> {
        if codes.len() != self.m {
            return Err(RagError::index(format!(
                "expected {} codes, got {}",
                self.m,
                codes.len()
            )));
        }
        let mut out = Vec::with_capacity(self.dim);
        for (j, &code) in codes.iter().enumerate() {
            let code = code as usize;
            if code >= self.ksub {
                return Err(RagError::corrupt(format!(
                    "code {code} out of range for {} codewords",
                    self.ksub
                )));
            }
            let book = self.codebook(j);
            out.extend_from_slice(&book[code * self.dsub..(code + 1) * self.dsub]);
        }
        Ok(out)
    }

    /// Squared distances from each sub-vector of `query` to every codeword,
    /// laid out as `m * ksub` floats.
    pub fn distance_table(&self, query: &[f32]) -> Result<Vec<f32>> {
        self.check_dim(query)?;
        let mut table = Vec::with_capacity(self.m * self.ksub);
        for j in 0..self.m {
            let sub = &query[j * self.dsub..(j + 1) * self.dsub];
            table.extend(
                self.codebook(j)
                    .chunks_exact(self.dsub)
                    .map(|c| l2_squared(sub, c)),
            );
        }
        Ok(table)
    }

    /// Approximate squared distance of an encoded vector using a table from
    /// [`Self::distance_table`].
    #[inline]
    pub fn adc(&self, table: &[f32], codes: &[u8]) -> f32 {
        codes
            .iter()
            .enumerate()
            .map(|(j, &c)| table[j * self.ksub + c as usize])
            .sum()
    }

    /// Check codes loaded from disk against the codebook size.
    pub(crate) fn validate_codes(&self, codes: &[u8]) -> Result<()> {
        if codes.len() % self.m != 0 {
            return Err(RagError::corrupt("code block is not a whole number of vectors"));
        }
        if let Some(bad) = codes.iter().find(|c| **c as usize >= self.ksub) {
            return Err(RagError::corrupt(format!(
                "code {bad} out of range for {} codewords",
                self.ksub
            )));
        }
        Ok(())
    }

    fn check_dim(&self, v: &[f32]) -> Result<()> {
        if v.len() != self.dim {
            return Err(RagError::invalid_operation(format!(
                "Vector dimension mismatch: expected {}, got {}",
                self.dim,
                v.len()
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(n: usize, dim: usize) -> Vec<f32> {
        (0..n * dim)
            .map(|i| ((i as f32) * 0.618).sin() * ((i / dim) as f32 * 0.1).cos())
            .collect()
    }

    #[test]
    fn test_train_encode_decode() {
        let data = sample(300, 8);
        let pq = ProductQuantizer::train(&data, 8, 4, 4, 10, 3).unwrap();
        assert_eq!(pq.code_len(), 4);
        assert_eq!(pq.ksub(), 16);

        let v = &data[0..8];
        let codes = pq.encode(v).unwrap();
        let approx = pq.decode(&codes).unwrap();
        assert_eq!(approx.len(), 8);
        assert!(l2_squared(v, &approx) < l2_squared(v, &vec![0.0; 8]));
    }

    #[test]
    fn test_adc_matches_decoded_distance() {
        let data = sample(200, 8);
        let pq = ProductQuantizer::train(&data, 8, 2, 3, 10, 1).unwrap();
        let query = &data[16..24];
        let table = pq.distance_table(query).unwrap();
        let codes = pq.encode(&data[40..48]).unwrap();
        let decoded = pq.decode(&codes).unwrap();
        let adc = pq.adc(&table, &codes);
        assert!((adc - l2_squared(query, &decoded)).abs() < 1e-4);
    }

    #[test]
    fn test_small_sample_shrinks_codebook() {
        let data = sample(5, 4);
        let pq = ProductQuantizer::train(&data, 4, 2, 8, 5, 0).unwrap();
        assert_eq!(pq.ksub(), 5);
        assert!(pq.validate_codes(&[0, 4, 1, 2]).is_ok());
        assert!(pq.validate_codes(&[0, 5]).is_err());
    }

    #[test]
    fn test_rejects_indivisible_dimension() {
        let data = sample(10, 6);
        assert!(ProductQuantizer::train(&data, 6, 4, 8, 5, 0).is_err());
    }
}

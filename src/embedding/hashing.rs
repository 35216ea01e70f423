//! Deterministic local embedder based on signed feature hashing.

use async_trait::async_trait;
use rayon::prelude::*;
use unicode_segmentation::UnicodeSegmentation;

use crate::embedding::classifier::BIOMEDICAL_TERMS;
use crate::embedding::{EmbeddingStrategy, TextEmbedder};
use crate::error::{RagError, Result};
use crate::vector::Vector;

/// Batches at least this large are hashed on the rayon pool.
const PARALLEL_BATCH: usize = 64;

const BIGRAM_WEIGHT: f32 = 0.5;
const DOMAIN_TERM_WEIGHT: f32 = 2.0;

/// Feature-hashing embedder.
///
/// Word unigrams and bigrams are hashed into `dimension` buckets with a
/// seeded CRC-32, signed by a second hash bit, and the result is
/// L2-normalized. Texts sharing vocabulary land close together, identical
/// texts map to identical vectors, and no model files or network access are
/// needed. The biomedical variant uses its own seed and up-weights clinical
/// vocabulary.
#[derive(Debug, Clone)]
pub struct HashingEmbedder {
    strategy: EmbeddingStrategy,
    dimension: usize,
    seed: u32,
    name: String,
}

impl HashingEmbedder {
    /// Create an embedder with the default seed for `strategy`.
    pub fn new(strategy: EmbeddingStrategy, dimension: usize) -> Self {
        let seed = match strategy {
            EmbeddingStrategy::General => 0,
            EmbeddingStrategy::Biomedical => 0x5eed_b10,
        };
        Self::with_seed(strategy, dimension, seed)
    }

    pub fn with_seed(strategy: EmbeddingStrategy, dimension: usize, seed: u32) -> Self {
        Self {
            strategy,
            dimension,
            seed,
            name: format!("hashing-{strategy}-{seed:x}"),
        }
    }

    pub fn strategy(&self) -> EmbeddingStrategy {
        self.strategy
    }

    fn embed_sync(&self, text: &str) -> Vector {
        let mut data = vec![0.0f32; self.dimension];
        let lower = text.to_lowercase();
        let words: Vec<&str> = lower.unicode_words().collect();

        for word in &words {
            let weight = if self.strategy == EmbeddingStrategy::Biomedical
                && BIOMEDICAL_TERMS.contains(word)
            {
                DOMAIN_TERM_WEIGHT
            } else {
                1.0
            };
            self.accumulate(&mut data, word.as_bytes(), weight);
        }
        for pair in words.windows(2) {
            let bigram = format!("{} {}", pair[0], pair[1]);
            self.accumulate(&mut data, bigram.as_bytes(), BIGRAM_WEIGHT);
        }

        Vector::new(data).normalized()
    }

    fn accumulate(&self, data: &mut [f32], feature: &[u8], weight: f32) {
        let mut hasher = crc32fast::Hasher::new_with_initial(self.seed);
        hasher.update(feature);
        let hash = hasher.finalize();
        let bucket = (hash as usize) % self.dimension;
        let sign = if hash & 0x8000_0000 == 0 { 1.0 } else { -1.0 };
        data[bucket] += sign * weight;
    }
}

#[async_trait]
impl TextEmbedder for HashingEmbedder {
    async fn embed(&self, text: &str) -> Result<Vector> {
        if self.dimension == 0 {
            return Err(RagError::embedding("hashing embedder has zero dimension"));
        }
        Ok(self.embed_sync(text))
    }

    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vector>> {
        if self.dimension == 0 {
            return Err(RagError::embedding("hashing embedder has zero dimension"));
        }
        if texts.len() >= PARALLEL_BATCH {
            Ok(texts.par_iter().map(|t| self.embed_sync(t)).collect())
        } else {
            Ok(texts.iter().map(|t| self.embed_sync(t)).collect())
        }
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vector::{dot, l2_squared};

    #[tokio::test]
    async fn test_deterministic_and_normalized() {
        let embedder = HashingEmbedder::new(EmbeddingStrategy::General, 64);
        let a = embedder.embed("Net revenue increased in fiscal 2024").await.unwrap();
        let b = embedder.embed("Net revenue increased in fiscal 2024").await.unwrap();
        assert_eq!(a, b);
        assert!((a.norm() - 1.0).abs() < 1e-5);
    }

    #[tokio::test]
    async fn test_shared_vocabulary_is_closer() {
        let embedder = HashingEmbedder::new(EmbeddingStrategy::General, 256);
        let q = embedder.embed("liquidity and capital resources").await.unwrap();
        let near = embedder
            .embed("our liquidity and capital resources remain strong")
            .await
            .unwrap();
        let far = embedder.embed("the trial enrolled 300 subjects").await.unwrap();
        assert!(dot(&q.data, &near.data) > dot(&q.data, &far.data));
        assert!(l2_squared(&q.data, &near.data) < l2_squared(&q.data, &far.data));
    }

    #[tokio::test]
    async fn test_batch_matches_single_and_keeps_order() {
        let embedder = HashingEmbedder::new(EmbeddingStrategy::Biomedical, 32);
        let texts: Vec<String> = (0..100).map(|i| format!("dose cohort {i}")).collect();
        let refs: Vec<&str> = texts.iter().map(String::as_str).collect();
        let batch = embedder.embed_batch(&refs).await.unwrap();
        assert_eq!(batch.len(), 100);
        assert_eq!(batch[42], embedder.embed("dose cohort 42").await.unwrap());
    }

    #[tokio::test]
    async fn test_empty_text_is_zero_vector() {
        let embedder = HashingEmbedder::new(EmbeddingStrategy::General, 16);
        let v = embedder.embed("   ").await.unwrap();
        assert!(v.data.iter().all(|x| *x == 0.0));
    }
}

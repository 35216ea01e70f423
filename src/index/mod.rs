//! Compressed vector index, metadata store and their persistence.
//!
//! The build path is:
//!
//! 1. [`IndexBuilder`] reads filings, chunks them and embeds the chunks.
//! 2. Each vector goes into [`IvfPqIndex`], which returns its internal id,
//!    and the chunk goes into [`MetadataStore`] under the same id.
//! 3. [`IndexArtifact`] writes both halves as a pair of files that carry the
//!    same artifact id and id-range checksum.
//!
//! [`BuildCheckpoint`] records processed filings so an interrupted build can
//! resume.

pub mod artifact;
pub mod builder;
pub mod checkpoint;
pub mod ivf_pq;
pub mod kmeans;
pub mod metadata;
pub mod quantization;

pub use artifact::{ArtifactReport, IndexArtifact};
pub use builder::{BuildSummary, IndexBuilder};
pub use checkpoint::BuildCheckpoint;
pub use ivf_pq::{IndexStats, IvfPqIndex, Neighbor};
pub use kmeans::{KMeansConfig, kmeans};
pub use metadata::{MetadataFilter, MetadataStore, ResolvedFilter};
pub use quantization::ProductQuantizer;

use serde::{Deserialize, Serialize};

use crate::error::{RagError, Result};

/// Configuration of the index and its build pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
    /// Vector dimension.
    pub dimension: usize,
    /// Number of coarse inverted lists.
    pub n_lists: usize,
    /// Number of product-quantizer sub-vectors (code bytes per vector).
    pub pq_subvectors: usize,
    /// Bits per sub-vector code.
    pub pq_bits: u8,
    /// Buffered vectors needed before the index trains.
    pub training_threshold: usize,
    /// Cap on the sample used for k-means.
    pub max_training_samples: usize,
    pub kmeans_iterations: usize,
    pub seed: u64,
    /// Filings between checkpoint saves during a build.
    pub checkpoint_every: usize,
    /// Bound of the chunked-filing channel between readers and the embedder.
    pub channel_capacity: usize,
    /// Filing reader tasks. 0 uses the number of CPUs.
    pub workers: usize,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            dimension: 384,
            n_lists: 1000,
            pq_subvectors: 48,
            pq_bits: 8,
            training_threshold: 40_000,
            max_training_samples: 100_000,
            kmeans_iterations: 20,
            seed: 42,
            checkpoint_every: 50,
            channel_capacity: 16,
            workers: 0,
        }
    }
}

impl IndexConfig {
    pub fn validate(&self) -> Result<()> {
        if self.dimension == 0 {
            return Err(RagError::invalid_config("index dimension must be positive"));
        }
        if self.pq_subvectors == 0 || self.dimension % self.pq_subvectors != 0 {
            return Err(RagError::invalid_config(format!(
                "dimension {} is not divisible by pq_subvectors {}",
                self.dimension, self.pq_subvectors
            )));
        }
        if !(1..=8).contains(&self.pq_bits) {
            return Err(RagError::invalid_config(format!(
                "pq_bits must be within 1..=8, got {}",
                self.pq_bits
            )));
        }
        if self.n_lists == 0 {
            return Err(RagError::invalid_config("n_lists must be positive"));
        }
        if self.training_threshold == 0 || self.max_training_samples == 0 {
            return Err(RagError::invalid_config(
                "training_threshold and max_training_samples must be positive",
            ));
        }
        if self.checkpoint_every == 0 || self.channel_capacity == 0 {
            return Err(RagError::invalid_config(
                "checkpoint_every and channel_capacity must be positive",
            ));
        }
        Ok(())
    }

    /// Effective number of filing reader tasks.
    pub fn worker_count(&self) -> usize {
        if self.workers == 0 {
            num_cpus::get().max(1)
        } else {
            self.workers
        }
    }
}

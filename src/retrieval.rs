//! Query-time retrieval over a loaded index artifact.
//!
//! A [`RetrievalEngine`] is an explicitly constructed service object. It
//! starts empty, is given an artifact with [`RetrievalEngine::load`] or
//! [`RetrievalEngine::install`], and answers searches until it is unloaded.
//! Installing a new artifact swaps it in atomically; searches already in
//! flight keep the artifact they started with.
//!
//! Results reference text by offsets. The span is read from the filing
//! store only when [`SearchResult::text`] is called.

pub mod engine;
pub mod resolver;
pub mod result;

use serde::{Deserialize, Serialize};

use crate::error::{RagError, Result};

pub use engine::{EngineStats, RetrievalEngine, SearchRequest};
pub use resolver::{StaticTickerResolver, TICKERS_FILE, TickerResolver};
pub use result::{FilterOutcome, SearchResult, SearchResults};

/// Query-time knobs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    /// `k` used when a request does not set one.
    pub default_k: usize,
    /// Inverted lists probed per query.
    pub n_probe: usize,
    /// A company with at most this many chunks is searched by scoring each
    /// of its chunks directly. Larger companies go through list probing with
    /// a metadata predicate.
    pub partition_scan_max_chunks: usize,
    /// Upper bound on `k`.
    pub max_k: usize,
    /// Bytes loaded on each side of a hit by `context_window`.
    pub context_window_bytes: u64,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            default_k: 10,
            n_probe: 8,
            partition_scan_max_chunks: 2048,
            max_k: 100,
            context_window_bytes: 1000,
        }
    }
}

impl RetrievalConfig {
    pub fn validate(&self) -> Result<()> {
        if self.default_k == 0 || self.max_k == 0 {
            return Err(RagError::invalid_config("k limits must be positive"));
        }
        if self.default_k > self.max_k {
            return Err(RagError::invalid_config(format!(
                "default_k {} exceeds max_k {}",
                self.default_k, self.max_k
            )));
        }
        if self.n_probe == 0 {
            return Err(RagError::invalid_config("n_probe must be positive"));
        }
        Ok(())
    }
}

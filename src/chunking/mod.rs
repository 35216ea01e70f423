//! Structure-aware chunking of filing text.
//!
//! A filing is first split into sections (caller-supplied boundaries, or
//! detected SEC headers), then each section is cut into overlapping spans of
//! roughly `target_chars` bytes. Split points prefer paragraph breaks, then
//! sentence boundaries, and never fall inside a clinical-trial or
//! financial-statement table that fits in one chunk.
//!
//! Chunks carry offsets only. Chunking the same text twice with the same
//! configuration yields identical offsets, which keeps re-indexing idempotent.

mod chunker;
mod sections;

pub use chunker::{ChunkIter, Chunker};
pub use sections::{Section, TableBlock, TableKind, detect_sections, detect_table_blocks};

use serde::{Deserialize, Serialize};

use crate::error::{RagError, Result};

/// Configuration for the chunker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkerConfig {
    /// Target chunk size in tokens.
    pub target_tokens: usize,
    /// Approximate bytes per token used to turn the token budget into bytes.
    pub chars_per_token: usize,
    /// Fraction of the budget repeated at the start of the next chunk.
    pub overlap_fraction: f32,
    /// Sections whose trimmed text is shorter than this are skipped.
    pub min_section_chars: usize,
    /// Minimum number of consecutive tabular lines that form a table block.
    pub min_table_rows: usize,
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            target_tokens: 512,
            chars_per_token: 4,
            overlap_fraction: 0.1,
            min_section_chars: 100,
            min_table_rows: 3,
        }
    }
}

impl ChunkerConfig {
    /// Chunk budget in bytes.
    pub fn target_chars(&self) -> usize {
        self.target_tokens * self.chars_per_token
    }

    /// Overlap between consecutive chunks in bytes.
    pub fn overlap_chars(&self) -> usize {
        (self.target_chars() as f32 * self.overlap_fraction) as usize
    }

    pub fn validate(&self) -> Result<()> {
        if self.target_chars() < 16 {
            return Err(RagError::invalid_config(
                "chunk budget must be at least 16 bytes",
            ));
        }
        if !(0.0..=0.5).contains(&self.overlap_fraction) {
            return Err(RagError::invalid_config(format!(
                "overlap_fraction must be within [0, 0.5], got {}",
                self.overlap_fraction
            )));
        }
        if self.min_table_rows == 0 {
            return Err(RagError::invalid_config("min_table_rows must be positive"));
        }
        Ok(())
    }
}

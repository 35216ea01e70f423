//! # filingscope
//!
//! Retrieval over a large corpus of SEC filings, and a bounded research agent
//! built on top of it.
//!
//! ## Features
//!
//! - Structure-aware chunking that stores offsets, never text
//! - General and biomedical embedding strategies behind one trait
//! - IVF-PQ vector index with deferred training and resumable builds
//! - Paired artifact files with id-range and checksum verification
//! - Filtered search with lazily loaded, gzip-aware text spans
//! - An explicit `Init → Iterating → Concluded` research loop

pub mod agent;
pub mod chunking;
pub mod cli;
pub mod config;
pub mod embedding;
pub mod error;
pub mod filing;
pub mod index;
pub mod retrieval;
pub mod storage;
pub mod vector;

pub mod prelude {
    pub use crate::agent::{AgentConfig, CatalystContext, Collaborators, ResearchAgent};
    pub use crate::chunking::{Chunker, ChunkerConfig};
    pub use crate::config::RagConfig;
    pub use crate::embedding::{EmbedderSet, EmbeddingProfile, EmbeddingStrategy, TextEmbedder};
    pub use crate::error::{RagError, Result};
    pub use crate::filing::{Chunk, FilingRecord};
    pub use crate::index::{IndexArtifact, IndexBuilder, IndexConfig};
    pub use crate::retrieval::{RetrievalEngine, SearchRequest, SearchResults};
    pub use crate::storage::{FileFilingStore, FilingTextStore};
}

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

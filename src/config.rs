//! Crate-wide configuration.
//!
//! A [`RagConfig`] groups the settings of every component and is read from a
//! JSON file. Every field has a default, so a file only needs the values it
//! changes:
//!
//! ```
//! use filingscope::config::RagConfig;
//!
//! let config: RagConfig = serde_json::from_str(r#"{"index": {"n_lists": 256}}"#).unwrap();
//! assert_eq!(config.index.n_lists, 256);
//! assert_eq!(config.index.dimension, 384);
//! config.validate().unwrap();
//! ```

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::agent::AgentConfig;
use crate::chunking::ChunkerConfig;
use crate::embedding::EmbeddingConfig;
use crate::error::{RagError, Result};
use crate::index::IndexConfig;
use crate::retrieval::RetrievalConfig;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RagConfig {
    pub chunker: ChunkerConfig,
    pub embedding: EmbeddingConfig,
    pub index: IndexConfig,
    pub retrieval: RetrievalConfig,
    pub agent: AgentConfig,
}

impl RagConfig {
    /// Read a JSON configuration file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = fs::read_to_string(path.as_ref())?;
        let config: RagConfig = serde_json::from_str(&text).map_err(|e| {
            RagError::invalid_config(format!("{}: {e}", path.as_ref().display()))
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        fs::write(path, serde_json::to_vec_pretty(self)?)?;
        Ok(())
    }

    /// Check each section and the constraints between them.
    pub fn validate(&self) -> Result<()> {
        self.chunker.validate()?;
        self.embedding.validate()?;
        self.index.validate()?;
        self.retrieval.validate()?;
        self.agent.validate()?;
        if self.embedding.dimension != self.index.dimension {
            return Err(RagError::invalid_config(format!(
                "embedding dimension {} does not match index dimension {}",
                self.embedding.dimension, self.index.dimension
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = RagConfig::default();
        config.validate().unwrap();
        assert_eq!(config.chunker.target_chars(), 2048);
        assert_eq!(config.index.training_threshold, 40_000);
        assert_eq!(config.agent.max_rounds, 10);
    }

    #[test]
    fn test_file_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        let mut config = RagConfig::default();
        config.retrieval.n_probe = 16;
        config.to_file(&path).unwrap();
        assert_eq!(RagConfig::from_file(&path).unwrap(), config);
    }

    #[test]
    fn test_rejects_inconsistent_values() {
        let mut config = RagConfig::default();
        config.index.pq_subvectors = 7;
        assert!(config.validate().is_err());

        let mut config = RagConfig::default();
        config.embedding.dimension = 768;
        assert!(config.validate().is_err());

        let mut config = RagConfig::default();
        config.chunker.overlap_fraction = 0.8;
        assert!(config.validate().is_err());

        let mut config = RagConfig::default();
        config.agent.max_rounds = 0;
        assert!(config.validate().is_err());
    }
}

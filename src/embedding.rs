//! Text embedding for filing chunks and queries.
//!
//! Two strategies share the index metric space: a general-purpose model for
//! business prose and a biomedical model for clinical and scientific text.
//! An index is built under one [`EmbeddingProfile`], recorded in its
//! artifact, and queries are always encoded through the same profile.
//!
//! Backends implement [`TextEmbedder`]. The crate ships a deterministic local
//! [`HashingEmbedder`] and, behind the `embeddings-openai` feature, an
//! HTTP backend for OpenAI-compatible embedding endpoints.
//!
//! # Examples
//!
//! ```
//! use std::sync::Arc;
//!
//! use filingscope::embedding::{
//!     EmbedderSet, EmbeddingProfile, EmbeddingStrategy, HashingEmbedder,
//! };
//!
//! # tokio_test::block_on(async {
//! let set = EmbedderSet::new()
//!     .with_general(Arc::new(HashingEmbedder::new(EmbeddingStrategy::General, 64)))
//!     .with_biomedical(Arc::new(HashingEmbedder::new(EmbeddingStrategy::Biomedical, 64)));
//! let embedder = set.resolve(EmbeddingProfile::Hybrid, 32).unwrap();
//! let (strategy, vector) = embedder.embed_query("placebo controlled phase 3 trial").await.unwrap();
//! assert_eq!(vector.dimension(), 64);
//! # let _ = strategy;
//! # });
//! ```

pub mod classifier;
pub mod hashing;
#[cfg(feature = "embeddings-openai")]
pub mod openai_embedder;
pub mod resolved;
pub mod text_embedder;

pub use classifier::ContentClassifier;
pub use hashing::HashingEmbedder;
#[cfg(feature = "embeddings-openai")]
pub use openai_embedder::OpenAiEmbedder;
pub use resolved::{EmbedderSet, ModelFingerprint, ResolvedEmbedder};
pub use text_embedder::TextEmbedder;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{RagError, Result};

/// Embedding strategy used for a single text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingStrategy {
    General,
    Biomedical,
}

impl EmbeddingStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            EmbeddingStrategy::General => "general",
            EmbeddingStrategy::Biomedical => "biomedical",
        }
    }

    /// Compact tag stored per chunk in the metadata store.
    pub(crate) fn to_tag(self) -> u8 {
        match self {
            EmbeddingStrategy::General => 0,
            EmbeddingStrategy::Biomedical => 1,
        }
    }

    pub(crate) fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(EmbeddingStrategy::General),
            1 => Some(EmbeddingStrategy::Biomedical),
            _ => None,
        }
    }
}

impl fmt::Display for EmbeddingStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Strategy selection for a whole index.
///
/// `General` and `Biomedical` make the index strategy-homogeneous. `Hybrid`
/// routes every chunk and query through [`ContentClassifier`]; both backends
/// must then produce vectors of the same dimension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingProfile {
    #[default]
    General,
    Biomedical,
    Hybrid,
}

impl EmbeddingProfile {
    /// Strategies this profile needs a backend for.
    pub fn required_strategies(&self) -> &'static [EmbeddingStrategy] {
        match self {
            EmbeddingProfile::General => &[EmbeddingStrategy::General],
            EmbeddingProfile::Biomedical => &[EmbeddingStrategy::Biomedical],
            EmbeddingProfile::Hybrid => {
                &[EmbeddingStrategy::General, EmbeddingStrategy::Biomedical]
            }
        }
    }
}

impl fmt::Display for EmbeddingProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EmbeddingProfile::General => "general",
            EmbeddingProfile::Biomedical => "biomedical",
            EmbeddingProfile::Hybrid => "hybrid",
        };
        f.write_str(name)
    }
}

impl FromStr for EmbeddingProfile {
    type Err = RagError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "general" => Ok(EmbeddingProfile::General),
            "biomedical" => Ok(EmbeddingProfile::Biomedical),
            "hybrid" => Ok(EmbeddingProfile::Hybrid),
            other => Err(RagError::invalid_argument(format!(
                "unknown embedding profile '{other}' (expected general, biomedical or hybrid)"
            ))),
        }
    }
}

/// How to construct the backend for one strategy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "backend", rename_all = "snake_case")]
pub enum ModelSpec {
    /// Deterministic local feature-hashing model.
    Hashing { seed: u32 },
    /// OpenAI-compatible HTTP endpoint.
    OpenAi {
        model: String,
        #[serde(default = "default_base_url")]
        base_url: String,
        #[serde(default = "default_api_key_env")]
        api_key_env: String,
    },
    /// No backend. Resolving a profile that needs it fails.
    Disabled,
}

fn default_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}

impl ModelSpec {
    /// Look up a named preset.
    ///
    /// Presets name the sentence-transformer checkpoints the corpus was
    /// originally embedded with and are served from an OpenAI-compatible
    /// endpoint. `local` is the hashing model.
    pub fn preset(name: &str) -> Option<ModelSpec> {
        let model = match name {
            "general-fast" => "sentence-transformers/all-MiniLM-L6-v2",
            "general-best" => "sentence-transformers/all-mpnet-base-v2",
            "biomedical" => "pritamdeka/S-PubMedBert-MS-MARCO",
            "retrieval-optimized" => "BAAI/bge-small-en-v1.5",
            "local" => return Some(ModelSpec::Hashing { seed: 0 }),
            _ => return None,
        };
        Some(ModelSpec::OpenAi {
            model: model.to_string(),
            base_url: default_base_url(),
            api_key_env: default_api_key_env(),
        })
    }
}

/// Configuration for the embedding layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub profile: EmbeddingProfile,
    /// Output dimension of every backend.
    pub dimension: usize,
    /// Texts per backend call.
    pub batch_size: usize,
    pub general: ModelSpec,
    pub biomedical: ModelSpec,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            profile: EmbeddingProfile::General,
            dimension: 384,
            batch_size: 32,
            general: ModelSpec::Hashing { seed: 0 },
            biomedical: ModelSpec::Hashing { seed: 0x5eed_b10 },
        }
    }
}

impl EmbeddingConfig {
    pub fn validate(&self) -> Result<()> {
        if self.dimension == 0 {
            return Err(RagError::invalid_config("embedding dimension must be positive"));
        }
        if self.batch_size == 0 {
            return Err(RagError::invalid_config("embedding batch_size must be positive"));
        }
        Ok(())
    }

    /// Build the embedder set described by this configuration.
    ///
    /// A strategy whose backend cannot be constructed is left empty; the
    /// failure surfaces as `ModelUnavailable` when a profile needing it is
    /// resolved.
    pub fn build_set(&self) -> EmbedderSet {
        let mut set = EmbedderSet::new();
        for strategy in [EmbeddingStrategy::General, EmbeddingStrategy::Biomedical] {
            let spec = match strategy {
                EmbeddingStrategy::General => &self.general,
                EmbeddingStrategy::Biomedical => &self.biomedical,
            };
            match build_backend(strategy, spec, self.dimension) {
                Ok(backend) => set.insert(strategy, backend),
                Err(e) => {
                    log::debug!("{strategy} embedding backend not available: {e}");
                    set.mark_unavailable(strategy, e.to_string());
                }
            }
        }
        set
    }
}

fn build_backend(
    strategy: EmbeddingStrategy,
    spec: &ModelSpec,
    dimension: usize,
) -> Result<std::sync::Arc<dyn TextEmbedder>> {
    match spec {
        ModelSpec::Hashing { seed } => Ok(std::sync::Arc::new(
            HashingEmbedder::with_seed(strategy, dimension, *seed),
        )),
        ModelSpec::Disabled => Err(RagError::model_unavailable(strategy, "backend disabled")),
        #[cfg(feature = "embeddings-openai")]
        ModelSpec::OpenAi {
            model,
            base_url,
            api_key_env,
        } => {
            let api_key = std::env::var(api_key_env).map_err(|_| {
                RagError::model_unavailable(strategy, format!("{api_key_env} is not set"))
            })?;
            Ok(std::sync::Arc::new(OpenAiEmbedder::new(
                strategy,
                base_url.clone(),
                api_key,
                model.clone(),
                dimension,
            )?))
        }
        #[cfg(not(feature = "embeddings-openai"))]
        ModelSpec::OpenAi { model, .. } => Err(RagError::model_unavailable(
            strategy,
            format!("model '{model}' needs the embeddings-openai feature"),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_profile_parsing() {
        assert_eq!("Hybrid".parse::<EmbeddingProfile>().unwrap(), EmbeddingProfile::Hybrid);
        assert!("sparse".parse::<EmbeddingProfile>().is_err());
        assert_eq!(EmbeddingProfile::Biomedical.to_string(), "biomedical");
    }

    #[test]
    fn test_strategy_tags() {
        for strategy in [EmbeddingStrategy::General, EmbeddingStrategy::Biomedical] {
            assert_eq!(EmbeddingStrategy::from_tag(strategy.to_tag()), Some(strategy));
        }
        assert_eq!(EmbeddingStrategy::from_tag(9), None);
    }

    #[test]
    fn test_presets() {
        match ModelSpec::preset("biomedical") {
            Some(ModelSpec::OpenAi { model, .. }) => {
                assert_eq!(model, "pritamdeka/S-PubMedBert-MS-MARCO")
            }
            other => panic!("unexpected preset {other:?}"),
        }
        assert_eq!(ModelSpec::preset("local"), Some(ModelSpec::Hashing { seed: 0 }));
        assert!(ModelSpec::preset("unknown").is_none());
    }

    #[test]
    fn test_disabled_backend_is_unavailable() {
        let config = EmbeddingConfig {
            profile: EmbeddingProfile::Biomedical,
            biomedical: ModelSpec::Disabled,
            ..Default::default()
        };
        let set = config.build_set();
        match set.resolve(EmbeddingProfile::Biomedical, 8) {
            Err(RagError::ModelUnavailable { strategy, .. }) => {
                assert_eq!(strategy, EmbeddingStrategy::Biomedical)
            }
            other => panic!("expected ModelUnavailable, got {:?}", other.err()),
        }
        assert!(set.resolve(EmbeddingProfile::General, 8).is_ok());
    }
}

//! Profile resolution: turning configured backends into the embedder an
//! index is built and queried with.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::embedding::{ContentClassifier, EmbeddingProfile, EmbeddingStrategy, TextEmbedder};
use crate::error::{RagError, Result};
use crate::vector::Vector;

/// The backends available to this process, keyed by strategy.
#[derive(Clone, Default)]
pub struct EmbedderSet {
    general: Option<Arc<dyn TextEmbedder>>,
    biomedical: Option<Arc<dyn TextEmbedder>>,
    unavailable: HashMap<EmbeddingStrategy, String>,
}

impl std::fmt::Debug for EmbedderSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmbedderSet")
            .field("general", &self.general.as_ref().map(|e| e.name().to_string()))
            .field(
                "biomedical",
                &self.biomedical.as_ref().map(|e| e.name().to_string()),
            )
            .field("unavailable", &self.unavailable)
            .finish()
    }
}

impl EmbedderSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_general(mut self, embedder: Arc<dyn TextEmbedder>) -> Self {
        self.insert(EmbeddingStrategy::General, embedder);
        self
    }

    pub fn with_biomedical(mut self, embedder: Arc<dyn TextEmbedder>) -> Self {
        self.insert(EmbeddingStrategy::Biomedical, embedder);
        self
    }

    pub fn insert(&mut self, strategy: EmbeddingStrategy, embedder: Arc<dyn TextEmbedder>) {
        self.unavailable.remove(&strategy);
        match strategy {
            EmbeddingStrategy::General => self.general = Some(embedder),
            EmbeddingStrategy::Biomedical => self.biomedical = Some(embedder),
        }
    }

    /// Record why a strategy has no backend.
    pub fn mark_unavailable(&mut self, strategy: EmbeddingStrategy, reason: String) {
        self.unavailable.insert(strategy, reason);
    }

    fn backend(&self, strategy: EmbeddingStrategy) -> Result<Arc<dyn TextEmbedder>> {
        let backend = match strategy {
            EmbeddingStrategy::General => self.general.as_ref(),
            EmbeddingStrategy::Biomedical => self.biomedical.as_ref(),
        };
        backend.cloned().ok_or_else(|| {
            let reason = self
                .unavailable
                .get(&strategy)
                .cloned()
                .unwrap_or_else(|| "no backend configured".to_string());
            RagError::model_unavailable(strategy, reason)
        })
    }

    /// Resolve `profile` into an embedder, once, at build or load time.
    ///
    /// Fails with `ModelUnavailable` when a backend the profile needs is
    /// missing. There is no fallback to another strategy.
    pub fn resolve(&self, profile: EmbeddingProfile, batch_size: usize) -> Result<ResolvedEmbedder> {
        let general = if profile.required_strategies().contains(&EmbeddingStrategy::General) {
            Some(self.backend(EmbeddingStrategy::General)?)
        } else {
            None
        };
        let biomedical = if profile
            .required_strategies()
            .contains(&EmbeddingStrategy::Biomedical)
        {
            Some(self.backend(EmbeddingStrategy::Biomedical)?)
        } else {
            None
        };

        if let (Some(g), Some(b)) = (&general, &biomedical) {
            if g.dimension() != b.dimension() {
                return Err(RagError::embedding(format!(
                    "hybrid profile needs equal dimensions, got general={} biomedical={}",
                    g.dimension(),
                    b.dimension()
                )));
            }
        }

        Ok(ResolvedEmbedder {
            profile,
            general,
            biomedical,
            classifier: ContentClassifier::default(),
            batch_size: batch_size.max(1),
        })
    }
}

/// Identity of the model behind each strategy of an index.
///
/// Recorded in every artifact and compared when it is served or resumed, so
/// vectors from one model are never queried with another.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelFingerprint {
    pub general: Option<String>,
    pub biomedical: Option<String>,
}

impl ModelFingerprint {
    pub fn get(&self, strategy: EmbeddingStrategy) -> Option<&str> {
        match strategy {
            EmbeddingStrategy::General => self.general.as_deref(),
            EmbeddingStrategy::Biomedical => self.biomedical.as_deref(),
        }
    }

    /// Fails with `ModelUnavailable` for the first strategy whose model in
    /// `available` differs from the recorded one.
    pub fn ensure_matches(&self, available: &ModelFingerprint) -> Result<()> {
        for strategy in [EmbeddingStrategy::General, EmbeddingStrategy::Biomedical] {
            let recorded = self.get(strategy);
            let found = available.get(strategy);
            if recorded != found {
                return Err(RagError::model_unavailable(
                    strategy,
                    format!(
                        "index was embedded with {} but the configured backend is {}",
                        recorded.unwrap_or("no model"),
                        found.unwrap_or("no model")
                    ),
                ));
            }
        }
        Ok(())
    }
}

impl fmt::Display for ModelFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.general, &self.biomedical) {
            (Some(g), Some(b)) => write!(f, "general={g}, biomedical={b}"),
            (Some(g), None) => write!(f, "general={g}"),
            (None, Some(b)) => write!(f, "biomedical={b}"),
            (None, None) => f.write_str("none"),
        }
    }
}

fn fingerprint_of(backend: &Option<Arc<dyn TextEmbedder>>) -> Option<String> {
    backend
        .as_ref()
        .map(|e| format!("{}@{}", e.name(), e.dimension()))
}

/// An embedder bound to one index profile.
#[derive(Clone)]
pub struct ResolvedEmbedder {
    profile: EmbeddingProfile,
    general: Option<Arc<dyn TextEmbedder>>,
    biomedical: Option<Arc<dyn TextEmbedder>>,
    classifier: ContentClassifier,
    batch_size: usize,
}

impl std::fmt::Debug for ResolvedEmbedder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolvedEmbedder")
            .field("profile", &self.profile)
            .field("batch_size", &self.batch_size)
            .finish()
    }
}

impl ResolvedEmbedder {
    pub fn profile(&self) -> EmbeddingProfile {
        self.profile
    }

    pub fn dimension(&self) -> usize {
        self.general
            .as_ref()
            .or(self.biomedical.as_ref())
            .map(|e| e.dimension())
            .unwrap_or(0)
    }

    /// The models this embedder routes to.
    pub fn fingerprint(&self) -> ModelFingerprint {
        ModelFingerprint {
            general: fingerprint_of(&self.general),
            biomedical: fingerprint_of(&self.biomedical),
        }
    }

    /// Strategy used for `text` under this profile.
    pub fn strategy_for(&self, text: &str) -> EmbeddingStrategy {
        match self.profile {
            EmbeddingProfile::General => EmbeddingStrategy::General,
            EmbeddingProfile::Biomedical => EmbeddingStrategy::Biomedical,
            EmbeddingProfile::Hybrid => self.classifier.classify(text),
        }
    }

    fn backend(&self, strategy: EmbeddingStrategy) -> Result<&Arc<dyn TextEmbedder>> {
        let backend = match strategy {
            EmbeddingStrategy::General => self.general.as_ref(),
            EmbeddingStrategy::Biomedical => self.biomedical.as_ref(),
        };
        backend.ok_or_else(|| {
            RagError::model_unavailable(strategy, format!("not part of the {} profile", self.profile))
        })
    }

    /// Embed `texts`, returning one `(strategy, unit vector)` per input in
    /// input order.
    pub async fn embed_texts(&self, texts: &[&str]) -> Result<Vec<(EmbeddingStrategy, Vector)>> {
        let strategies: Vec<EmbeddingStrategy> =
            texts.iter().map(|t| self.strategy_for(t)).collect();
        let mut out: Vec<Option<Vector>> = vec![None; texts.len()];

        for strategy in [EmbeddingStrategy::General, EmbeddingStrategy::Biomedical] {
            let positions: Vec<usize> = strategies
                .iter()
                .enumerate()
                .filter(|(_, s)| **s == strategy)
                .map(|(i, _)| i)
                .collect();
            if positions.is_empty() {
                continue;
            }
            let backend = self.backend(strategy)?;
            for batch in positions.chunks(self.batch_size) {
                let inputs: Vec<&str> = batch.iter().map(|&i| texts[i]).collect();
                let vectors = backend.embed_batch(&inputs).await?;
                if vectors.len() != inputs.len() {
                    return Err(RagError::embedding(format!(
                        "{} returned {} vectors for {} inputs",
                        backend.name(),
                        vectors.len(),
                        inputs.len()
                    )));
                }
                for (&i, vector) in batch.iter().zip(vectors) {
                    vector.validate_dimension(backend.dimension())?;
                    out[i] = Some(vector.normalized());
                }
            }
        }

        strategies
            .into_iter()
            .zip(out)
            .map(|(s, v)| {
                v.map(|v| (s, v))
                    .ok_or_else(|| RagError::embedding("missing embedding for input"))
            })
            .collect()
    }

    /// Embed a query with the strategy this profile routes it to.
    pub async fn embed_query(&self, query: &str) -> Result<(EmbeddingStrategy, Vector)> {
        let strategy = self.strategy_for(query);
        let backend = self.backend(strategy)?;
        let vector = backend.embed(query).await?;
        vector.validate_dimension(backend.dimension())?;
        Ok((strategy, vector.normalized()))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use super::*;
    use crate::embedding::HashingEmbedder;

    struct CountingEmbedder {
        inner: HashingEmbedder,
        calls: AtomicUsize,
        max_batch: AtomicUsize,
    }

    #[async_trait]
    impl TextEmbedder for CountingEmbedder {
        async fn embed(&self, text: &str) -> Result<Vector> {
            self.inner.embed(text).await
        }

        async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vector>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.max_batch.fetch_max(texts.len(), Ordering::SeqCst);
            self.inner.embed_batch(texts).await
        }

        fn dimension(&self) -> usize {
            self.inner.dimension()
        }
    }

    fn hybrid_set() -> EmbedderSet {
        EmbedderSet::new()
            .with_general(Arc::new(HashingEmbedder::new(EmbeddingStrategy::General, 32)))
            .with_biomedical(Arc::new(HashingEmbedder::new(
                EmbeddingStrategy::Biomedical,
                32,
            )))
    }

    #[tokio::test]
    async fn test_hybrid_routes_and_preserves_order() {
        let embedder = hybrid_set().resolve(EmbeddingProfile::Hybrid, 2).unwrap();
        let texts = [
            "Revenue and operating expenses",
            "Randomized placebo controlled trial, primary endpoint met",
            "Goodwill impairment",
        ];
        let out = embedder.embed_texts(&texts).await.unwrap();
        let strategies: Vec<_> = out.iter().map(|(s, _)| *s).collect();
        assert_eq!(
            strategies,
            vec![
                EmbeddingStrategy::General,
                EmbeddingStrategy::Biomedical,
                EmbeddingStrategy::General
            ]
        );
        let (_, single) = embedder.embed_query(texts[1]).await.unwrap();
        assert_eq!(out[1].1, single);
    }

    #[tokio::test]
    async fn test_batch_size_bounds_backend_calls() {
        let counting = Arc::new(CountingEmbedder {
            inner: HashingEmbedder::new(EmbeddingStrategy::General, 16),
            calls: AtomicUsize::new(0),
            max_batch: AtomicUsize::new(0),
        });
        let set = EmbedderSet::new().with_general(counting.clone());
        let embedder = set.resolve(EmbeddingProfile::General, 4).unwrap();
        let texts: Vec<String> = (0..10).map(|i| format!("text {i}")).collect();
        let refs: Vec<&str> = texts.iter().map(String::as_str).collect();
        let out = embedder.embed_texts(&refs).await.unwrap();
        assert_eq!(out.len(), 10);
        assert_eq!(counting.calls.load(Ordering::SeqCst), 3);
        assert_eq!(counting.max_batch.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn test_missing_backend_is_model_unavailable() {
        let set = EmbedderSet::new()
            .with_general(Arc::new(HashingEmbedder::new(EmbeddingStrategy::General, 8)));
        assert!(matches!(
            set.resolve(EmbeddingProfile::Hybrid, 8),
            Err(RagError::ModelUnavailable {
                strategy: EmbeddingStrategy::Biomedical,
                ..
            })
        ));
    }

    #[test]
    fn test_fingerprint_tells_seeds_apart() {
        let seeded = |seed| {
            EmbedderSet::new()
                .with_general(Arc::new(HashingEmbedder::with_seed(
                    EmbeddingStrategy::General,
                    16,
                    seed,
                )))
                .resolve(EmbeddingProfile::General, 8)
                .unwrap()
                .fingerprint()
        };
        let built = seeded(0);
        assert_eq!(built.biomedical, None);
        assert!(built.ensure_matches(&seeded(0)).is_ok());
        assert!(matches!(
            built.ensure_matches(&seeded(7)),
            Err(RagError::ModelUnavailable {
                strategy: EmbeddingStrategy::General,
                ..
            })
        ));
    }

    #[test]
    fn test_hybrid_requires_equal_dimensions() {
        let set = EmbedderSet::new()
            .with_general(Arc::new(HashingEmbedder::new(EmbeddingStrategy::General, 8)))
            .with_biomedical(Arc::new(HashingEmbedder::new(
                EmbeddingStrategy::Biomedical,
                16,
            )));
        assert!(set.resolve(EmbeddingProfile::Hybrid, 8).is_err());
        assert!(set.resolve(EmbeddingProfile::Biomedical, 8).is_ok());
    }
}

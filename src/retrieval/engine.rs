//! The retrieval engine service object.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use log::{debug, info};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::embedding::{EmbedderSet, EmbeddingProfile, EmbeddingStrategy, ResolvedEmbedder};
use crate::error::{RagError, Result};
use crate::filing::{CompanyId, InternalId};
use crate::index::{IndexArtifact, IndexStats, MetadataFilter, Neighbor};
use crate::retrieval::{RetrievalConfig, SearchResult, SearchResults, TickerResolver};
use crate::storage::{FilingTextStore, decode_filing_text};
use crate::vector::Vector;

/// A search over the loaded index.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchRequest {
    pub query: String,
    pub company: Option<CompanyId>,
    /// Accepted filing types. Empty accepts every type.
    pub filing_types: Vec<String>,
    pub filed_after: Option<NaiveDate>,
    /// Number of hits wanted. `None` uses the engine default.
    pub k: Option<usize>,
}

impl SearchRequest {
    pub fn new<S: Into<String>>(query: S) -> Self {
        Self {
            query: query.into(),
            ..Self::default()
        }
    }

    pub fn company(mut self, company: CompanyId) -> Self {
        self.company = Some(company);
        self
    }

    pub fn filing_types<I, S>(mut self, types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.filing_types = types.into_iter().map(Into::into).collect();
        self
    }

    pub fn filed_after(mut self, date: NaiveDate) -> Self {
        self.filed_after = Some(date);
        self
    }

    pub fn k(mut self, k: usize) -> Self {
        self.k = Some(k);
        self
    }
}

/// Statistics of the loaded artifact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineStats {
    pub artifact_id: Uuid,
    pub profile: EmbeddingProfile,
    pub created_at: DateTime<Utc>,
    pub index: IndexStats,
    pub companies: usize,
    pub filing_types: BTreeMap<String, usize>,
}

impl EngineStats {
    pub fn from_artifact(artifact: &IndexArtifact) -> Self {
        Self {
            artifact_id: artifact.artifact_id(),
            profile: artifact.profile(),
            created_at: artifact.created_at(),
            index: artifact.stats(),
            companies: artifact.metadata().company_count(),
            filing_types: artifact.metadata().filing_type_counts(),
        }
    }
}

/// An artifact together with the embedder resolved for its profile.
#[derive(Debug)]
struct ServingIndex {
    artifact: IndexArtifact,
    embedder: ResolvedEmbedder,
}

/// Answers searches against one loaded index artifact.
///
/// The artifact is held behind an `Arc` and swapped under a short write
/// lock, so searches run concurrently without holding any lock while they
/// embed or scan.
#[derive(Debug)]
pub struct RetrievalEngine {
    config: RetrievalConfig,
    embedders: EmbedderSet,
    store: Arc<dyn FilingTextStore>,
    tickers: Arc<dyn TickerResolver>,
    serving: RwLock<Option<Arc<ServingIndex>>>,
}

impl RetrievalEngine {
    /// Create an engine with no artifact loaded.
    pub fn new(
        config: RetrievalConfig,
        embedders: EmbedderSet,
        store: Arc<dyn FilingTextStore>,
        tickers: Arc<dyn TickerResolver>,
    ) -> Self {
        Self {
            config,
            embedders,
            store,
            tickers,
            serving: RwLock::new(None),
        }
    }

    pub fn config(&self) -> &RetrievalConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn FilingTextStore> {
        &self.store
    }

    /// Load and install the artifact pair in `dir`.
    pub fn load(&self, dir: &Path) -> Result<()> {
        let artifact = IndexArtifact::load(dir)?;
        self.install(artifact)
    }

    /// Serve `artifact`, replacing whatever was loaded.
    ///
    /// The embedder for the artifact's profile is resolved here, once, and
    /// must be the model the artifact was built with; otherwise the call
    /// fails with `ModelUnavailable`. An artifact that cannot be served
    /// leaves the current one in place.
    pub fn install(&self, artifact: IndexArtifact) -> Result<()> {
        let embedder = self.embedders.resolve(artifact.profile(), 1)?;
        artifact.models().ensure_matches(&embedder.fingerprint())?;
        let dimension = artifact.index().dimension();
        if embedder.dimension() != dimension {
            return Err(RagError::embedding(format!(
                "{} profile embeds {} dimensions but the index holds {dimension}",
                artifact.profile(),
                embedder.dimension()
            )));
        }
        if !artifact.index().is_trained() {
            return Err(RagError::BelowTrainingThreshold {
                buffered: artifact.index().buffered_len(),
                threshold: artifact.index().config().training_threshold,
            });
        }
        info!(
            "Serving artifact {} ({} profile, {} vectors)",
            artifact.artifact_id(),
            artifact.profile(),
            artifact.index().len()
        );
        let serving = Arc::new(ServingIndex { artifact, embedder });
        *self.serving.write() = Some(serving);
        Ok(())
    }

    /// Stop serving. Subsequent searches fail with `IndexUnavailable`.
    pub fn unload(&self) {
        if self.serving.write().take().is_some() {
            info!("Index unloaded");
        }
    }

    pub fn is_loaded(&self) -> bool {
        self.serving.read().is_some()
    }

    fn serving(&self) -> Result<Arc<ServingIndex>> {
        self.serving
            .read()
            .as_ref()
            .cloned()
            .ok_or(RagError::IndexUnavailable)
    }

    fn effective_k(&self, k: Option<usize>) -> usize {
        k.unwrap_or(self.config.default_k).min(self.config.max_k)
    }

    /// Rank chunks by similarity to `request.query`.
    ///
    /// Fails with `IndexUnavailable` before any embedding or I/O when no
    /// artifact is loaded. Every hit satisfies the request's filters; when
    /// fewer than `k` chunks match, all matches are returned and the outcome
    /// is `Partial`.
    pub async fn search(&self, request: &SearchRequest) -> Result<SearchResults> {
        let serving = self.serving()?;
        let k = self.effective_k(request.k);
        if k == 0 {
            return Ok(SearchResults::new(Vec::new(), 0));
        }

        let (strategy, query) = serving.embedder.embed_query(&request.query).await?;
        let filter = MetadataFilter {
            company: request.company,
            filing_types: request.filing_types.clone(),
            filed_after: request.filed_after,
            strategy: self.strategy_filter(&serving, strategy),
        };
        let neighbors = self.find(&serving, &query.data, &filter, k, None)?;
        debug!(
            "Query '{}' matched {} of {k} requested hits",
            request.query,
            neighbors.len()
        );
        self.results(&serving, neighbors, k)
    }

    /// Search the filings of the company behind `ticker`.
    ///
    /// Fails with `NotFound` for an unknown ticker.
    pub async fn search_by_ticker(
        &self,
        query: &str,
        ticker: &str,
        filing_types: &[String],
        k: Option<usize>,
    ) -> Result<SearchResults> {
        self.serving()?;
        let company = self
            .tickers
            .resolve(ticker)
            .ok_or_else(|| RagError::not_found(format!("ticker '{ticker}'")))?;
        let request = SearchRequest {
            query: query.to_string(),
            company: Some(company),
            filing_types: filing_types.to_vec(),
            filed_after: None,
            k,
        };
        self.search(&request).await
    }

    /// Chunks closest to the stored chunk `id`, excluding itself.
    ///
    /// The query vector is reconstructed from the chunk's compressed code,
    /// so the chunk's text is never read.
    pub fn similar_chunks(&self, id: InternalId, k: Option<usize>) -> Result<SearchResults> {
        let serving = self.serving()?;
        let k = self.effective_k(k);
        let metadata = serving.artifact.metadata();
        let strategy = metadata
            .strategy(id)
            .ok_or_else(|| RagError::not_found(format!("internal id {id}")))?;
        let query = Vector::new(serving.artifact.index().reconstruct(id)?).normalized();
        let filter = MetadataFilter {
            strategy: self.strategy_filter(&serving, strategy),
            ..MetadataFilter::default()
        };
        let neighbors = self.find(&serving, &query.data, &filter, k, Some(id))?;
        self.results(&serving, neighbors, k)
    }

    /// Text of `result` with up to `window_bytes` of context on each side.
    ///
    /// Clipped sides are marked with `...`. Partial characters at the edges
    /// of the window are dropped.
    pub fn context_window(&self, result: &SearchResult, window_bytes: u64) -> Result<String> {
        let chunk = result.chunk();
        let lo = chunk.start_offset.saturating_sub(window_bytes);
        let hi = chunk.end_offset.saturating_add(window_bytes);
        // One extra byte tells whether the filing continues past `hi`.
        let mut bytes = self
            .store
            .read_bytes(&chunk.source_path, lo..hi.saturating_add(1))?;
        let more = bytes.len() as u64 > hi - lo;
        bytes.truncate((hi - lo) as usize);

        let mut out = String::with_capacity(bytes.len() + 6);
        if lo > 0 {
            out.push_str("...");
        }
        out.push_str(&decode_window(&bytes));
        if more {
            out.push_str("...");
        }
        Ok(out)
    }

    pub fn stats(&self) -> Result<EngineStats> {
        let serving = self.serving()?;
        Ok(EngineStats::from_artifact(&serving.artifact))
    }

    /// Hybrid indexes hold two vector spaces; a query only ranks chunks of
    /// its own strategy.
    fn strategy_filter(
        &self,
        serving: &ServingIndex,
        strategy: EmbeddingStrategy,
    ) -> Option<EmbeddingStrategy> {
        match serving.embedder.profile() {
            EmbeddingProfile::Hybrid => Some(strategy),
            _ => None,
        }
    }

    fn find(
        &self,
        serving: &ServingIndex,
        query: &[f32],
        filter: &MetadataFilter,
        k: usize,
        exclude: Option<InternalId>,
    ) -> Result<Vec<Neighbor>> {
        let index = serving.artifact.index();
        let metadata = serving.artifact.metadata();
        let n_probe = self.config.n_probe;
        if filter.is_empty() && exclude.is_none() {
            return index.search(query, k, n_probe);
        }

        let resolved = metadata.resolve_filter(filter);
        let accept = |id: InternalId| Some(id) != exclude && metadata.matches(id, &resolved);

        if let Some(company) = resolved.company() {
            let members = metadata.ids_for_company(company);
            if members.len() <= self.config.partition_scan_max_chunks {
                debug!(
                    "Scanning all {} chunks of company {company}",
                    members.len()
                );
                let candidates: Vec<InternalId> =
                    members.iter().copied().filter(|id| accept(*id)).collect();
                return index.search_ids(query, &candidates, k);
            }
        }
        index.search_filtered(query, k, n_probe, accept)
    }

    fn results(
        &self,
        serving: &ServingIndex,
        neighbors: Vec<Neighbor>,
        k: usize,
    ) -> Result<SearchResults> {
        let metadata = serving.artifact.metadata();
        let mut hits = Vec::with_capacity(neighbors.len());
        for neighbor in neighbors {
            let chunk = metadata.get(neighbor.id).ok_or_else(|| {
                RagError::corrupt(format!("no metadata row for id {}", neighbor.id))
            })?;
            let strategy = metadata.strategy(neighbor.id).ok_or_else(|| {
                RagError::corrupt(format!("no strategy recorded for id {}", neighbor.id))
            })?;
            hits.push(SearchResult::new(
                neighbor.id,
                chunk,
                neighbor.distance,
                strategy,
                Arc::clone(&self.store),
            ));
        }
        Ok(SearchResults::new(hits, k))
    }
}

/// Decode a byte window that may start or end inside a character.
fn decode_window(bytes: &[u8]) -> String {
    let skip = bytes
        .iter()
        .take(3)
        .take_while(|b| (**b & 0xC0) == 0x80)
        .count();
    let bytes = &bytes[skip..];
    let end = match std::str::from_utf8(bytes) {
        Err(e) if e.error_len().is_none() => e.valid_up_to(),
        _ => bytes.len(),
    };
    decode_filing_text(&bytes[..end])
}

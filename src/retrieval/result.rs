//! Search results with lazily loaded text.

use std::sync::{Arc, OnceLock};

use log::warn;
use serde::{Deserialize, Serialize};

use crate::embedding::EmbeddingStrategy;
use crate::error::Result;
use crate::filing::{Chunk, InternalId};
use crate::storage::FilingTextStore;

/// How a search's hit count relates to the requested `k`.
///
/// Fewer hits than requested is expected under a selective filter and is
/// not an error. `Partial` and `Empty` are kept apart so a caller can tell
/// thin evidence from no evidence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FilterOutcome {
    Complete,
    Partial { requested: usize, found: usize },
    Empty,
}

impl FilterOutcome {
    pub fn from_counts(requested: usize, found: usize) -> Self {
        if found == 0 {
            FilterOutcome::Empty
        } else if found < requested {
            FilterOutcome::Partial { requested, found }
        } else {
            FilterOutcome::Complete
        }
    }

    pub fn is_partial(&self) -> bool {
        matches!(self, FilterOutcome::Partial { .. })
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, FilterOutcome::Empty)
    }
}

/// One ranked hit.
#[derive(Debug, Clone)]
pub struct SearchResult {
    internal_id: InternalId,
    chunk: Chunk,
    distance: f32,
    score: f32,
    strategy: EmbeddingStrategy,
    store: Arc<dyn FilingTextStore>,
    text: OnceLock<String>,
}

impl SearchResult {
    pub(crate) fn new(
        internal_id: InternalId,
        chunk: Chunk,
        distance: f32,
        strategy: EmbeddingStrategy,
        store: Arc<dyn FilingTextStore>,
    ) -> Self {
        Self {
            internal_id,
            chunk,
            distance,
            score: crate::vector::similarity_from_l2(distance),
            strategy,
            store,
            text: OnceLock::new(),
        }
    }

    pub fn internal_id(&self) -> InternalId {
        self.internal_id
    }

    pub fn chunk(&self) -> &Chunk {
        &self.chunk
    }

    /// Approximate cosine similarity, higher is closer.
    pub fn score(&self) -> f32 {
        self.score
    }

    /// Approximate squared L2 distance, lower is closer.
    pub fn distance(&self) -> f32 {
        self.distance
    }

    pub fn strategy(&self) -> EmbeddingStrategy {
        self.strategy
    }

    /// The chunk's text, read from the filing store on first call.
    ///
    /// Only the bytes `[start_offset, end_offset)` are read. A failed read
    /// is not cached, so a later call retries.
    pub fn text(&self) -> Result<&str> {
        if let Some(text) = self.text.get() {
            return Ok(text);
        }
        let text = self
            .store
            .read_span(&self.chunk.source_path, self.chunk.byte_range())?;
        Ok(self.text.get_or_init(|| text))
    }

    pub fn is_text_loaded(&self) -> bool {
        self.text.get().is_some()
    }
}

/// Ranked hits of one search, closest first.
#[derive(Debug, Clone)]
pub struct SearchResults {
    hits: Vec<SearchResult>,
    requested: usize,
    outcome: FilterOutcome,
}

impl SearchResults {
    pub(crate) fn new(hits: Vec<SearchResult>, requested: usize) -> Self {
        let outcome = FilterOutcome::from_counts(requested, hits.len());
        Self {
            hits,
            requested,
            outcome,
        }
    }

    pub fn hits(&self) -> &[SearchResult] {
        &self.hits
    }

    pub fn iter(&self) -> std::slice::Iter<'_, SearchResult> {
        self.hits.iter()
    }

    pub fn len(&self) -> usize {
        self.hits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hits.is_empty()
    }

    pub fn requested(&self) -> usize {
        self.requested
    }

    /// Outcome of the search as ranked, before any text was loaded.
    pub fn outcome(&self) -> FilterOutcome {
        self.outcome
    }

    /// Load the text of every hit, dropping hits whose text cannot be read.
    ///
    /// A missing or unreadable filing affects only its own hits. The outcome
    /// still describes the ranked search.
    pub fn load_texts(mut self) -> Self {
        self.hits.retain(|hit| match hit.text() {
            Ok(_) => true,
            Err(e) => {
                warn!(
                    "Skipping result {} ({}): {e}",
                    hit.internal_id, hit.chunk.source_path
                );
                false
            }
        });
        self
    }
}

impl IntoIterator for SearchResults {
    type Item = SearchResult;
    type IntoIter = std::vec::IntoIter<SearchResult>;

    fn into_iter(self) -> Self::IntoIter {
        self.hits.into_iter()
    }
}

impl<'a> IntoIterator for &'a SearchResults {
    type Item = &'a SearchResult;
    type IntoIter = std::slice::Iter<'a, SearchResult>;

    fn into_iter(self) -> Self::IntoIter {
        self.hits.iter()
    }
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::*;
    use crate::storage::InMemoryFilingStore;

    fn chunk(path: &str, start: u64, end: u64) -> Chunk {
        Chunk {
            company_id: 1,
            source_path: Arc::from(path),
            start_offset: start,
            end_offset: end,
            filing_type: Arc::from("10-K"),
            filing_date: NaiveDate::from_ymd_opt(2024, 1, 2).unwrap(),
            section_hint: None,
        }
    }

    #[test]
    fn test_outcome_from_counts() {
        assert_eq!(FilterOutcome::from_counts(10, 10), FilterOutcome::Complete);
        assert_eq!(
            FilterOutcome::from_counts(10, 4),
            FilterOutcome::Partial {
                requested: 10,
                found: 4
            }
        );
        assert!(FilterOutcome::from_counts(10, 0).is_empty());
    }

    #[test]
    fn test_text_is_lazy_and_cached() {
        let store = Arc::new(InMemoryFilingStore::new());
        store.insert("a.txt", "alpha beta gamma");
        let hit = SearchResult::new(0, chunk("a.txt", 6, 10), 0.5, EmbeddingStrategy::General, store.clone());

        assert_eq!(store.reads(), 0);
        assert!(!hit.is_text_loaded());
        assert_eq!(hit.text().unwrap(), "beta");
        assert_eq!(hit.text().unwrap(), "beta");
        assert_eq!(store.reads(), 1);
        assert!((hit.score() - 0.75).abs() < 1e-6);
    }

    #[test]
    fn test_load_texts_drops_missing_files() {
        let store = Arc::new(InMemoryFilingStore::new());
        store.insert("a.txt", "alpha beta gamma");
        let shared: Arc<dyn FilingTextStore> = store;
        let hits = vec![
            SearchResult::new(0, chunk("a.txt", 0, 5), 0.1, EmbeddingStrategy::General, shared.clone()),
            SearchResult::new(1, chunk("gone.txt", 0, 5), 0.2, EmbeddingStrategy::General, shared.clone()),
        ];
        let results = SearchResults::new(hits, 5).load_texts();
        assert_eq!(results.len(), 1);
        assert_eq!(results.hits()[0].internal_id(), 0);
        assert!(results.outcome().is_partial());
    }
}

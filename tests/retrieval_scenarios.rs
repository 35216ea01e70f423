use std::collections::HashSet;
use std::sync::Arc;

use chrono::NaiveDate;

use filingscope::embedding::{
    EmbedderSet, EmbeddingProfile, EmbeddingStrategy, HashingEmbedder, ResolvedEmbedder,
    TextEmbedder,
};
use filingscope::error::{RagError, Result};
use filingscope::filing::{Chunk, CompanyId, InternalId};
use filingscope::index::{IndexArtifact, IndexConfig};
use filingscope::retrieval::{
    FilterOutcome, RetrievalConfig, RetrievalEngine, SearchRequest, StaticTickerResolver,
};
use filingscope::storage::InMemoryFilingStore;

const DIM: usize = 64;

#[tokio::test]
async fn ticker_search_only_returns_chunks_of_that_company() -> Result<()> {
    let corpus = build_corpus().await?;
    let company_one: HashSet<InternalId> = corpus
        .ids_of("a.txt")
        .chain(corpus.ids_of("b.txt"))
        .collect();
    let company_two: HashSet<InternalId> = corpus.ids_of("c.txt").collect();
    assert_eq!(company_one.len(), 200);
    assert_eq!(company_two.len(), 200);

    // A query copied from company 2's filing is the strongest possible pull
    // towards C, and still must not leak it.
    let query = corpus.line("c.txt", 17);
    for engine in [corpus.engine(RetrievalConfig::default())?, corpus.probing_engine()?] {
        let results = engine.search_by_ticker(&query, "acme", &[], Some(10)).await?;
        assert!(!results.is_empty());
        assert!(results.len() <= 10);
        for hit in &results {
            assert_eq!(hit.chunk().company_id, 1);
            assert!(company_one.contains(&hit.internal_id()));
            assert!(!company_two.contains(&hit.internal_id()));
        }
        assert_eq!(results.outcome(), FilterOutcome::Complete);
    }
    Ok(())
}

#[tokio::test]
async fn filtered_search_reports_partial_and_empty_outcomes() -> Result<()> {
    let corpus = build_corpus().await?;
    let engine = corpus.engine(RetrievalConfig::default())?;
    let small: HashSet<InternalId> = corpus.ids_of("d.txt").collect();

    let results = engine
        .search(&SearchRequest::new("quarterly cash burn").company(3).k(10))
        .await?;
    let found: HashSet<InternalId> = results.iter().map(|hit| hit.internal_id()).collect();
    assert_eq!(found, small);
    assert_eq!(
        results.outcome(),
        FilterOutcome::Partial {
            requested: 10,
            found: 4
        }
    );

    let results = engine
        .search(&SearchRequest::new("quarterly cash burn").company(99).k(10))
        .await?;
    assert!(results.is_empty());
    assert_eq!(results.outcome(), FilterOutcome::Empty);

    let results = engine
        .search(
            &SearchRequest::new("quarterly cash burn")
                .company(1)
                .filing_types(["10-Q"])
                .k(10),
        )
        .await?;
    assert_eq!(results.len(), 10);
    assert!(results.iter().all(|hit| &*hit.chunk().filing_type == "10-Q"));
    Ok(())
}

#[tokio::test]
async fn filed_after_excludes_older_filings_on_both_search_paths() -> Result<()> {
    let corpus = build_corpus().await?;
    let recent: HashSet<InternalId> = corpus.ids_of("b.txt").collect();
    // Copied from the 2023 filing, so the excluded chunks are the nearest.
    let query = corpus.line("a.txt", 5);

    for engine in [corpus.engine(RetrievalConfig::default())?, corpus.probing_engine()?] {
        let results = engine
            .search(
                &SearchRequest::new(query.clone())
                    .company(1)
                    .filed_after(date(2024, 1, 1))
                    .k(10),
            )
            .await?;
        assert_eq!(results.len(), 10);
        assert!(results.iter().all(|hit| recent.contains(&hit.internal_id())));
        assert_eq!(results.outcome(), FilterOutcome::Complete);

        // The cutoff day itself is included.
        let results = engine
            .search(
                &SearchRequest::new(query.clone())
                    .company(1)
                    .filed_after(date(2024, 5, 10))
                    .k(100),
            )
            .await?;
        let found: HashSet<InternalId> = results.iter().map(|hit| hit.internal_id()).collect();
        assert_eq!(found, recent);
        assert_eq!(
            results.outcome(),
            FilterOutcome::Partial {
                requested: 100,
                found: 80
            }
        );

        let results = engine
            .search(
                &SearchRequest::new(query.clone())
                    .company(1)
                    .filed_after(date(2024, 5, 11))
                    .k(10),
            )
            .await?;
        assert!(results.is_empty());
        assert_eq!(results.outcome(), FilterOutcome::Empty);
    }
    Ok(())
}

#[tokio::test]
async fn own_text_query_finds_the_chunk_and_loads_its_exact_span() -> Result<()> {
    let corpus = build_corpus().await?;
    let engine = corpus.engine(RetrievalConfig::default())?;

    for (path, line, company) in [("a.txt", 3, 1), ("b.txt", 41, 1), ("c.txt", 150, 2)] {
        let expected = corpus.id_of(path, line);
        let query = corpus.line(path, line);
        let results = engine
            .search(&SearchRequest::new(query.clone()).company(company).k(10))
            .await?;

        let hit = results
            .iter()
            .find(|hit| hit.internal_id() == expected)
            .ok_or_else(|| RagError::not_found(format!("{path} line {line} not in top 10")))?;
        assert_eq!(hit.text()?, query);
    }
    Ok(())
}

#[tokio::test]
async fn search_reads_no_text_until_asked() -> Result<()> {
    let corpus = build_corpus().await?;
    let engine = corpus.engine(RetrievalConfig::default())?;

    let results = engine.search(&SearchRequest::new("pipeline milestones").k(5)).await?;
    assert_eq!(results.len(), 5);
    assert_eq!(corpus.store.reads(), 0);

    let first = &results.hits()[0];
    first.text()?;
    first.text()?;
    assert_eq!(corpus.store.reads(), 1);
    Ok(())
}

#[tokio::test]
async fn missing_filing_text_drops_only_that_hit() -> Result<()> {
    let corpus = build_corpus().await?;
    let engine = corpus.engine(RetrievalConfig::default())?;
    corpus.store.remove("b.txt");

    let results = engine
        .search_by_ticker("clinical supply agreement", "ACME", &[], Some(20))
        .await?;
    let with_b = results
        .iter()
        .filter(|hit| &*hit.chunk().source_path == "b.txt")
        .count();
    let total = results.len();

    let loaded = results.load_texts();
    assert_eq!(loaded.len(), total - with_b);
    assert!(loaded.iter().all(|hit| hit.is_text_loaded()));
    Ok(())
}

#[tokio::test]
async fn unloaded_engine_fails_fast_without_io() -> Result<()> {
    let corpus = build_corpus().await?;
    let engine = corpus.engine(RetrievalConfig::default())?;
    engine.unload();

    let err = engine
        .search(&SearchRequest::new("anything").company(1))
        .await
        .unwrap_err();
    assert!(matches!(err, RagError::IndexUnavailable));
    let err = engine
        .search_by_ticker("anything", "ACME", &[], None)
        .await
        .unwrap_err();
    assert!(matches!(err, RagError::IndexUnavailable));
    assert_eq!(corpus.store.reads(), 0);
    Ok(())
}

#[tokio::test]
async fn unknown_ticker_is_not_found() -> Result<()> {
    let corpus = build_corpus().await?;
    let engine = corpus.engine(RetrievalConfig::default())?;
    let err = engine
        .search_by_ticker("anything", "ZZZZ", &[], None)
        .await
        .unwrap_err();
    assert!(matches!(err, RagError::NotFound(_)));
    Ok(())
}

#[tokio::test]
async fn reinstalling_swaps_the_served_artifact() -> Result<()> {
    let corpus = build_corpus().await?;
    let engine = corpus.engine(RetrievalConfig::default())?;
    let before = engine.stats()?;

    let replacement = corpus.artifact.clone();
    let mut fresh = IndexArtifact::new(&resolved()?, index_config())?;
    for id in replacement.index().ids() {
        let vector = replacement.index().reconstruct(id)?;
        let chunk = replacement
            .metadata()
            .get(id)
            .ok_or_else(|| RagError::not_found(format!("id {id}")))?;
        fresh.add_chunk(&vector, &chunk, EmbeddingStrategy::General)?;
    }
    engine.install(fresh)?;

    let after = engine.stats()?;
    assert_ne!(before.artifact_id, after.artifact_id);
    assert_eq!(before.index.total_vectors, after.index.total_vectors);
    Ok(())
}

struct Corpus {
    store: Arc<InMemoryFilingStore>,
    artifact: IndexArtifact,
    /// `(source_path, line) -> internal id`, in insertion order.
    rows: Vec<(String, usize, InternalId)>,
    lines: Vec<(String, Vec<String>)>,
}

impl Corpus {
    fn engine(&self, config: RetrievalConfig) -> Result<RetrievalEngine> {
        let engine = RetrievalEngine::new(
            config,
            embedders(),
            self.store.clone(),
            Arc::new(StaticTickerResolver::new().with("ACME", 1).with("BETA", 2)),
        );
        engine.install(self.artifact.clone())?;
        Ok(engine)
    }

    /// An engine that never scans a company's chunks directly and always
    /// probes inverted lists with a metadata predicate.
    fn probing_engine(&self) -> Result<RetrievalEngine> {
        self.engine(RetrievalConfig {
            partition_scan_max_chunks: 0,
            ..RetrievalConfig::default()
        })
    }

    fn ids_of<'a>(&'a self, path: &'a str) -> impl Iterator<Item = InternalId> + 'a {
        self.rows
            .iter()
            .filter(move |(p, _, _)| p == path)
            .map(|(_, _, id)| *id)
    }

    fn id_of(&self, path: &str, line: usize) -> InternalId {
        self.rows
            .iter()
            .find(|(p, l, _)| p == path && *l == line)
            .map(|(_, _, id)| *id)
            .unwrap()
    }

    fn line(&self, path: &str, line: usize) -> String {
        self.lines
            .iter()
            .find(|(p, _)| p == path)
            .map(|(_, lines)| lines[line].clone())
            .unwrap()
    }
}

fn index_config() -> IndexConfig {
    IndexConfig {
        dimension: DIM,
        n_lists: 8,
        pq_subvectors: 16,
        pq_bits: 8,
        training_threshold: 300,
        kmeans_iterations: 10,
        ..IndexConfig::default()
    }
}

fn resolved() -> Result<ResolvedEmbedder> {
    embedders().resolve(EmbeddingProfile::General, 32)
}

fn embedders() -> EmbedderSet {
    EmbedderSet::new().with_general(Arc::new(HashingEmbedder::new(
        EmbeddingStrategy::General,
        DIM,
    )))
}

fn date(year: i32, month: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(year, month, day).unwrap()
}

/// Filings A (120 chunks, filed 2023) and B (80, filed 2024) belong to
/// company 1, C (200) to company 2 and D (4) to company 3. Every line is one
/// chunk.
async fn build_corpus() -> Result<Corpus> {
    let store = Arc::new(InMemoryFilingStore::new());
    let embedder = HashingEmbedder::new(EmbeddingStrategy::General, DIM);
    let mut artifact = IndexArtifact::new(&resolved()?, index_config())?;
    let mut rows = Vec::new();
    let mut all_lines = Vec::new();

    let filings: [(&str, CompanyId, &str, NaiveDate, usize); 4] = [
        ("a.txt", 1, "10-K", date(2023, 2, 28), 120),
        ("b.txt", 1, "10-Q", date(2024, 5, 10), 80),
        ("c.txt", 2, "10-K", date(2024, 3, 1), 200),
        ("d.txt", 3, "8-K", date(2024, 3, 1), 4),
    ];
    for (path, company, filing_type, filing_date, count) in filings {
        let lines: Vec<String> = (0..count).map(|i| sentence(path, i)).collect();
        store.insert(path, &lines.join("\n"));

        let mut offset = 0u64;
        for (i, line) in lines.iter().enumerate() {
            let chunk = Chunk {
                company_id: company,
                source_path: Arc::from(path),
                start_offset: offset,
                end_offset: offset + line.len() as u64,
                filing_type: Arc::from(filing_type),
                filing_date,
                section_hint: None,
            };
            offset += line.len() as u64 + 1;
            let vector = embedder.embed(line).await?;
            let id = artifact.add_chunk(&vector.data, &chunk, EmbeddingStrategy::General)?;
            rows.push((path.to_string(), i, id));
        }
        all_lines.push((path.to_string(), lines));
    }
    assert!(artifact.index().is_trained());

    Ok(Corpus {
        store,
        artifact,
        rows,
        lines: all_lines,
    })
}

const WORDS: &[&str] = &[
    "revenue", "pipeline", "clinical", "supply", "agreement", "milestone", "cash", "burn",
    "quarterly", "license", "royalty", "patent", "litigation", "enrollment", "approval",
    "manufacturing", "inventory", "lease", "debt", "equity", "warrant", "dividend", "tax",
    "goodwill", "impairment", "segment", "margin", "guidance", "headcount", "facility",
    "partner", "option",
];

/// A deterministic sentence that differs from every other line in the
/// corpus.
fn sentence(path: &str, i: usize) -> String {
    let seed = path.bytes().map(|b| b as usize).sum::<usize>();
    let pick = |j: usize| WORDS[(seed * 31 + i * 7 + j * 13) % WORDS.len()];
    format!(
        "{} {} {} {} {} {} item {path} {i}",
        pick(0),
        pick(1),
        pick(2),
        pick(3),
        pick(4),
        pick(5)
    )
}

//! Command implementations for the filingscope CLI.

use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use log::{info, warn};

use crate::chunking::Chunker;
use crate::cli::args::*;
use crate::cli::output::*;
use crate::config::RagConfig;
use crate::embedding::{EmbeddingConfig, ModelSpec};
use crate::error::{RagError, Result};
use crate::filing::FilingRecord;
use crate::index::{IndexArtifact, IndexBuilder};
use crate::retrieval::{
    EngineStats, RetrievalEngine, SearchRequest, StaticTickerResolver, TICKERS_FILE,
};
use crate::storage::{FileFilingStore, FilingTextStore};

/// Execute a CLI command.
pub async fn execute_command(args: FilingscopeArgs) -> Result<()> {
    let config = load_config(&args)?;
    match &args.command {
        Command::Index(index_args) => build_index(index_args.clone(), config, &args).await,
        Command::Search(search_args) => search_index(search_args.clone(), config, &args).await,
        Command::Stats(stats_args) => show_stats(stats_args.clone(), &args),
        Command::Verify(verify_args) => verify_index(verify_args.clone(), &args),
    }
}

fn load_config(args: &FilingscopeArgs) -> Result<RagConfig> {
    match &args.config {
        Some(path) => {
            info!("Loading configuration from {}", path.display());
            RagConfig::from_file(path)
        }
        None => Ok(RagConfig::default()),
    }
}

/// Apply `--general-model` / `--biomedical-model` presets.
fn apply_presets(
    embedding: &mut EmbeddingConfig,
    general: Option<&str>,
    biomedical: Option<&str>,
) -> Result<()> {
    for (name, slot) in [
        (general, &mut embedding.general),
        (biomedical, &mut embedding.biomedical),
    ] {
        if let Some(name) = name {
            *slot = ModelSpec::preset(name).ok_or_else(|| {
                RagError::invalid_argument(format!("unknown model preset '{name}'"))
            })?;
        }
    }
    Ok(())
}

/// Build or resume an index.
async fn build_index(args: IndexArgs, mut config: RagConfig, cli_args: &FilingscopeArgs) -> Result<()> {
    if let Some(profile) = args.profile {
        config.embedding.profile = profile;
    }
    apply_presets(
        &mut config.embedding,
        args.general_model.as_deref(),
        args.biomedical_model.as_deref(),
    )?;
    config.validate()?;

    let start_time = Instant::now();
    let records = FilingRecord::read_manifest(&args.manifest)?;
    info!(
        "Read {} filings from {}",
        records.len(),
        args.manifest.display()
    );

    let embedder = config
        .embedding
        .build_set()
        .resolve(config.embedding.profile, config.embedding.batch_size)?;
    let store: Arc<dyn FilingTextStore> = Arc::new(FileFilingStore::new(&args.filing_root));
    let chunker = Chunker::new(config.chunker.clone());

    let mut builder = if args.resume {
        IndexBuilder::resume(&args.index_dir, store, chunker, embedder, config.index.clone())?
    } else {
        IndexBuilder::new(&args.index_dir, store, chunker, embedder, config.index.clone())?
    };
    let summary = builder.add_filings(&records).await?;

    let tickers = StaticTickerResolver::from_manifest(&records);
    tickers.to_json_file(args.index_dir.join(TICKERS_FILE))?;

    let result = IndexBuildResult {
        index_dir: args.index_dir.display().to_string(),
        summary,
        duration_ms: start_time.elapsed().as_millis() as u64,
        tickers: tickers.len(),
    };
    let finished = builder.finish();
    output_result(&result, cli_args)?;
    if let Err(RagError::BelowTrainingThreshold { buffered, threshold }) = &finished {
        warn!(
            "Index is not trained: {buffered} of {threshold} vectors buffered. \
             Add filings and rerun with --resume."
        );
    }
    finished.map(|_| ())
}

fn load_tickers(index_dir: &Path) -> Result<StaticTickerResolver> {
    let path = index_dir.join(TICKERS_FILE);
    if path.is_file() {
        StaticTickerResolver::from_json_file(path)
    } else {
        Ok(StaticTickerResolver::new())
    }
}

/// Search an index.
async fn search_index(args: SearchArgs, mut config: RagConfig, cli_args: &FilingscopeArgs) -> Result<()> {
    apply_presets(
        &mut config.embedding,
        args.general_model.as_deref(),
        args.biomedical_model.as_deref(),
    )?;
    let start_time = Instant::now();

    let engine = RetrievalEngine::new(
        config.retrieval.clone(),
        config.embedding.build_set(),
        Arc::new(FileFilingStore::new(&args.filing_root)),
        Arc::new(load_tickers(&args.index_dir)?),
    );
    engine.load(&args.index_dir)?;

    let results = match &args.ticker {
        Some(ticker) => {
            engine
                .search_by_ticker(&args.query, ticker, &args.filing_types, args.k)
                .await?
        }
        None => {
            let mut request = SearchRequest::new(args.query.clone()).filing_types(args.filing_types.clone());
            request.company = args.company;
            request.filed_after = args.filed_after;
            request.k = args.k;
            engine.search(&request).await?
        }
    };
    let outcome = results.outcome();
    let results = if args.text { results.load_texts() } else { results };

    let output = SearchOutput {
        query: args.query,
        outcome,
        hits: results
            .iter()
            .enumerate()
            .map(|(i, hit)| HitOutput::from_result(i + 1, hit, args.text))
            .collect(),
        duration_ms: start_time.elapsed().as_millis() as u64,
    };
    output_result(&output, cli_args)
}

/// Show index statistics without loading any embedding backend.
fn show_stats(args: StatsArgs, cli_args: &FilingscopeArgs) -> Result<()> {
    let artifact = IndexArtifact::load(&args.index_dir)?;
    output_result(&EngineStats::from_artifact(&artifact), cli_args)
}

/// Verify the artifact pair.
fn verify_index(args: VerifyArgs, cli_args: &FilingscopeArgs) -> Result<()> {
    let report = IndexArtifact::verify(&args.index_dir)?;
    output_result(&report, cli_args)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_apply_presets() {
        let mut embedding = EmbeddingConfig::default();
        apply_presets(&mut embedding, Some("local"), None).unwrap();
        assert_eq!(embedding.general, ModelSpec::Hashing { seed: 0 });

        apply_presets(&mut embedding, None, Some("biomedical")).unwrap();
        assert!(matches!(embedding.biomedical, ModelSpec::OpenAi { .. }));

        assert!(apply_presets(&mut embedding, Some("nope"), None).is_err());
    }
}

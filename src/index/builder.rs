//! Producer/consumer index build with checkpointing.
//!
//! Reader tasks on the blocking pool load and chunk filings and hand them
//! over a bounded channel. The builder embeds each filing's chunks and adds
//! them to the artifact. All index mutation happens on the builder, so adds
//! and the training transition are never concurrent.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::chunking::Chunker;
use crate::embedding::ResolvedEmbedder;
use crate::error::{RagError, Result};
use crate::filing::{Chunk, FilingRecord};
use crate::index::{BuildCheckpoint, IndexArtifact, IndexConfig};
use crate::storage::FilingTextStore;

/// Outcome of [`IndexBuilder::add_filings`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BuildSummary {
    pub filings_indexed: usize,
    /// Filings skipped because the checkpoint already had them.
    pub filings_skipped: usize,
    /// Filings that could not be read; they stay unmarked for a later run.
    pub filings_failed: usize,
    pub chunks_added: usize,
    pub total_vectors: usize,
    pub trained: bool,
}

enum Loaded {
    Chunked {
        filing_id: String,
        chunks: Vec<(Chunk, String)>,
    },
    Failed {
        filing_id: String,
        error: RagError,
    },
}

/// Builds an [`IndexArtifact`] in a directory.
pub struct IndexBuilder {
    dir: PathBuf,
    store: Arc<dyn FilingTextStore>,
    chunker: Chunker,
    embedder: ResolvedEmbedder,
    artifact: IndexArtifact,
    checkpoint: BuildCheckpoint,
}

impl IndexBuilder {
    /// Start a fresh build in `dir`, discarding any previous checkpoint.
    pub fn new(
        dir: &Path,
        store: Arc<dyn FilingTextStore>,
        chunker: Chunker,
        embedder: ResolvedEmbedder,
        config: IndexConfig,
    ) -> Result<Self> {
        if embedder.dimension() != config.dimension {
            return Err(RagError::invalid_config(format!(
                "embedder produces {} dimensions but the index expects {}",
                embedder.dimension(),
                config.dimension
            )));
        }
        BuildCheckpoint::remove(dir)?;
        let artifact = IndexArtifact::new(&embedder, config)?;
        let checkpoint = BuildCheckpoint::new(artifact.artifact_id());
        Ok(Self {
            dir: dir.to_path_buf(),
            store,
            chunker,
            embedder,
            artifact,
            checkpoint,
        })
    }

    /// Continue the build staged in `dir`.
    ///
    /// Falls back to a fresh build when there is no staging artifact, when
    /// the staged pair is damaged or torn, or when its checkpoint does not
    /// match it. A staging artifact built under another embedding profile is
    /// an error, and one embedded by another model fails with
    /// `ModelUnavailable`.
    pub fn resume(
        dir: &Path,
        store: Arc<dyn FilingTextStore>,
        chunker: Chunker,
        embedder: ResolvedEmbedder,
        config: IndexConfig,
    ) -> Result<Self> {
        if !IndexArtifact::exists(dir) {
            log::info!("no staging artifact in {}, starting a fresh build", dir.display());
            return Self::new(dir, store, chunker, embedder, config);
        }
        let artifact = match IndexArtifact::load(dir) {
            Ok(artifact) => artifact,
            Err(RagError::CorruptIndex(reason)) => {
                log::warn!(
                    "staging artifact in {} is unusable ({reason}), starting a fresh build",
                    dir.display()
                );
                return Self::new(dir, store, chunker, embedder, config);
            }
            Err(e) => return Err(e),
        };
        if artifact.profile() != embedder.profile() {
            return Err(RagError::invalid_config(format!(
                "staging artifact was built with the {} profile, not {}",
                artifact.profile(),
                embedder.profile()
            )));
        }
        artifact.models().ensure_matches(&embedder.fingerprint())?;
        if artifact.index().dimension() != embedder.dimension() {
            return Err(RagError::invalid_config(format!(
                "staging artifact has {} dimensions but the embedder produces {}",
                artifact.index().dimension(),
                embedder.dimension()
            )));
        }

        match BuildCheckpoint::load(dir)? {
            Some(checkpoint)
                if checkpoint.artifact_id == artifact.artifact_id()
                    && checkpoint.id_end == artifact.index().len() as u64 =>
            {
                log::info!(
                    "resuming build of artifact {} with {} filings already indexed",
                    artifact.artifact_id(),
                    checkpoint.len()
                );
                Ok(Self {
                    dir: dir.to_path_buf(),
                    store,
                    chunker,
                    embedder,
                    artifact,
                    checkpoint,
                })
            }
            _ => {
                log::warn!(
                    "checkpoint in {} does not match artifact {}, starting a fresh build",
                    dir.display(),
                    artifact.artifact_id()
                );
                Self::new(dir, store, chunker, embedder, config)
            }
        }
    }

    pub fn artifact(&self) -> &IndexArtifact {
        &self.artifact
    }

    pub fn checkpoint(&self) -> &BuildCheckpoint {
        &self.checkpoint
    }

    /// Chunk, embed and index `filings`, skipping those already processed.
    pub async fn add_filings(&mut self, filings: &[FilingRecord]) -> Result<BuildSummary> {
        let mut summary = BuildSummary::default();
        let pending: Vec<FilingRecord> = filings
            .iter()
            .filter(|f| !self.checkpoint.contains(&f.filing_id))
            .cloned()
            .collect();
        summary.filings_skipped = filings.len() - pending.len();
        if summary.filings_skipped > 0 {
            log::info!(
                "skipping {} filings already in the checkpoint",
                summary.filings_skipped
            );
        }

        let config = self.artifact.index().config().clone();
        let workers = config.worker_count().min(pending.len()).max(1);
        let (tx, mut rx) = mpsc::channel::<Loaded>(config.channel_capacity);

        let mut producers = Vec::with_capacity(workers);
        for worker in 0..workers {
            let assigned: Vec<FilingRecord> = pending
                .iter()
                .skip(worker)
                .step_by(workers)
                .cloned()
                .collect();
            let store = Arc::clone(&self.store);
            let chunker = self.chunker.clone();
            let tx = tx.clone();
            producers.push(tokio::task::spawn_blocking(move || {
                for filing in assigned {
                    let loaded = load_filing(store.as_ref(), &chunker, &filing);
                    if tx.blocking_send(loaded).is_err() {
                        // The builder stopped early.
                        break;
                    }
                }
            }));
        }
        drop(tx);

        let mut since_checkpoint = 0usize;
        let result = async {
            while let Some(loaded) = rx.recv().await {
                match loaded {
                    Loaded::Chunked { filing_id, chunks } => {
                        summary.chunks_added += self.index_chunks(&chunks).await?;
                        self.checkpoint.mark(&filing_id);
                        summary.filings_indexed += 1;
                        since_checkpoint += 1;
                        if since_checkpoint >= config.checkpoint_every {
                            self.save()?;
                            since_checkpoint = 0;
                        }
                    }
                    Loaded::Failed { filing_id, error } => {
                        log::warn!("skipping filing {filing_id}: {error}");
                        summary.filings_failed += 1;
                    }
                }
            }
            Ok::<(), RagError>(())
        }
        .await;
        drop(rx);

        for producer in producers {
            producer
                .await
                .map_err(|e| RagError::other(format!("filing reader task failed: {e}")))?;
        }
        result?;

        summary.total_vectors = self.artifact.index().len();
        summary.trained = self.artifact.index().is_trained();
        Ok(summary)
    }

    async fn index_chunks(&mut self, chunks: &[(Chunk, String)]) -> Result<usize> {
        if chunks.is_empty() {
            return Ok(0);
        }
        let texts: Vec<&str> = chunks.iter().map(|(_, text)| text.as_str()).collect();
        let embedded = self.embedder.embed_texts(&texts).await?;
        for ((chunk, _), (strategy, vector)) in chunks.iter().zip(embedded) {
            self.artifact.add_chunk(&vector.data, chunk, strategy)?;
        }
        Ok(chunks.len())
    }

    /// Persist the staging artifact, then the checkpoint that describes it.
    pub fn save(&mut self) -> Result<()> {
        self.artifact.save(&self.dir)?;
        self.checkpoint.id_end = self.artifact.index().len() as u64;
        self.checkpoint.save(&self.dir)
    }

    /// Save and hand back the artifact.
    ///
    /// An index that never reached its training threshold is still saved as
    /// a staging artifact for a later resume, and the call fails with
    /// `BelowTrainingThreshold`.
    pub fn finish(mut self) -> Result<IndexArtifact> {
        self.save()?;
        let index = self.artifact.index();
        if !index.is_trained() {
            return Err(RagError::BelowTrainingThreshold {
                buffered: index.buffered_len(),
                threshold: index.config().training_threshold,
            });
        }
        log::info!(
            "build finished: {} vectors from {} filings",
            index.len(),
            self.checkpoint.len()
        );
        Ok(self.artifact)
    }
}

fn load_filing(store: &dyn FilingTextStore, chunker: &Chunker, filing: &FilingRecord) -> Loaded {
    match store.read_all(&filing.source_path) {
        Ok(text) => {
            let iter = chunker.chunks(&text, filing);
            let chunks = iter
                .clone()
                .map(|chunk| {
                    let span = iter.text_of(&chunk).to_string();
                    (chunk, span)
                })
                .collect();
            Loaded::Chunked {
                filing_id: filing.filing_id.clone(),
                chunks,
            }
        }
        Err(error) => Loaded::Failed {
            filing_id: filing.filing_id.clone(),
            error,
        },
    }
}

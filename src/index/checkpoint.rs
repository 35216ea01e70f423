//! Persisted set of processed filings for resumable builds.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::Result;

pub const CHECKPOINT_FILE: &str = "checkpoint.json";

/// Filings already indexed into a staging artifact.
///
/// The checkpoint names the artifact it belongs to and the id range that
/// artifact had when the checkpoint was written. A checkpoint that does not
/// match the staging artifact on both counts is ignored on resume.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildCheckpoint {
    pub artifact_id: Uuid,
    pub id_end: u64,
    processed: BTreeSet<String>,
    pub updated_at: DateTime<Utc>,
}

impl BuildCheckpoint {
    pub fn new(artifact_id: Uuid) -> Self {
        Self {
            artifact_id,
            id_end: 0,
            processed: BTreeSet::new(),
            updated_at: Utc::now(),
        }
    }

    pub fn path(dir: &Path) -> PathBuf {
        dir.join(CHECKPOINT_FILE)
    }

    /// Read the checkpoint in `dir`, if there is one.
    pub fn load(dir: &Path) -> Result<Option<Self>> {
        let path = Self::path(dir);
        if !path.is_file() {
            return Ok(None);
        }
        let text = fs::read_to_string(&path)?;
        Ok(Some(serde_json::from_str(&text)?))
    }

    /// Write the checkpoint atomically.
    pub fn save(&mut self, dir: &Path) -> Result<()> {
        fs::create_dir_all(dir)?;
        self.updated_at = Utc::now();
        let tmp = dir.join(format!("{CHECKPOINT_FILE}.tmp"));
        fs::write(&tmp, serde_json::to_vec_pretty(self)?)?;
        fs::rename(&tmp, Self::path(dir))?;
        Ok(())
    }

    pub fn remove(dir: &Path) -> Result<()> {
        let path = Self::path(dir);
        if path.is_file() {
            fs::remove_file(path)?;
        }
        Ok(())
    }

    pub fn contains(&self, filing_id: &str) -> bool {
        self.processed.contains(filing_id)
    }

    /// Record `filing_id` as processed. Returns false if it already was.
    pub fn mark(&mut self, filing_id: &str) -> bool {
        self.processed.insert(filing_id.to_string())
    }

    pub fn len(&self) -> usize {
        self.processed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.processed.is_empty()
    }
}

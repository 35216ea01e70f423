//! In-memory filing store for tests and small corpora.

use std::collections::HashMap;
use std::io;
use std::ops::Range;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::RwLock;

use crate::error::{RagError, Result};
use crate::storage::FilingTextStore;

/// Filings held in memory, keyed by source path.
#[derive(Debug, Default)]
pub struct InMemoryFilingStore {
    files: RwLock<HashMap<String, Arc<str>>>,
    reads: AtomicUsize,
}

impl InMemoryFilingStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert<S: Into<String>>(&self, source_path: S, text: &str) {
        self.files.write().insert(source_path.into(), Arc::from(text));
    }

    pub fn remove(&self, source_path: &str) -> bool {
        self.files.write().remove(source_path).is_some()
    }

    /// Number of read calls served so far.
    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    fn get(&self, source_path: &str) -> Result<Arc<str>> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        self.files.read().get(source_path).cloned().ok_or_else(|| {
            RagError::from(io::Error::new(
                io::ErrorKind::NotFound,
                format!("{source_path} is not in the store"),
            ))
        })
    }
}

impl FilingTextStore for InMemoryFilingStore {
    fn read_bytes(&self, source_path: &str, range: Range<u64>) -> Result<Vec<u8>> {
        let text = self.get(source_path)?;
        let bytes = text.as_bytes();
        let start = (range.start as usize).min(bytes.len());
        let end = (range.end as usize).clamp(start, bytes.len());
        Ok(bytes[start..end].to_vec())
    }

    fn read_all(&self, source_path: &str) -> Result<String> {
        Ok(self.get(source_path)?.to_string())
    }
}

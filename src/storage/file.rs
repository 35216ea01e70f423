//! File-system filing store for plain and gzip-compressed filings.

use std::fs::File;
use std::io::{self, BufReader, Read, Seek, SeekFrom};
use std::ops::Range;
use std::path::{Component, Path, PathBuf};

use flate2::read::GzDecoder;

use crate::error::{RagError, Result};
use crate::storage::{FilingTextStore, decode_filing_text, invalid_byte_count};

/// Filings stored under a root directory.
///
/// Paths ending in `.gz` are decompressed as a stream: reading a span skips
/// to its start and decodes only up to its end, so memory use is bounded by
/// the span, not the filing.
#[derive(Debug, Clone)]
pub struct FileFilingStore {
    root: PathBuf,
}

impl FileFilingStore {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a source path relative to the root.
    fn resolve(&self, source_path: &str) -> Result<PathBuf> {
        let relative = Path::new(source_path);
        let escapes = relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
        if escapes {
            return Err(RagError::invalid_argument(format!(
                "source path '{source_path}' must be relative to the filing root"
            )));
        }
        Ok(self.root.join(relative))
    }

    fn open(&self, source_path: &str) -> Result<Box<dyn Read>> {
        let path = self.resolve(source_path)?;
        let file = BufReader::new(File::open(&path)?);
        if is_gzip(source_path) {
            Ok(Box::new(GzDecoder::new(file)))
        } else {
            Ok(Box::new(file))
        }
    }
}

fn is_gzip(source_path: &str) -> bool {
    source_path.ends_with(".gz")
}

impl FilingTextStore for FileFilingStore {
    fn read_bytes(&self, source_path: &str, range: Range<u64>) -> Result<Vec<u8>> {
        let len = range.end.saturating_sub(range.start);
        let mut out = Vec::with_capacity(len.min(1 << 20) as usize);

        if is_gzip(source_path) {
            let mut reader = self.open(source_path)?;
            io::copy(&mut reader.by_ref().take(range.start), &mut io::sink())?;
            reader.take(len).read_to_end(&mut out)?;
        } else {
            let mut file = File::open(self.resolve(source_path)?)?;
            file.seek(SeekFrom::Start(range.start))?;
            file.take(len).read_to_end(&mut out)?;
        }
        Ok(out)
    }

    fn read_all(&self, source_path: &str) -> Result<String> {
        let mut bytes = Vec::new();
        self.open(source_path)?.read_to_end(&mut bytes)?;
        let text = decode_filing_text(&bytes);
        if text.as_bytes() != bytes.as_slice() {
            log::warn!(
                "{source_path}: replaced {} bytes that are not valid UTF-8",
                invalid_byte_count(&bytes)
            );
        }
        Ok(text)
    }
}

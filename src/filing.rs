//! Filing and chunk records shared by the build and query paths.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::sync::Arc;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::error::{RagError, Result};

/// Identifier of a company in the surrounding catalog.
pub type CompanyId = u64;

/// Internal id joining the compressed index and the metadata store.
pub type InternalId = u64;

/// A caller-supplied section boundary, in byte offsets of the filing text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SectionBoundary {
    pub name: String,
    pub start: u64,
    pub end: u64,
}

/// One filing as described by the ingestion manifest.
///
/// Manifests are JSON-lines files with one record per line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilingRecord {
    /// Stable identifier of the filing (accession number or catalog id).
    pub filing_id: String,
    pub company_id: CompanyId,
    #[serde(default)]
    pub ticker: Option<String>,
    /// Path of the (possibly gzip-compressed) filing text, relative to the
    /// filing store root.
    pub source_path: String,
    pub filing_type: String,
    pub filing_date: NaiveDate,
    /// Known section boundaries. When present they replace header detection.
    #[serde(default)]
    pub sections: Option<Vec<SectionBoundary>>,
}

impl FilingRecord {
    /// Read a JSON-lines manifest. Blank lines are ignored.
    pub fn read_manifest<P: AsRef<Path>>(path: P) -> Result<Vec<FilingRecord>> {
        let reader = BufReader::new(File::open(path.as_ref())?);
        let mut records = Vec::new();
        for (line_no, line) in reader.lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let record: FilingRecord = serde_json::from_str(&line).map_err(|e| {
                RagError::invalid_argument(format!(
                    "{}:{}: {e}",
                    path.as_ref().display(),
                    line_no + 1
                ))
            })?;
            records.push(record);
        }
        Ok(records)
    }
}

/// A bounded span of a filing, referenced by byte offsets into the decoded
/// filing text. The text itself is never stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    pub company_id: CompanyId,
    pub source_path: Arc<str>,
    pub start_offset: u64,
    pub end_offset: u64,
    pub filing_type: Arc<str>,
    pub filing_date: NaiveDate,
    pub section_hint: Option<Arc<str>>,
}

impl Chunk {
    /// Length of the span in bytes.
    pub fn len(&self) -> u64 {
        self.end_offset - self.start_offset
    }

    pub fn is_empty(&self) -> bool {
        self.end_offset == self.start_offset
    }

    /// The span as a half-open byte range.
    pub fn byte_range(&self) -> std::ops::Range<u64> {
        self.start_offset..self.end_offset
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn test_read_manifest_skips_blank_lines() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"{{"filing_id":"0001-24","company_id":7,"ticker":"ACME","source_path":"acme/10k.txt.gz","filing_type":"10-K","filing_date":"2024-03-01"}}"#
        )
        .unwrap();
        writeln!(file).unwrap();
        writeln!(
            file,
            r#"{{"filing_id":"0002-24","company_id":7,"source_path":"acme/10q.txt","filing_type":"10-Q","filing_date":"2024-05-10","sections":[{{"name":"RISK FACTORS","start":0,"end":10}}]}}"#
        )
        .unwrap();

        let records = FilingRecord::read_manifest(file.path()).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].ticker.as_deref(), Some("ACME"));
        assert_eq!(records[1].sections.as_ref().map(|s| s.len()), Some(1));
    }

    #[test]
    fn test_read_manifest_reports_line_number() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "{{not json").unwrap();
        let err = FilingRecord::read_manifest(file.path()).unwrap_err();
        assert!(err.to_string().contains(":1:"));
    }
}

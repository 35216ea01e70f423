//! Output formatting for CLI commands.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::cli::args::{FilingscopeArgs, OutputFormat};
use crate::error::Result;
use crate::index::{ArtifactReport, BuildSummary};
use crate::retrieval::{EngineStats, FilterOutcome, SearchResult};

/// Result of an index build.
#[derive(Debug, Serialize, Deserialize)]
pub struct IndexBuildResult {
    pub index_dir: String,
    pub summary: BuildSummary,
    pub duration_ms: u64,
    pub tickers: usize,
}

/// One hit as printed by `search`.
#[derive(Debug, Serialize, Deserialize)]
pub struct HitOutput {
    pub rank: usize,
    pub internal_id: u64,
    pub score: f32,
    pub company_id: u64,
    pub filing_type: String,
    pub filing_date: String,
    pub source_path: String,
    pub section: Option<String>,
    pub start_offset: u64,
    pub end_offset: u64,
    pub text: Option<String>,
}

impl HitOutput {
    pub fn from_result(rank: usize, result: &SearchResult, with_text: bool) -> Self {
        let chunk = result.chunk();
        Self {
            rank,
            internal_id: result.internal_id(),
            score: result.score(),
            company_id: chunk.company_id,
            filing_type: chunk.filing_type.to_string(),
            filing_date: chunk.filing_date.to_string(),
            source_path: chunk.source_path.to_string(),
            section: chunk.section_hint.as_ref().map(|s| s.to_string()),
            start_offset: chunk.start_offset,
            end_offset: chunk.end_offset,
            text: if with_text {
                result.text().ok().map(str::to_string)
            } else {
                None
            },
        }
    }
}

/// Result of a search.
#[derive(Debug, Serialize, Deserialize)]
pub struct SearchOutput {
    pub query: String,
    pub outcome: FilterOutcome,
    pub hits: Vec<HitOutput>,
    pub duration_ms: u64,
}

/// Rendering for the human output format.
pub trait HumanOutput {
    fn render_human(&self) -> String;
}

impl HumanOutput for IndexBuildResult {
    fn render_human(&self) -> String {
        let s = &self.summary;
        let mut out = format!("Index: {}\n", self.index_dir);
        out += &format!(
            "Filings indexed: {} (skipped {}, failed {})\n",
            s.filings_indexed, s.filings_skipped, s.filings_failed
        );
        out += &format!("Chunks added:    {}\n", s.chunks_added);
        out += &format!("Total vectors:   {}\n", s.total_vectors);
        out += &format!("Trained:         {}\n", s.trained);
        out += &format!("Tickers:         {}\n", self.tickers);
        out += &format!("Duration:        {} ms", self.duration_ms);
        out
    }
}

impl HumanOutput for SearchOutput {
    fn render_human(&self) -> String {
        let mut out = format!("Search Results for '{}':\n", self.query);
        out += "═══════════════\n";
        for hit in &self.hits {
            out += &format!(
                "\n{}. [{:.3}] company {} {} {} {}..{}",
                hit.rank,
                hit.score,
                hit.company_id,
                hit.filing_type,
                hit.filing_date,
                hit.start_offset,
                hit.end_offset
            );
            if let Some(section) = &hit.section {
                out += &format!(" ({section})");
            }
            out += &format!("\n   {}\n", hit.source_path);
            if let Some(text) = &hit.text {
                for line in text.lines() {
                    out += &format!("   | {line}\n");
                }
            }
        }
        out += &match self.outcome {
            FilterOutcome::Complete => format!("\n{} results", self.hits.len()),
            FilterOutcome::Partial { requested, found } => {
                format!("\n{found} of {requested} requested results matched the filters")
            }
            FilterOutcome::Empty => "\nNo results".to_string(),
        };
        out += &format!(" ({} ms)", self.duration_ms);
        out
    }
}

impl HumanOutput for EngineStats {
    fn render_human(&self) -> String {
        let index = &self.index;
        let mut out = String::from("Index Statistics:\n═════════════════\n");
        out += &format!("Artifact:       {}\n", self.artifact_id);
        out += &format!("Profile:        {}\n", self.profile);
        out += &format!("Created:        {}\n", self.created_at.to_rfc3339());
        out += &format!("Vectors:        {}\n", index.total_vectors);
        out += &format!("Trained:        {}\n", index.trained);
        if !index.trained {
            out += &format!("Buffered:       {}\n", index.buffered_vectors);
        }
        out += &format!("Lists:          {}\n", index.n_lists);
        out += &format!("Dimension:      {}\n", index.dimension);
        out += &format!("Code bytes:     {}\n", index.code_bytes_per_vector);
        out += &format!(
            "Memory:         {} compressed / {} uncompressed ({:.1}x)\n",
            format_bytes(index.compressed_bytes as u64),
            format_bytes(index.uncompressed_bytes as u64),
            index.compression_ratio()
        );
        out += &format!("Companies:      {}\n", self.companies);
        out += &render_counts(&self.filing_types);
        out
    }
}

impl HumanOutput for ArtifactReport {
    fn render_human(&self) -> String {
        let mut out = String::from("Artifact OK\n");
        out += &format!("Artifact:       {}\n", self.artifact_id);
        out += &format!("Profile:        {}\n", self.profile);
        out += &format!("Models:         {}\n", self.models);
        out += &format!("Created:        {}\n", self.created_at.to_rfc3339());
        out += &format!("Ids:            {}..{}\n", self.id_range.0, self.id_range.1);
        out += &format!("Trained:        {}\n", self.trained);
        out += &format!("Index file:     {}\n", format_bytes(self.index_file_bytes));
        out += &format!("Metadata file:  {}", format_bytes(self.metadata_file_bytes));
        out
    }
}

fn render_counts(counts: &BTreeMap<String, usize>) -> String {
    let mut out = String::from("Filing types:\n");
    for (filing_type, count) in counts {
        out += &format!("  {filing_type:<12} {count}\n");
    }
    out
}

/// Output a result in the specified format.
pub fn output_result<T>(result: &T, args: &FilingscopeArgs) -> Result<()>
where
    T: Serialize + HumanOutput,
{
    match args.output_format {
        OutputFormat::Human => println!("{}", result.render_human()),
        OutputFormat::Json => {
            let json = if args.pretty {
                serde_json::to_string_pretty(result)?
            } else {
                serde_json::to_string(result)?
            };
            println!("{json}");
        }
    }
    Ok(())
}

/// Format bytes in human-readable format.
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut size = bytes as f64;
    let mut unit_index = 0;

    while size >= 1024.0 && unit_index < UNITS.len() - 1 {
        size /= 1024.0;
        unit_index += 1;
    }

    if unit_index == 0 {
        format!("{} {}", bytes, UNITS[unit_index])
    } else {
        format!("{:.1} {}", size, UNITS[unit_index])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(1536), "1.5 KB");
        assert_eq!(format_bytes(3 * 1024 * 1024), "3.0 MB");
    }

    #[test]
    fn test_partial_outcome_is_reported() {
        let output = SearchOutput {
            query: "q".into(),
            outcome: FilterOutcome::Partial {
                requested: 10,
                found: 0,
            },
            hits: Vec::new(),
            duration_ms: 1,
        };
        assert!(output.render_human().contains("0 of 10 requested results"));
    }
}

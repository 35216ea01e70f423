//! Command line argument parsing for the filingscope CLI using clap.

use clap::{Parser, Subcommand, ValueEnum};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::embedding::EmbeddingProfile;

/// filingscope - retrieval over SEC filings
#[derive(Parser, Debug, Clone)]
#[command(name = "filingscope")]
#[command(about = "Build and query compressed vector indexes over SEC filings")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(long_about = None)]
pub struct FilingscopeArgs {
    /// Verbosity (-v info, -vv debug)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Quiet mode (overrides verbose)
    #[arg(short, long)]
    pub quiet: bool,

    /// Output format
    #[arg(short = 'f', long = "format", default_value = "human")]
    pub output_format: OutputFormat,

    /// Pretty-print JSON output
    #[arg(long)]
    pub pretty: bool,

    /// Configuration file (JSON)
    #[arg(short, long, env = "FILINGSCOPE_CONFIG", value_name = "CONFIG_FILE")]
    pub config: Option<PathBuf>,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Command,
}

impl FilingscopeArgs {
    /// Effective verbosity: 0 quiet, 1 default, 2 verbose, 3+ debug.
    pub fn verbosity(&self) -> u8 {
        if self.quiet {
            0
        } else {
            self.verbose.saturating_add(1)
        }
    }
}

/// Available CLI commands
#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Build or resume an index from a filing manifest
    Index(IndexArgs),

    /// Search an index
    Search(SearchArgs),

    /// Show index statistics
    Stats(StatsArgs),

    /// Check the integrity of an index artifact
    Verify(VerifyArgs),
}

/// Arguments for building an index
#[derive(Parser, Debug, Clone)]
pub struct IndexArgs {
    /// JSON-lines filing manifest
    #[arg(short, long, value_name = "MANIFEST")]
    pub manifest: PathBuf,

    /// Directory of the index artifact
    #[arg(long, env = "FILINGSCOPE_INDEX_DIR", value_name = "INDEX_DIR")]
    pub index_dir: PathBuf,

    /// Root directory of the filing texts
    #[arg(long, env = "FILINGSCOPE_FILING_ROOT", value_name = "FILING_ROOT")]
    pub filing_root: PathBuf,

    /// Continue the staging artifact in INDEX_DIR
    #[arg(long)]
    pub resume: bool,

    /// Embedding profile (general, biomedical, hybrid)
    #[arg(long)]
    pub profile: Option<EmbeddingProfile>,

    /// Model preset for the general strategy
    #[arg(long, value_name = "PRESET")]
    pub general_model: Option<String>,

    /// Model preset for the biomedical strategy
    #[arg(long, value_name = "PRESET")]
    pub biomedical_model: Option<String>,
}

/// Arguments for searching
#[derive(Parser, Debug, Clone)]
pub struct SearchArgs {
    /// Directory of the index artifact
    #[arg(long, env = "FILINGSCOPE_INDEX_DIR", value_name = "INDEX_DIR")]
    pub index_dir: PathBuf,

    /// Root directory of the filing texts
    #[arg(long, env = "FILINGSCOPE_FILING_ROOT", value_name = "FILING_ROOT")]
    pub filing_root: PathBuf,

    /// Query string
    #[arg(value_name = "QUERY")]
    pub query: String,

    /// Restrict to one company id
    #[arg(long, conflicts_with = "ticker")]
    pub company: Option<u64>,

    /// Restrict to the company behind a ticker
    #[arg(long)]
    pub ticker: Option<String>,

    /// Accepted filing types (repeatable)
    #[arg(long = "filing-type", value_name = "TYPE")]
    pub filing_types: Vec<String>,

    /// Only filings dated on or after this day (YYYY-MM-DD)
    #[arg(long, value_name = "DATE")]
    pub filed_after: Option<chrono::NaiveDate>,

    /// Number of results
    #[arg(short, long)]
    pub k: Option<usize>,

    /// Load and print the text of each hit
    #[arg(long)]
    pub text: bool,

    /// Model preset for the general strategy
    #[arg(long, value_name = "PRESET")]
    pub general_model: Option<String>,

    /// Model preset for the biomedical strategy
    #[arg(long, value_name = "PRESET")]
    pub biomedical_model: Option<String>,
}

/// Arguments for index statistics
#[derive(Parser, Debug, Clone)]
pub struct StatsArgs {
    /// Directory of the index artifact
    #[arg(long, env = "FILINGSCOPE_INDEX_DIR", value_name = "INDEX_DIR")]
    pub index_dir: PathBuf,
}

/// Arguments for integrity verification
#[derive(Parser, Debug, Clone)]
pub struct VerifyArgs {
    /// Directory of the index artifact
    #[arg(long, env = "FILINGSCOPE_INDEX_DIR", value_name = "INDEX_DIR")]
    pub index_dir: PathBuf,
}

/// Output formats
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Human-readable output
    Human,
    /// JSON output
    Json,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_index_command() {
        let args = FilingscopeArgs::try_parse_from([
            "filingscope",
            "index",
            "--manifest",
            "filings.jsonl",
            "--index-dir",
            "/tmp/idx",
            "--filing-root",
            "/data/filings",
            "--resume",
            "--profile",
            "hybrid",
        ])
        .unwrap();

        if let Command::Index(index_args) = args.command {
            assert_eq!(index_args.manifest, PathBuf::from("filings.jsonl"));
            assert_eq!(index_args.index_dir, PathBuf::from("/tmp/idx"));
            assert!(index_args.resume);
            assert_eq!(index_args.profile, Some(EmbeddingProfile::Hybrid));
        } else {
            panic!("Expected Index command");
        }
    }

    #[test]
    fn test_search_command() {
        let args = FilingscopeArgs::try_parse_from([
            "filingscope",
            "search",
            "--index-dir",
            "/tmp/idx",
            "--filing-root",
            "/data",
            "phase 3 results",
            "--ticker",
            "ACME",
            "--filing-type",
            "10-K",
            "--filing-type",
            "10-Q",
            "--filed-after",
            "2023-01-01",
            "-k",
            "5",
            "--text",
        ])
        .unwrap();

        if let Command::Search(search_args) = args.command {
            assert_eq!(search_args.query, "phase 3 results");
            assert_eq!(search_args.ticker.as_deref(), Some("ACME"));
            assert_eq!(search_args.filing_types, vec!["10-K", "10-Q"]);
            assert_eq!(search_args.k, Some(5));
            assert!(search_args.filed_after.is_some());
            assert!(search_args.text);
        } else {
            panic!("Expected Search command");
        }
    }

    #[test]
    fn test_company_conflicts_with_ticker() {
        let result = FilingscopeArgs::try_parse_from([
            "filingscope",
            "search",
            "--index-dir",
            "/tmp/idx",
            "--filing-root",
            "/data",
            "q",
            "--company",
            "1",
            "--ticker",
            "ACME",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn test_verbosity_levels() {
        let args =
            FilingscopeArgs::try_parse_from(["filingscope", "stats", "--index-dir", "x"]).unwrap();
        assert_eq!(args.verbosity(), 1);

        let args = FilingscopeArgs::try_parse_from(["filingscope", "-vv", "stats", "--index-dir", "x"])
            .unwrap();
        assert_eq!(args.verbosity(), 3);

        let args =
            FilingscopeArgs::try_parse_from(["filingscope", "--quiet", "verify", "--index-dir", "x"])
                .unwrap();
        assert_eq!(args.verbosity(), 0);
    }

    #[test]
    fn test_output_format() {
        let args = FilingscopeArgs::try_parse_from([
            "filingscope",
            "--format",
            "json",
            "stats",
            "--index-dir",
            "x",
        ])
        .unwrap();
        assert_eq!(args.output_format, OutputFormat::Json);
    }
}

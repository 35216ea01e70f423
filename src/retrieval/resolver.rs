//! Ticker to company id resolution.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use crate::error::{RagError, Result};
use crate::filing::{CompanyId, FilingRecord};

/// Ticker map written next to an index artifact.
pub const TICKERS_FILE: &str = "tickers.json";

/// Maps a human-readable ticker to a company id.
pub trait TickerResolver: Send + Sync + std::fmt::Debug {
    fn resolve(&self, ticker: &str) -> Option<CompanyId>;
}

/// A fixed ticker table. Tickers are matched case-insensitively.
#[derive(Debug, Clone, Default)]
pub struct StaticTickerResolver {
    tickers: HashMap<String, CompanyId>,
}

impl StaticTickerResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, ticker: &str, company: CompanyId) {
        self.tickers.insert(normalize(ticker), company);
    }

    pub fn with(mut self, ticker: &str, company: CompanyId) -> Self {
        self.insert(ticker, company);
        self
    }

    /// Collect the tickers named in a filing manifest.
    pub fn from_manifest(records: &[FilingRecord]) -> Self {
        let mut resolver = Self::new();
        for record in records {
            if let Some(ticker) = &record.ticker {
                resolver.insert(ticker, record.company_id);
            }
        }
        resolver
    }

    /// Load a JSON object of `{"TICKER": company_id}`.
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = fs::read_to_string(path.as_ref())?;
        let raw: HashMap<String, CompanyId> = serde_json::from_str(&text).map_err(|e| {
            RagError::invalid_argument(format!("{}: {e}", path.as_ref().display()))
        })?;
        let mut resolver = Self::new();
        for (ticker, company) in raw {
            resolver.insert(&ticker, company);
        }
        Ok(resolver)
    }

    /// Write the table as a JSON object, sorted by ticker.
    pub fn to_json_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let sorted: std::collections::BTreeMap<&str, CompanyId> = self
            .tickers
            .iter()
            .map(|(ticker, company)| (ticker.as_str(), *company))
            .collect();
        fs::write(path, serde_json::to_vec_pretty(&sorted)?)?;
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.tickers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tickers.is_empty()
    }
}

impl TickerResolver for StaticTickerResolver {
    fn resolve(&self, ticker: &str) -> Option<CompanyId> {
        self.tickers.get(&normalize(ticker)).copied()
    }
}

fn normalize(ticker: &str) -> String {
    ticker.trim().to_ascii_uppercase()
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::*;

    #[test]
    fn test_case_insensitive_lookup() {
        let resolver = StaticTickerResolver::new().with("acme", 7);
        assert_eq!(resolver.resolve("ACME"), Some(7));
        assert_eq!(resolver.resolve(" Acme "), Some(7));
        assert_eq!(resolver.resolve("ZZZ"), None);
    }

    #[test]
    fn test_from_manifest_and_json() {
        let record = FilingRecord {
            filing_id: "f1".into(),
            company_id: 3,
            ticker: Some("bio".into()),
            source_path: "bio/10k.txt".into(),
            filing_type: "10-K".into(),
            filing_date: NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(),
            sections: None,
        };
        let resolver = StaticTickerResolver::from_manifest(&[record]);
        assert_eq!(resolver.resolve("BIO"), Some(3));

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("input.json");
        fs::write(&path, r#"{"abc": 1, "XYZ": 2}"#).unwrap();
        let resolver = StaticTickerResolver::from_json_file(&path).unwrap();
        assert_eq!(resolver.len(), 2);
        assert_eq!(resolver.resolve("Abc"), Some(1));

        let copy = dir.path().join(TICKERS_FILE);
        resolver.to_json_file(&copy).unwrap();
        let reloaded = StaticTickerResolver::from_json_file(&copy).unwrap();
        assert_eq!(reloaded.resolve("xyz"), Some(2));
    }
}

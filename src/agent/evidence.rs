//! Evidence, query trail and the audit package.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::agent::collaborators::{FilingHit, NewsItem};
use crate::agent::context::CatalystContext;
use crate::agent::state::CompletionReason;
use crate::filing::{Chunk, InternalId};

/// Where a query is sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Source {
    /// The filing index.
    Filings,
    /// The external news search (press releases).
    News,
}

/// A query proposed by the language model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryProposal {
    pub query: String,
    pub source: Source,
    #[serde(default)]
    pub rationale: String,
    #[serde(default)]
    pub looking_for: Option<String>,
}

/// One entry of the query trail.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryRecord {
    pub round: usize,
    pub query: String,
    pub source: Source,
    pub rationale: String,
    pub looking_for: Option<String>,
    pub result_count: usize,
    /// Set when the search failed and the round counted as empty.
    pub error: Option<String>,
}

impl QueryRecord {
    pub(crate) fn new(round: usize, proposal: QueryProposal) -> Self {
        Self {
            round,
            query: proposal.query,
            source: proposal.source,
            rationale: proposal.rationale,
            looking_for: proposal.looking_for,
            result_count: 0,
            error: None,
        }
    }
}

/// One piece of gathered evidence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Evidence {
    /// Structured context supplied with the request.
    Seed { label: String, summary: String },
    Filing {
        round: usize,
        internal_id: InternalId,
        chunk: Chunk,
        score: f32,
        excerpt: String,
    },
    News { round: usize, item: NewsItem },
}

impl Evidence {
    pub(crate) fn from_filing(round: usize, hit: FilingHit, excerpt_chars: usize) -> Self {
        Evidence::Filing {
            round,
            internal_id: hit.internal_id,
            excerpt: excerpt(&hit.text, excerpt_chars),
            chunk: hit.chunk,
            score: hit.score,
        }
    }

    /// Round the evidence was gathered in; 0 for seeds.
    pub fn round(&self) -> usize {
        match self {
            Evidence::Seed { .. } => 0,
            Evidence::Filing { round, .. } | Evidence::News { round, .. } => *round,
        }
    }

    /// Short text shown to the language model.
    pub fn summary(&self) -> String {
        match self {
            Evidence::Seed { label, summary } => format!("{label}: {summary}"),
            Evidence::Filing {
                chunk,
                score,
                excerpt,
                ..
            } => format!(
                "{} filed {} (score {score:.3}): {excerpt}",
                chunk.filing_type, chunk.filing_date
            ),
            Evidence::News { item, .. } => match item.date {
                Some(date) => format!("{} ({date}): {}", item.title, item.snippet),
                None => format!("{}: {}", item.title, item.snippet),
            },
        }
    }
}

/// Collapse whitespace and keep at most `max_chars` characters.
pub(crate) fn excerpt(text: &str, max_chars: usize) -> String {
    let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
    match collapsed.char_indices().nth(max_chars) {
        Some((cut, _)) => format!("{}...", &collapsed[..cut]),
        None => collapsed,
    }
}

/// Everything a concluded session gathered, handed to report generation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditPackage {
    pub request_id: Uuid,
    pub context: CatalystContext,
    pub queries: Vec<QueryRecord>,
    pub evidence: Vec<Evidence>,
    pub rounds: usize,
    pub reason: CompletionReason,
    /// The session was cancelled before it could finish.
    pub incomplete: bool,
    pub started_at: DateTime<Utc>,
    pub concluded_at: DateTime<Utc>,
}

impl AuditPackage {
    /// Evidence gathered by search rounds, without the seeds.
    pub fn gathered(&self) -> impl Iterator<Item = &Evidence> {
        self.evidence.iter().filter(|e| e.round() > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_excerpt_collapses_and_truncates() {
        assert_eq!(excerpt("  a\n\n b\tc  ", 10), "a b c");
        assert_eq!(excerpt("héllo wörld", 5), "héllo...");
    }
}

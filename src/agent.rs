//! Bounded research loop over filings and news.
//!
//! A [`ResearchSession`] is one analysis request. It moves through
//! `Init → Iterating → Concluded` according to [`transition`]; each round
//! asks a [`LanguageModel`] for the next query, runs it against the filing
//! index or a news source, then asks whether the evidence is sufficient.
//! The loop stops when the model says so, when `max_rounds` is reached or
//! when the request is cancelled, and the trail is frozen into an
//! [`AuditPackage`].
//!
//! The filing index is a hard precondition: an `IndexUnavailable` from the
//! filing search fails the whole analysis. Any other failed search counts as
//! a round with no results. A failed or malformed language model reply is
//! fatal.

pub mod collaborators;
pub mod context;
pub mod evidence;
pub mod session;
pub mod state;

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{RagError, Result};

pub use collaborators::{
    Collaborators, FilingHit, FilingSearch, Judgement, LanguageModel, LmRequest, LmTask,
    NewsItem, NewsSearch, NextStep, ReportWriter,
};
pub use context::{CatalystContext, FinancialSnapshot, HistoricalOutcomes};
pub use evidence::{AuditPackage, Evidence, QueryProposal, QueryRecord, Source};
pub use session::{ResearchAgent, ResearchSession};
pub use state::{CompletionReason, Event, Phase, SessionState, transition};

/// Limits of one research session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Maximum number of search rounds.
    pub max_rounds: usize,
    /// Timeout of each language model or search call, in milliseconds.
    pub call_timeout_ms: u64,
    /// Filing hits requested per filing search.
    pub filing_k: usize,
    /// Characters kept from each filing hit.
    pub excerpt_chars: usize,
    /// Number of recent queries shown to the language model.
    pub trail_window: usize,
    /// Number of most recent gathered evidence items shown to the language
    /// model, across all rounds so far.
    pub evidence_window: usize,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_rounds: 10,
            call_timeout_ms: 30_000,
            filing_k: 5,
            excerpt_chars: 600,
            trail_window: 3,
            evidence_window: 20,
        }
    }
}

impl AgentConfig {
    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_rounds == 0 {
            return Err(RagError::invalid_config("max_rounds must be positive"));
        }
        if self.call_timeout_ms == 0 {
            return Err(RagError::invalid_config("call_timeout_ms must be positive"));
        }
        if self.filing_k == 0 || self.excerpt_chars == 0 {
            return Err(RagError::invalid_config(
                "filing_k and excerpt_chars must be positive",
            ));
        }
        Ok(())
    }
}

//! Services a research session depends on.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::agent::evidence::{AuditPackage, QueryProposal};
use crate::error::{RagError, Result};
use crate::filing::{Chunk, CompanyId, InternalId};
use crate::retrieval::{RetrievalEngine, SearchRequest};

/// What a language model call is asked to decide.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LmTask {
    /// Reply with a [`NextStep`].
    PlanNextQuery,
    /// Reply with a [`Judgement`].
    JudgeSufficiency,
}

/// One bounded language model call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LmRequest {
    pub task: LmTask,
    pub prompt: String,
    /// Catalyst, seed evidence, recent queries and evidence summaries.
    pub context: serde_json::Value,
}

/// The decision-maker of a session.
///
/// Replies are JSON, optionally wrapped in prose or a code fence.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    async fn complete(&self, request: &LmRequest) -> Result<String>;
}

/// Reply to [`LmTask::PlanNextQuery`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum NextStep {
    Search(QueryProposal),
    Conclude {
        #[serde(default)]
        reason: Option<String>,
    },
}

/// Reply to [`LmTask::JudgeSufficiency`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Judgement {
    pub sufficient: bool,
    #[serde(default)]
    pub reason: String,
}

/// Parse the JSON object in a model reply.
pub(crate) fn parse_reply<T: serde::de::DeserializeOwned>(reply: &str) -> Result<T> {
    let start = reply.find('{');
    let end = reply.rfind('}');
    let json = match (start, end) {
        (Some(start), Some(end)) if start < end => &reply[start..=end],
        _ => {
            return Err(RagError::language_model(format!(
                "reply contains no JSON object: {}",
                reply.chars().take(200).collect::<String>()
            )));
        }
    };
    serde_json::from_str(json)
        .map_err(|e| RagError::language_model(format!("malformed decision: {e}")))
}

/// A filing hit with its text loaded.
#[derive(Debug, Clone, PartialEq)]
pub struct FilingHit {
    pub internal_id: InternalId,
    pub chunk: Chunk,
    pub score: f32,
    pub text: String,
}

/// Search over a company's filings.
#[async_trait]
pub trait FilingSearch: Send + Sync {
    /// Up to `k` hits. Must return `IndexUnavailable` when no index is
    /// loaded.
    async fn search_filings(&self, company: CompanyId, query: &str, k: usize)
    -> Result<Vec<FilingHit>>;
}

#[async_trait]
impl FilingSearch for RetrievalEngine {
    async fn search_filings(
        &self,
        company: CompanyId,
        query: &str,
        k: usize,
    ) -> Result<Vec<FilingHit>> {
        let results = self
            .search(&SearchRequest::new(query).company(company).k(k))
            .await?;
        let results = tokio::task::spawn_blocking(move || results.load_texts())
            .await
            .map_err(|e| RagError::other(format!("text loading task failed: {e}")))?;

        let mut hits = Vec::with_capacity(results.len());
        for result in results {
            let text = result.text()?.to_string();
            hits.push(FilingHit {
                internal_id: result.internal_id(),
                chunk: result.chunk().clone(),
                score: result.score(),
                text,
            });
        }
        Ok(hits)
    }
}

/// A press release or news article.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewsItem {
    pub title: String,
    pub url: String,
    #[serde(default)]
    pub snippet: String,
    #[serde(default)]
    pub date: Option<NaiveDate>,
}

/// External news search.
#[async_trait]
pub trait NewsSearch: Send + Sync {
    async fn search_news(&self, query: &str) -> Result<Vec<NewsItem>>;
}

/// Receives the audit package of every concluded analysis.
#[async_trait]
pub trait ReportWriter: Send + Sync {
    async fn write_report(&self, package: Arc<AuditPackage>) -> Result<()>;
}

/// The services shared by every session of an agent.
#[derive(Clone)]
pub struct Collaborators {
    pub language_model: Arc<dyn LanguageModel>,
    pub filings: Arc<dyn FilingSearch>,
    pub news: Arc<dyn NewsSearch>,
}

impl std::fmt::Debug for Collaborators {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collaborators").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::Source;

    #[test]
    fn test_parse_search_step_in_code_fence() {
        let reply = "Sure.\n```json\n{\"action\": \"search\", \"query\": \"phase 3 endpoint\", \"source\": \"filings\", \"rationale\": \"trial design\"}\n```";
        let step: NextStep = parse_reply(reply).unwrap();
        match step {
            NextStep::Search(proposal) => {
                assert_eq!(proposal.query, "phase 3 endpoint");
                assert_eq!(proposal.source, Source::Filings);
                assert_eq!(proposal.looking_for, None);
            }
            other => panic!("unexpected step {other:?}"),
        }
    }

    #[test]
    fn test_parse_conclude_and_judgement() {
        let step: NextStep = parse_reply(r#"{"action": "conclude"}"#).unwrap();
        assert_eq!(step, NextStep::Conclude { reason: None });
        let judgement: Judgement = parse_reply(r#"{"sufficient": true}"#).unwrap();
        assert!(judgement.sufficient);
    }

    #[test]
    fn test_malformed_reply_is_language_model_error() {
        let err = parse_reply::<Judgement>("I think we are done").unwrap_err();
        assert!(matches!(err, RagError::LanguageModel(_)));
        let err = parse_reply::<NextStep>(r#"{"action": "dance"}"#).unwrap_err();
        assert!(matches!(err, RagError::LanguageModel(_)));
    }
}

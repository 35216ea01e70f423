//! The research session state machine and the agent that runs it.

use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use serde_json::json;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::agent::collaborators::{
    Collaborators, Judgement, LmRequest, LmTask, NextStep, ReportWriter, parse_reply,
};
use crate::agent::context::CatalystContext;
use crate::agent::evidence::{AuditPackage, Evidence, QueryProposal, QueryRecord, Source};
use crate::agent::state::{Event, Phase, SessionState};
use crate::agent::AgentConfig;
use crate::error::{RagError, Result};

const PLAN_PROMPT: &str = "You are researching a biotech catalyst using SEC filings and news. \
Propose the next search as JSON {\"action\": \"search\", \"query\": ..., \"source\": \"filings\" | \"news\", \
\"rationale\": ..., \"looking_for\": ...}, or {\"action\": \"conclude\"} if no further search is useful.";

const JUDGE_PROMPT: &str = "Given the evidence gathered so far, is it sufficient to assess the catalyst? \
Reply as JSON {\"sufficient\": true | false, \"reason\": ...}.";

/// One analysis request.
///
/// Drive it with [`step`](Self::step) for one round at a time or
/// [`run`](Self::run) to completion. The state is observable between
/// steps through [`state`](Self::state).
pub struct ResearchSession {
    request_id: Uuid,
    config: AgentConfig,
    context: CatalystContext,
    collaborators: Collaborators,
    cancel: CancellationToken,
    state: SessionState,
    started_at: DateTime<Utc>,
    failed: bool,
}

impl std::fmt::Debug for ResearchSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResearchSession")
            .field("request_id", &self.request_id)
            .field("state", &self.state)
            .field("failed", &self.failed)
            .finish()
    }
}

impl ResearchSession {
    /// Seed the session from `context` and enter `Iterating`.
    pub fn start(
        config: AgentConfig,
        context: CatalystContext,
        collaborators: Collaborators,
        cancel: CancellationToken,
    ) -> Result<Self> {
        config.validate()?;
        let mut state = SessionState::new();
        state.evidence = context.seed_evidence();
        state.apply(Event::Seeded)?;
        let request_id = Uuid::new_v4();
        info!(
            "Research session {request_id} started for {} ({})",
            context.drug, context.company_name
        );
        Ok(Self {
            request_id,
            config,
            context,
            collaborators,
            cancel,
            state,
            started_at: Utc::now(),
            failed: false,
        })
    }

    pub fn request_id(&self) -> Uuid {
        self.request_id
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    /// Request cancellation. Observed at the start of the next round.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Run one round, or conclude if the session is cancelled or out of
    /// rounds. Returns the phase after the step.
    ///
    /// An error fails the whole analysis; the session accepts no further
    /// steps.
    pub async fn step(&mut self) -> Result<Phase> {
        if self.failed {
            return Err(RagError::invalid_operation("session has failed"));
        }
        if self.state.is_done() {
            return Err(RagError::invalid_operation("session has concluded"));
        }
        let result = self.round().await;
        if result.is_err() {
            self.failed = true;
        }
        result
    }

    /// Step until concluded and return the audit package.
    pub async fn run(mut self) -> Result<AuditPackage> {
        while !self.state.is_done() {
            self.step().await?;
        }
        self.conclude()
    }

    /// Freeze a concluded session into its audit package.
    pub fn conclude(self) -> Result<AuditPackage> {
        if self.failed || !self.state.is_done() {
            return Err(RagError::invalid_operation(
                "only a concluded session has an audit package",
            ));
        }
        let reason = self
            .state
            .reason
            .ok_or_else(|| RagError::invalid_operation("concluded session has no reason"))?;
        let incomplete = self.state.is_incomplete();
        Ok(AuditPackage {
            request_id: self.request_id,
            context: self.context,
            queries: self.state.queries,
            evidence: self.state.evidence,
            rounds: self.state.round,
            reason,
            incomplete,
            started_at: self.started_at,
            concluded_at: Utc::now(),
        })
    }

    async fn round(&mut self) -> Result<Phase> {
        if self.cancel.is_cancelled() {
            return self.finish(Event::Cancel);
        }
        if self.state.round >= self.config.max_rounds {
            return self.finish(Event::CapReached);
        }
        self.state.round += 1;
        let round = self.state.round;

        let plan = self.ask(LmTask::PlanNextQuery, PLAN_PROMPT).await?;
        let proposal = match parse_reply::<NextStep>(&plan)? {
            NextStep::Search(proposal) => proposal,
            NextStep::Conclude { reason } => {
                debug!(
                    "Round {round}: model concluded ({})",
                    reason.as_deref().unwrap_or("no reason given")
                );
                return self.finish(Event::Sufficient);
            }
        };
        debug!(
            "Round {round}: {:?} search '{}'",
            proposal.source, proposal.query
        );

        let record = self.dispatch(round, proposal).await?;
        self.state.queries.push(record);

        let reply = self.ask(LmTask::JudgeSufficiency, JUDGE_PROMPT).await?;
        let judgement: Judgement = parse_reply(&reply)?;
        if judgement.sufficient {
            return self.finish(Event::Sufficient);
        }
        if round >= self.config.max_rounds {
            return self.finish(Event::CapReached);
        }
        self.state.apply(Event::Continue)
    }

    /// Run `proposal` and record its evidence.
    ///
    /// `IndexUnavailable` from the filing search is returned; any other
    /// failure is recorded as a round without results.
    async fn dispatch(&mut self, round: usize, proposal: QueryProposal) -> Result<QueryRecord> {
        let mut record = QueryRecord::new(round, proposal);
        let outcome = match record.source {
            Source::Filings => {
                let filings = Arc::clone(&self.collaborators.filings);
                let company = self.context.company_id;
                let k = self.config.filing_k;
                bounded(
                    self.config.call_timeout(),
                    "filing search",
                    filings.search_filings(company, &record.query, k),
                )
                .await
                .map(|hits| {
                    hits.into_iter()
                        .map(|hit| Evidence::from_filing(round, hit, self.config.excerpt_chars))
                        .collect::<Vec<_>>()
                })
            }
            Source::News => {
                let news = Arc::clone(&self.collaborators.news);
                bounded(
                    self.config.call_timeout(),
                    "news search",
                    news.search_news(&record.query),
                )
                .await
                .map(|items| {
                    items
                        .into_iter()
                        .map(|item| Evidence::News { round, item })
                        .collect::<Vec<_>>()
                })
            }
        };

        match outcome {
            Ok(evidence) => {
                record.result_count = evidence.len();
                self.state.evidence.extend(evidence);
            }
            Err(RagError::IndexUnavailable) => {
                warn!("Round {round}: filing index unavailable, failing the analysis");
                return Err(RagError::IndexUnavailable);
            }
            Err(e) => {
                warn!("Round {round}: search for '{}' failed: {e}", record.query);
                record.error = Some(e.to_string());
            }
        }
        Ok(record)
    }

    async fn ask(&self, task: LmTask, prompt: &str) -> Result<String> {
        let request = LmRequest {
            task,
            prompt: prompt.to_string(),
            context: self.lm_context(),
        };
        let model = Arc::clone(&self.collaborators.language_model);
        bounded(self.config.call_timeout(), "language model", model.complete(&request)).await
    }

    fn lm_context(&self) -> serde_json::Value {
        let skip = self
            .state
            .queries
            .len()
            .saturating_sub(self.config.trail_window);
        let recent: Vec<_> = self.state.queries[skip..]
            .iter()
            .map(|q| {
                json!({
                    "query": q.query,
                    "source": q.source,
                    "result_count": q.result_count,
                })
            })
            .collect();
        let seeds: Vec<String> = self
            .state
            .evidence
            .iter()
            .filter(|e| e.round() == 0)
            .map(Evidence::summary)
            .collect();
        let gathered: Vec<&Evidence> = self
            .state
            .evidence
            .iter()
            .filter(|e| e.round() > 0)
            .collect();
        let skip = gathered.len().saturating_sub(self.config.evidence_window);
        let gathered: Vec<_> = gathered[skip..]
            .iter()
            .map(|e| json!({ "round": e.round(), "summary": e.summary() }))
            .collect();
        json!({
            "catalyst": self.context,
            "seed_evidence": seeds,
            "round": self.state.round,
            "max_rounds": self.config.max_rounds,
            "recent_queries": recent,
            "evidence_count": self.state.evidence.len(),
            "gathered_evidence": gathered,
        })
    }

    fn finish(&mut self, event: Event) -> Result<Phase> {
        let phase = self.state.apply(event)?;
        info!(
            "Research session {} concluded after {} rounds: {:?}",
            self.request_id, self.state.round, self.state.reason
        );
        Ok(phase)
    }
}

/// Await `future` for at most `timeout`.
async fn bounded<T, F>(timeout: std::time::Duration, what: &str, future: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(timeout, future).await {
        Ok(result) => result,
        Err(_) => Err(RagError::timeout(format!("{what} exceeded {timeout:?}"))),
    }
}

/// Runs research sessions against a shared set of collaborators.
///
/// Sessions share nothing mutable, so independent analyses may run
/// concurrently on one agent.
#[derive(Clone)]
pub struct ResearchAgent {
    config: AgentConfig,
    collaborators: Collaborators,
    reports: Option<Arc<dyn ReportWriter>>,
}

impl std::fmt::Debug for ResearchAgent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResearchAgent")
            .field("config", &self.config)
            .field("reports", &self.reports.is_some())
            .finish()
    }
}

impl ResearchAgent {
    pub fn new(config: AgentConfig, collaborators: Collaborators) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            collaborators,
            reports: None,
        })
    }

    pub fn with_report_writer(mut self, writer: Arc<dyn ReportWriter>) -> Self {
        self.reports = Some(writer);
        self
    }

    /// Open a session without running it.
    pub fn session(&self, context: CatalystContext, cancel: CancellationToken) -> Result<ResearchSession> {
        ResearchSession::start(
            self.config.clone(),
            context,
            self.collaborators.clone(),
            cancel,
        )
    }

    /// Analyze `context` to completion and hand the audit package to the
    /// report writer, if any.
    pub async fn analyze(
        &self,
        context: CatalystContext,
        cancel: CancellationToken,
    ) -> Result<Arc<AuditPackage>> {
        let package = Arc::new(self.session(context, cancel)?.run().await?);
        if let Some(writer) = &self.reports {
            bounded(
                self.config.call_timeout(),
                "report writer",
                writer.write_report(Arc::clone(&package)),
            )
            .await?;
        }
        Ok(package)
    }
}
